//! Scope-based automatic disposal of intermediate tensors.

use std::collections::HashSet;

use anyhow::Result;

use crate::engine::{Engine, ScopeState};
use crate::error::TensorDisposedError;
use crate::tensor::{Tensor, TensorContainer, TensorId};

/// Ends the scope on drop unless the happy path already did, so a panic or
/// early `?` inside `tidy` still unwinds the scope and frees its tensors.
struct ScopeGuard<'a> {
    engine: &'a Engine,
    done: bool,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.engine.end_scope(&[]);
        }
    }
}

impl Engine {
    /// Runs `f` inside a fresh scope. Tensors created inside that are neither
    /// part of the returned container, kept, nor pinned by a recording tape
    /// are disposed when `f` finishes — including on the error path.
    pub fn tidy<T, F>(&self, f: F) -> Result<T>
    where
        T: TensorContainer,
        F: FnOnce() -> Result<T>,
    {
        self.start_scope();
        let mut guard = ScopeGuard {
            engine: self,
            done: false,
        };
        let value = f()?;
        let mut result = Vec::new();
        value.collect_tensors(&mut result);
        guard.done = true;
        self.end_scope(&result);
        Ok(value)
    }

    /// Opens an explicit scope; pair with [`Engine::end_scope`]. Prefer
    /// [`Engine::tidy`], which guarantees the pairing.
    pub fn start_scope(&self) {
        let mut st = self.state();
        let id = st.next_scope_id;
        st.next_scope_id += 1;
        st.scope_stack.push(ScopeState {
            id,
            track: Vec::new(),
        });
    }

    /// Closes the innermost scope. Tensors in `result` survive and are
    /// handed to the parent scope; everything else tracked by the scope is
    /// disposed unless kept.
    pub fn end_scope(&self, result: &[Tensor]) {
        let mut freed = Vec::new();
        {
            let mut st = self.state();
            let Some(scope) = st.scope_stack.pop() else {
                return;
            };
            let result_ids: HashSet<TensorId> = result.iter().map(|t| t.id()).collect();

            for id in &scope.track {
                if result_ids.contains(id) {
                    continue;
                }
                // Handles already disposed by user code inside the scope are
                // simply gone; only explicit double-dispose is an error.
                let disposable = match st.handles.get(id) {
                    Some(handle) => !handle.kept,
                    None => false,
                };
                if disposable {
                    if let Some(entry) = Self::dispose_handle_locked(&mut st, *id) {
                        freed.push(entry);
                    }
                }
            }

            // Promote surviving results allocated in this scope to the parent
            // so they are not leaked once the parent ends.
            let parent_id = st.scope_stack.last().map(|parent| parent.id);
            let mut promote = Vec::new();
            for tensor in result {
                if let Some(handle) = st.handles.get_mut(&tensor.id()) {
                    if !handle.kept && handle.scope_id == Some(scope.id) {
                        handle.scope_id = parent_id;
                        promote.push(tensor.id());
                    }
                }
            }
            if let Some(parent) = st.scope_stack.last_mut() {
                parent.track.extend(promote);
            }
        }
        for (backend, data_id) in freed {
            backend.dispose_data(data_id);
        }
    }

    /// Excludes a tensor from automatic scope disposal. The tensor then lives
    /// until explicitly disposed.
    pub fn keep(&self, tensor: &Tensor) -> Result<(), TensorDisposedError> {
        let mut st = self.state();
        match st.handles.get_mut(&tensor.id()) {
            Some(handle) => {
                handle.kept = true;
                Ok(())
            }
            None => Err(TensorDisposedError { id: tensor.id() }),
        }
    }
}
