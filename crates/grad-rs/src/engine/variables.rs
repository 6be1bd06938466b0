//! Named mutable tensors. Assignment is the only sanctioned in-place update.

use anyhow::{bail, Result};

use crate::engine::Engine;
use crate::error::{DtypeError, ShapeError};
use crate::tensor::Tensor;

/// A named, optionally trainable tensor registered with the engine.
///
/// The handle dereferences to its current tensor, so variables can be passed
/// anywhere a tensor is expected.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    trainable: bool,
    tensor: Tensor,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }
}

impl std::ops::Deref for Variable {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        &self.tensor
    }
}

pub(crate) struct VariableRecord {
    pub tensor: Tensor,
    pub trainable: bool,
}

impl Engine {
    /// Registers a variable over `initial`'s storage. Variable names are
    /// unique; re-registering one is an error.
    pub fn make_variable(
        &self,
        name: impl Into<String>,
        initial: &Tensor,
        trainable: bool,
    ) -> Result<Variable> {
        let name = name.into();
        let backend = self.storage_backend(initial)?;
        let mut st = self.state();
        if st.variables.contains_key(&name) {
            bail!("variable with name '{name}' was already registered");
        }
        // A dedicated kept handle, outside any scope, so tidy cleanup can
        // never free variable storage.
        let handle = Self::register_tensor_locked(&mut st, initial.info(), &backend, None);
        if let Some(state) = st.handles.get_mut(&handle.id()) {
            state.kept = true;
            state.scope_id = None;
        }
        st.variables.insert(
            name.clone(),
            VariableRecord {
                tensor: handle.clone(),
                trainable,
            },
        );
        Ok(Variable {
            name,
            trainable,
            tensor: handle,
        })
    }

    /// Points the variable at `value`'s storage, releasing the old storage.
    /// Shape and dtype are fixed at variable creation.
    pub fn assign_variable(&self, variable: &mut Variable, value: &Tensor) -> Result<()> {
        if value.shape() != variable.tensor.shape() {
            return Err(ShapeError::new(
                "assign_variable",
                format!(
                    "variable '{}' has shape {:?}, assigned value has shape {:?}",
                    variable.name,
                    variable.tensor.shape().dims(),
                    value.shape().dims()
                ),
            )
            .into());
        }
        if value.dtype() != variable.tensor.dtype() {
            return Err(DtypeError::new(
                "assign_variable",
                format!(
                    "variable '{}' has dtype {}, assigned value has dtype {}",
                    variable.name,
                    variable.tensor.dtype(),
                    value.dtype()
                ),
            )
            .into());
        }
        let backend = self.storage_backend(value)?;
        let old = variable.tensor.clone();
        let new_handle = {
            let mut st = self.state();
            let handle = Self::register_tensor_locked(&mut st, value.info(), &backend, None);
            if let Some(state) = st.handles.get_mut(&handle.id()) {
                state.kept = true;
                state.scope_id = None;
            }
            if let Some(record) = st.variables.get_mut(&variable.name) {
                record.tensor = handle.clone();
            }
            handle
        };
        variable.tensor = new_handle;
        let _ = self.dispose(&old);
        Ok(())
    }

    /// A registered variable by name.
    pub fn variable(&self, name: &str) -> Option<Variable> {
        let st = self.state();
        st.variables.get(name).map(|record| Variable {
            name: name.to_string(),
            trainable: record.trainable,
            tensor: record.tensor.clone(),
        })
    }

    /// Names of all registered variables.
    pub fn variable_names(&self) -> Vec<String> {
        let st = self.state();
        let mut names: Vec<String> = st.variables.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn trainable_variables(&self) -> Vec<Variable> {
        let st = self.state();
        let mut variables: Vec<Variable> = st
            .variables
            .iter()
            .filter(|(_, record)| record.trainable)
            .map(|(name, record)| Variable {
                name: name.clone(),
                trainable: record.trainable,
                tensor: record.tensor.clone(),
            })
            .collect();
        variables.sort_by(|a, b| a.name.cmp(&b.name));
        variables
    }

    /// Disposes every registered variable and clears the registry.
    pub fn dispose_variables(&self) {
        let handles: Vec<Tensor> = {
            let mut st = self.state();
            st.variables
                .drain()
                .map(|(_, record)| record.tensor)
                .collect()
        };
        for handle in handles {
            let _ = self.dispose(&handle);
        }
    }
}
