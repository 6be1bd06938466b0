//! Name-keyed kernel and gradient registries.
//!
//! Both tables are deliberately string-keyed: a kernel is resolved by
//! `(kernel name, backend name)` at call time, which is what allows an
//! implementation to be swapped per backend without touching call sites.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::backend::KernelBackend;
use crate::engine::Engine;
use crate::error::{BackendError, BackendResult, KernelError};
use crate::kernel::KernelAttrs;
use crate::tensor::{NamedTensors, Tensor, TensorInfo};

/// Everything a kernel sees when it runs.
pub struct KernelParams<'a> {
    pub inputs: &'a NamedTensors,
    pub attrs: &'a KernelAttrs,
    pub backend: &'a dyn KernelBackend,
}

impl<'a> KernelParams<'a> {
    /// Fetches a required input by name.
    pub fn input(&self, kernel: &str, name: &str) -> BackendResult<&'a Tensor> {
        self.inputs
            .get(name)
            .ok_or_else(|| BackendError::MissingInput {
                kernel: kernel.to_string(),
                input: name.to_string(),
            })
    }
}

/// Executable body of a kernel. Returns one [`TensorInfo`] per output; the
/// engine wraps them into tracked tensors.
pub type KernelFunc = Arc<dyn Fn(KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> + Send + Sync>;

/// Hook run when a kernel's backend is activated (`setup`) or removed
/// (`dispose`).
pub type BackendHook = Arc<dyn Fn(&dyn KernelBackend) + Send + Sync>;

/// One kernel registration, unique per `(kernel_name, backend_name)` pair.
#[derive(Clone)]
pub struct KernelConfig {
    pub kernel_name: String,
    pub backend_name: String,
    pub kernel_func: KernelFunc,
    pub setup_func: Option<BackendHook>,
    pub dispose_func: Option<BackendHook>,
}

impl KernelConfig {
    pub fn new(
        kernel_name: impl Into<String>,
        backend_name: impl Into<String>,
        kernel_func: KernelFunc,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            backend_name: backend_name.into(),
            kernel_func,
            setup_func: None,
            dispose_func: None,
        }
    }

    pub fn with_setup(mut self, hook: BackendHook) -> Self {
        self.setup_func = Some(hook);
        self
    }

    pub fn with_dispose(mut self, hook: BackendHook) -> Self {
        self.dispose_func = Some(hook);
        self
    }
}

struct KernelEntry {
    config: KernelConfig,
    /// Set once the setup hook has fired for the currently-live backend
    /// instance; pairs setup/dispose exactly once per activation.
    setup_done: bool,
}

/// Process-wide mapping from `(kernel name, backend name)` to registrations.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: RwLock<HashMap<(String, String), KernelEntry>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a registration; a live `(kernel, backend)` pair is an error.
    pub fn register(&self, config: KernelConfig) -> Result<(), KernelError> {
        let key = (config.kernel_name.clone(), config.backend_name.clone());
        let mut kernels = self.kernels.write().expect("kernel registry poisoned");
        if kernels.contains_key(&key) {
            return Err(KernelError::Duplicate {
                kernel: config.kernel_name,
                backend: config.backend_name,
            });
        }
        kernels.insert(
            key,
            KernelEntry {
                config,
                setup_done: false,
            },
        );
        Ok(())
    }

    /// Looks up the executable body for a `(kernel, backend)` pair.
    pub fn get(&self, kernel_name: &str, backend_name: &str) -> Option<KernelFunc> {
        let kernels = self.kernels.read().expect("kernel registry poisoned");
        kernels
            .get(&(kernel_name.to_string(), backend_name.to_string()))
            .map(|entry| Arc::clone(&entry.config.kernel_func))
    }

    /// Removes a registration. Missing keys are a silent no-op; when present,
    /// the removed config and its setup state are returned so the caller can
    /// fire the dispose hook.
    pub(crate) fn unregister(
        &self,
        kernel_name: &str,
        backend_name: &str,
    ) -> Option<(KernelConfig, bool)> {
        let mut kernels = self.kernels.write().expect("kernel registry poisoned");
        kernels
            .remove(&(kernel_name.to_string(), backend_name.to_string()))
            .map(|entry| (entry.config, entry.setup_done))
    }

    /// All registrations for one backend, e.g. when cloning a kernel set to
    /// an alias backend.
    pub fn configs_for_backend(&self, backend_name: &str) -> Vec<KernelConfig> {
        let kernels = self.kernels.read().expect("kernel registry poisoned");
        kernels
            .values()
            .filter(|entry| entry.config.backend_name == backend_name)
            .map(|entry| entry.config.clone())
            .collect()
    }

    pub fn has(&self, kernel_name: &str, backend_name: &str) -> bool {
        let kernels = self.kernels.read().expect("kernel registry poisoned");
        kernels.contains_key(&(kernel_name.to_string(), backend_name.to_string()))
    }

    /// Setup hooks for `backend_name` that have not fired yet; marks them
    /// fired.
    pub(crate) fn take_pending_setups(&self, backend_name: &str) -> Vec<BackendHook> {
        let mut kernels = self.kernels.write().expect("kernel registry poisoned");
        let mut hooks = Vec::new();
        for entry in kernels.values_mut() {
            if entry.config.backend_name == backend_name && !entry.setup_done {
                if let Some(hook) = &entry.config.setup_func {
                    hooks.push(Arc::clone(hook));
                }
                entry.setup_done = true;
            }
        }
        hooks
    }

    /// Dispose hooks for `backend_name` whose setup has fired; resets the
    /// flag so a re-activated backend runs setup again.
    pub(crate) fn take_active_disposes(&self, backend_name: &str) -> Vec<BackendHook> {
        let mut kernels = self.kernels.write().expect("kernel registry poisoned");
        let mut hooks = Vec::new();
        for entry in kernels.values_mut() {
            if entry.config.backend_name == backend_name && entry.setup_done {
                if let Some(hook) = &entry.config.dispose_func {
                    hooks.push(Arc::clone(hook));
                }
                entry.setup_done = false;
            }
        }
        hooks
    }
}

/// Per-node context handed to a gradient function during backward replay.
pub struct GradContext<'a> {
    pub engine: &'a Engine,
    /// Output gradients, one per forward output, in output order. Never
    /// empty: the engine seeds missing entries with zeros.
    pub dys: &'a [Tensor],
    /// Tensors the forward pass saved for this node, in save-list order.
    pub saved: &'a [Tensor],
    pub attrs: &'a KernelAttrs,
}

impl<'a> GradContext<'a> {
    /// The gradient flowing into the node's sole output.
    pub fn dy(&self) -> &'a Tensor {
        &self.dys[0]
    }
}

/// Lazily-evaluated gradient for one input. Thunks for inputs pruned from
/// the tape are never invoked.
pub type GradientThunk<'a> = Box<dyn FnOnce() -> anyhow::Result<Tensor> + 'a>;

/// Mapping from input name to the thunk producing its gradient.
#[derive(Default)]
pub struct NamedGradientMap<'a> {
    entries: Vec<(String, GradientThunk<'a>)>,
}

impl<'a> NamedGradientMap<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<F>(mut self, name: impl Into<String>, thunk: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Tensor> + 'a,
    {
        self.entries.push((name.into(), Box::new(thunk)));
        self
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<GradientThunk<'a>> {
        let idx = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(idx).1)
    }
}

/// Gradient function: given the replay context, produces per-input thunks.
pub type GradFunc =
    Arc<dyn for<'a> Fn(GradContext<'a>) -> anyhow::Result<NamedGradientMap<'a>> + Send + Sync>;

/// One gradient registration, at most one per kernel name.
#[derive(Clone)]
pub struct GradientConfig {
    pub kernel_name: String,
    /// Forward inputs the gradient function needs, by name. Saved tensors are
    /// pinned by the tape so user-side disposal cannot free them early.
    pub inputs_to_save: Vec<&'static str>,
    /// Per-output flags selecting forward outputs to save, appended after the
    /// saved inputs.
    pub outputs_to_save: Vec<bool>,
    pub grad_func: GradFunc,
}

impl GradientConfig {
    pub fn new(kernel_name: impl Into<String>, grad_func: GradFunc) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            inputs_to_save: Vec::new(),
            outputs_to_save: Vec::new(),
            grad_func,
        }
    }

    pub fn save_inputs(mut self, names: &[&'static str]) -> Self {
        self.inputs_to_save = names.to_vec();
        self
    }

    pub fn save_outputs(mut self, flags: &[bool]) -> Self {
        self.outputs_to_save = flags.to_vec();
        self
    }
}

/// Process-wide mapping from kernel name to its gradient function.
#[derive(Default)]
pub struct GradientRegistry {
    gradients: RwLock<HashMap<String, Arc<GradientConfig>>>,
}

impl GradientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a registration. Re-registration overwrites the previous
    /// gradient with a warning; it is never an error.
    pub fn register(&self, config: GradientConfig) {
        let mut gradients = self.gradients.write().expect("gradient registry poisoned");
        let name = config.kernel_name.clone();
        if gradients.insert(name.clone(), Arc::new(config)).is_some() {
            log::warn!("overriding the gradient for kernel '{name}'");
        }
    }

    pub fn get(&self, kernel_name: &str) -> Option<Arc<GradientConfig>> {
        let gradients = self.gradients.read().expect("gradient registry poisoned");
        gradients.get(kernel_name).cloned()
    }

    /// Removes a registration; missing names are a silent no-op.
    pub fn unregister(&self, kernel_name: &str) {
        let mut gradients = self.gradients.write().expect("gradient registry poisoned");
        gradients.remove(kernel_name);
    }
}
