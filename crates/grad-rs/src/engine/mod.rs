//! The engine: kernel dispatch, gradient-tape recording, and tensor
//! lifecycle management.
//!
//! The engine is the only component that touches backend storage. Ops call
//! [`Engine::run_kernel`]; the engine resolves the kernel for the active
//! backend, executes it, reference-counts the resulting storage, tracks the
//! new handles in the innermost scope, and — while a tape is recording —
//! appends a tape entry for the backward pass.

mod autograd;
mod backends;
mod scope;
mod tape;
mod variables;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::Result;

use crate::backend::KernelBackend;
use crate::error::{GradientError, KernelError, TensorDisposedError};
use crate::kernel::{
    GradientConfig, GradientRegistry, KernelAttrs, KernelConfig, KernelParams, KernelRegistry,
};
use crate::tensor::{
    DType, DataId, NamedTensors, Shape, Tensor, TensorId, TensorInfo, TensorValues,
};

pub use autograd::{CustomGradResult, ValueAndGrads};
pub use variables::Variable;

use backends::BackendsState;
use tape::{Tape, TapeGrad, TapeNode};

/// Process-wide memory diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryInfo {
    /// Live tensor handles.
    pub num_tensors: usize,
    /// Live storage buffers (several handles may share one buffer).
    pub num_data_buffers: usize,
    /// Bytes attributed to live buffers.
    pub num_bytes: usize,
    /// Set when byte accounting is approximate (e.g. string tensors).
    pub unreliable: bool,
    pub reasons: Vec<String>,
}

struct StorageInfo {
    backend: Arc<dyn KernelBackend>,
    bytes: usize,
    ref_count: usize,
}

struct HandleState {
    data_id: DataId,
    dtype: DType,
    kept: bool,
    scope_id: Option<u64>,
}

struct ScopeState {
    id: u64,
    track: Vec<TensorId>,
}

#[derive(Default)]
struct EngineState {
    num_tensors: usize,
    num_string_tensors: usize,
    num_data_buffers: usize,
    num_bytes: usize,
    storage: HashMap<DataId, StorageInfo>,
    handles: HashMap<TensorId, HandleState>,
    scope_stack: Vec<ScopeState>,
    next_scope_id: u64,
    next_tape_node_id: u64,
    /// Stack of recording contexts; kernels record onto the innermost one.
    tapes: Vec<Tape>,
    /// Nodes from fully-popped tapes whose saved tensors still await the
    /// end-of-backward cleanup.
    finished_tape: Vec<TapeNode>,
    /// Depth of nested kernel execution; recording is suppressed inside a
    /// running kernel.
    kernel_depth: usize,
    variables: HashMap<String, variables::VariableRecord>,
}

/// The autodiff engine. One per process in normal use (see [`engine`]), but
/// freely constructible so tests can run against isolated runtimes.
pub struct Engine {
    kernels: KernelRegistry,
    gradients: GradientRegistry,
    backends: Mutex<BackendsState>,
    state: Mutex<EngineState>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements `kernel_depth` when a kernel body finishes, even on unwind.
struct KernelDepthGuard<'a>(&'a Engine);

impl Drop for KernelDepthGuard<'_> {
    fn drop(&mut self) {
        self.0.state().kernel_depth -= 1;
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            kernels: KernelRegistry::new(),
            gradients: GradientRegistry::new(),
            backends: Mutex::new(BackendsState::default()),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- registration surfaces -------------------------------------------

    /// Registers a kernel. If the kernel's backend is already live, the
    /// setup hook fires immediately.
    pub fn register_kernel(&self, config: KernelConfig) -> Result<(), KernelError> {
        let backend_name = config.backend_name.clone();
        self.kernels.register(config)?;
        if let Some(instance) = self.initialized_backend(&backend_name) {
            for hook in self.kernels.take_pending_setups(&backend_name) {
                hook(instance.as_ref());
            }
        }
        Ok(())
    }

    /// Removes a kernel registration; absent keys are a silent no-op. The
    /// dispose hook fires if the kernel's backend is live and setup had run.
    pub fn unregister_kernel(&self, kernel_name: &str, backend_name: &str) {
        if let Some((config, setup_done)) = self.kernels.unregister(kernel_name, backend_name) {
            if setup_done {
                if let (Some(hook), Some(instance)) =
                    (config.dispose_func, self.initialized_backend(backend_name))
                {
                    hook(instance.as_ref());
                }
            }
        }
    }

    pub fn has_kernel(&self, kernel_name: &str, backend_name: &str) -> bool {
        self.kernels.has(kernel_name, backend_name)
    }

    /// The kernel registry, e.g. for cloning one backend's kernel set onto an
    /// alias backend.
    pub fn kernel_registry(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn register_gradient(&self, config: GradientConfig) {
        self.gradients.register(config);
    }

    /// Removes a gradient registration; absent names are a silent no-op.
    pub fn unregister_gradient(&self, kernel_name: &str) {
        self.gradients.unregister(kernel_name);
    }

    pub(crate) fn gradient_registry(&self) -> &GradientRegistry {
        &self.gradients
    }

    // ---- tensor creation and reads ---------------------------------------

    /// Creates a tensor on the active backend from host values.
    pub fn make_tensor(
        &self,
        values: impl Into<TensorValues>,
        shape: Shape,
    ) -> Result<Tensor> {
        let values = values.into();
        let dtype = values.dtype();
        if values.num_elements() != shape.num_elements() {
            return Err(crate::error::ShapeError::new(
                "make_tensor",
                format!(
                    "payload has {} elements but shape {:?} implies {}",
                    values.num_elements(),
                    shape.dims(),
                    shape.num_elements()
                ),
            )
            .into());
        }
        let (_, backend) = self.active_backend()?;
        let bytes = values.byte_len();
        let data_id = DataId::fresh();
        backend.write(data_id, values, &shape, dtype)?;
        let info = TensorInfo::new(data_id, shape, dtype);
        let mut st = self.state();
        Ok(Self::register_tensor_locked(
            &mut st,
            info,
            &backend,
            Some(bytes),
        ))
    }

    /// Scalar convenience constructor.
    pub fn make_scalar(&self, value: f32) -> Result<Tensor> {
        self.make_tensor(vec![value], Shape::scalar())
    }

    /// Reads a tensor's values synchronously, routing to the backend that
    /// owns its storage. Fails fast on backends without sync reads.
    pub fn read_sync(&self, tensor: &Tensor) -> Result<TensorValues> {
        let backend = self.storage_backend(tensor)?;
        if !backend.supports_sync_read() {
            return Err(crate::error::BackendError::SyncReadUnsupported {
                backend: backend.backend_name().to_string(),
            }
            .into());
        }
        Ok(backend.read_sync(tensor.data_id())?)
    }

    /// Reads a tensor's values asynchronously.
    pub async fn read(&self, tensor: &Tensor) -> Result<TensorValues> {
        let backend = self.storage_backend(tensor)?;
        Ok(backend.read(tensor.data_id()).await?)
    }

    fn storage_backend(&self, tensor: &Tensor) -> Result<Arc<dyn KernelBackend>> {
        let st = self.state();
        if !st.handles.contains_key(&tensor.id()) {
            return Err(TensorDisposedError { id: tensor.id() }.into());
        }
        let info = st
            .storage
            .get(&tensor.data_id())
            .ok_or(crate::error::BackendError::UnknownData(tensor.data_id()))?;
        Ok(Arc::clone(&info.backend))
    }

    // ---- kernel dispatch -------------------------------------------------

    /// Executes the named kernel on the active backend.
    ///
    /// While a tape is recording, the invocation is appended to it with the
    /// save set declared by the kernel's registered gradient.
    pub fn run_kernel(
        &self,
        kernel_name: &str,
        inputs: NamedTensors,
        attrs: KernelAttrs,
    ) -> Result<Vec<Tensor>> {
        self.run_kernel_inner(kernel_name, inputs, attrs, None)
    }

    /// Like [`Engine::run_kernel`], with an explicit list of inputs to
    /// preserve for the gradient, overriding the registered save set.
    pub fn run_kernel_saving(
        &self,
        kernel_name: &str,
        inputs: NamedTensors,
        attrs: KernelAttrs,
        inputs_to_save: &[&str],
    ) -> Result<Vec<Tensor>> {
        self.run_kernel_inner(kernel_name, inputs, attrs, Some(inputs_to_save))
    }

    fn run_kernel_inner(
        &self,
        kernel_name: &str,
        inputs: NamedTensors,
        attrs: KernelAttrs,
        inputs_to_save: Option<&[&str]>,
    ) -> Result<Vec<Tensor>> {
        let (backend_name, backend) = self.active_backend()?;
        let kernel_func =
            self.kernels
                .get(kernel_name, &backend_name)
                .ok_or_else(|| KernelError::NotFound {
                    kernel: kernel_name.to_string(),
                    backend: backend_name.clone(),
                })?;

        self.ensure_inputs_live(&inputs)?;
        self.move_inputs_to_active(&backend, &inputs)?;

        let tape_on = {
            let mut st = self.state();
            let on = !st.tapes.is_empty() && st.kernel_depth == 0;
            st.kernel_depth += 1;
            on
        };
        let infos = {
            let _depth = KernelDepthGuard(self);
            kernel_func(KernelParams {
                inputs: &inputs,
                attrs: &attrs,
                backend: backend.as_ref(),
            })?
        };

        let outputs: Vec<Tensor> = {
            let mut st = self.state();
            infos
                .into_iter()
                .map(|info| Self::register_tensor_locked(&mut st, info, &backend, None))
                .collect()
        };

        if tape_on {
            let grad_config = self.gradients.get(kernel_name);
            let mut saved = Vec::new();
            match inputs_to_save {
                Some(names) => {
                    for name in names {
                        if let Some(input) = inputs.get(name) {
                            saved.push(self.clone_for_tape(input, &backend));
                        }
                    }
                }
                None => {
                    if let Some(config) = &grad_config {
                        for name in &config.inputs_to_save {
                            if let Some(input) = inputs.get(name) {
                                saved.push(self.clone_for_tape(input, &backend));
                            }
                        }
                        for (index, save) in config.outputs_to_save.iter().enumerate() {
                            if *save {
                                if let Some(output) = outputs.get(index) {
                                    saved.push(self.clone_for_tape(output, &backend));
                                }
                            }
                        }
                    }
                }
            }

            let grad = match grad_config {
                Some(config) => TapeGrad::Config(config),
                None => TapeGrad::Registry,
            };
            self.record_node(kernel_name.to_string(), inputs, outputs.clone(), saved, attrs, grad);
        }

        Ok(outputs)
    }

    fn ensure_inputs_live(&self, inputs: &NamedTensors) -> Result<()> {
        let st = self.state();
        for (_, input) in inputs.iter() {
            if !st.handles.contains_key(&input.id()) {
                return Err(TensorDisposedError { id: input.id() }.into());
            }
        }
        Ok(())
    }

    /// Moves any input whose storage lives on another backend into the
    /// active one (sync readback, adopt, free on the source).
    fn move_inputs_to_active(
        &self,
        active: &Arc<dyn KernelBackend>,
        inputs: &NamedTensors,
    ) -> Result<()> {
        let mut moves: Vec<(DataId, Arc<dyn KernelBackend>, Shape, DType)> = Vec::new();
        {
            let st = self.state();
            let mut seen = std::collections::HashSet::new();
            for (_, input) in inputs.iter() {
                if !seen.insert(input.data_id()) {
                    continue;
                }
                if let Some(info) = st.storage.get(&input.data_id()) {
                    if !Arc::ptr_eq(&info.backend, active) {
                        moves.push((
                            input.data_id(),
                            Arc::clone(&info.backend),
                            input.shape().clone(),
                            input.dtype(),
                        ));
                    }
                }
            }
        }
        for (data_id, source, shape, dtype) in moves {
            let values = source.read_sync(data_id)?;
            active.move_in(data_id, values, &shape, dtype)?;
            source.dispose_data(data_id);
            if let Some(info) = self.state().storage.get_mut(&data_id) {
                info.backend = Arc::clone(active);
            }
        }
        Ok(())
    }

    /// Wraps a kernel output into a tracked handle: bumps the storage
    /// refcount (or creates the entry), updates counters, and tracks the
    /// handle in the innermost scope.
    fn register_tensor_locked(
        st: &mut EngineState,
        info: TensorInfo,
        backend: &Arc<dyn KernelBackend>,
        bytes_override: Option<usize>,
    ) -> Tensor {
        let dtype = info.dtype;
        let size = info.shape.num_elements();
        st.num_tensors += 1;
        if dtype == DType::Str {
            st.num_string_tensors += 1;
        }
        match st.storage.entry(info.data_id) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().ref_count += 1;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let bytes = bytes_override
                    .or_else(|| dtype.bytes_per_element().map(|b| b * size))
                    .unwrap_or(0);
                entry.insert(StorageInfo {
                    backend: Arc::clone(backend),
                    bytes,
                    ref_count: 1,
                });
                st.num_data_buffers += 1;
                st.num_bytes += bytes;
            }
        }
        let tensor = Tensor::from_info(info);
        let scope_id = st.scope_stack.last().map(|scope| scope.id);
        st.handles.insert(
            tensor.id(),
            HandleState {
                data_id: tensor.data_id(),
                dtype,
                kept: false,
                scope_id,
            },
        );
        if let Some(scope) = st.scope_stack.last_mut() {
            scope.track.push(tensor.id());
        }
        tensor
    }

    /// Clones a tensor for the tape: a new kept handle over the same storage,
    /// plus an identity tape entry so higher-order gradients flow through.
    fn clone_for_tape(&self, tensor: &Tensor, backend: &Arc<dyn KernelBackend>) -> Tensor {
        let clone = {
            let mut st = self.state();
            let clone = Self::register_tensor_locked(&mut st, tensor.info(), backend, None);
            if let Some(handle) = st.handles.get_mut(&clone.id()) {
                handle.kept = true;
            }
            clone
        };
        self.record_node(
            crate::kernel::names::IDENTITY.to_string(),
            NamedTensors::new().with("x", tensor),
            vec![clone.clone()],
            Vec::new(),
            KernelAttrs::new(),
            TapeGrad::Identity,
        );
        clone
    }

    fn record_node(
        &self,
        kernel_name: String,
        inputs: NamedTensors,
        outputs: Vec<Tensor>,
        saved: Vec<Tensor>,
        attrs: KernelAttrs,
        grad: TapeGrad,
    ) {
        let mut st = self.state();
        let id = st.next_tape_node_id;
        st.next_tape_node_id += 1;
        if let Some(tape) = st.tapes.last_mut() {
            tape.nodes.push(TapeNode {
                id,
                kernel_name,
                inputs,
                outputs,
                saved,
                attrs,
                grad,
            });
        }
    }

    // ---- disposal and diagnostics ----------------------------------------

    /// Disposes a tensor handle: the storage refcount drops, and the backend
    /// frees the buffer when it reaches zero. Double-dispose fails loudly.
    pub fn dispose(&self, tensor: &Tensor) -> Result<(), TensorDisposedError> {
        let freed = {
            let mut st = self.state();
            if !st.handles.contains_key(&tensor.id()) {
                return Err(TensorDisposedError { id: tensor.id() });
            }
            Self::dispose_handle_locked(&mut st, tensor.id())
        };
        if let Some((backend, data_id)) = freed {
            backend.dispose_data(data_id);
        }
        Ok(())
    }

    /// Removes one handle under the lock; returns the storage to free once
    /// the lock is released, if the refcount reached zero.
    fn dispose_handle_locked(
        st: &mut EngineState,
        id: TensorId,
    ) -> Option<(Arc<dyn KernelBackend>, DataId)> {
        let handle = st.handles.remove(&id)?;
        st.num_tensors -= 1;
        if handle.dtype == DType::Str {
            st.num_string_tensors -= 1;
        }
        let ref_count = st.storage.get(&handle.data_id).map(|info| info.ref_count)?;
        if ref_count <= 1 {
            let info = st.storage.remove(&handle.data_id)?;
            st.num_data_buffers -= 1;
            st.num_bytes -= info.bytes;
            Some((info.backend, handle.data_id))
        } else {
            if let Some(info) = st.storage.get_mut(&handle.data_id) {
                info.ref_count -= 1;
            }
            None
        }
    }

    /// Live-handle count, for leak checks.
    pub fn num_tensors(&self) -> usize {
        self.state().num_tensors
    }

    /// Live-buffer count, for leak checks.
    pub fn num_data_buffers(&self) -> usize {
        self.state().num_data_buffers
    }

    /// Process-wide memory report, merged with the active backend's own
    /// diagnostics. Reflects true state after every dispose.
    pub fn memory(&self) -> MemoryInfo {
        let mut info = {
            let st = self.state();
            MemoryInfo {
                num_tensors: st.num_tensors,
                num_data_buffers: st.num_data_buffers,
                num_bytes: st.num_bytes,
                unreliable: false,
                reasons: Vec::new(),
            }
        };
        if self.state().num_string_tensors > 0 {
            info.unreliable = true;
            info.reasons
                .push("string tensor memory is counted as utf-8 payload bytes".to_string());
        }
        if let Some(backend) = self.active_backend_if_initialized() {
            let backend_info = backend.memory();
            if backend_info.unreliable {
                info.unreliable = true;
                info.reasons.extend(backend_info.reasons);
            }
        }
        info
    }

    /// Restores a pristine engine state: variables and backend instances are
    /// disposed, registered backend factories survive.
    pub fn reset(&self) {
        self.dispose_variables();
        let instances = self.drain_backend_instances();
        for (name, instance) in instances {
            for hook in self.kernels.take_active_disposes(&name) {
                hook(instance.as_ref());
            }
            instance.dispose();
        }
        *self.state() = EngineState::default();
    }

    pub(crate) fn missing_gradient_error(kernel: &str) -> GradientError {
        GradientError::NotFound {
            kernel: kernel.to_string(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.reset();
    }
}

static GLOBAL_ENGINE: OnceLock<Engine> = OnceLock::new();

/// The process-wide engine singleton.
///
/// Libraries registering backends or kernels at startup should target this
/// instance; tests that need isolation construct their own [`Engine`].
pub fn engine() -> &'static Engine {
    GLOBAL_ENGINE.get_or_init(Engine::new)
}
