//! Capability contract every execution backend must satisfy.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{BackendInitError, BackendResult};
use crate::tensor::{DType, DataId, Shape, TensorValues};

/// Memory diagnostics a backend can contribute to [`crate::engine::MemoryInfo`].
#[derive(Debug, Clone, Default)]
pub struct BackendMemoryInfo {
    /// Set when the backend cannot account for its storage exactly.
    pub unreliable: bool,
    /// Human-readable explanations for the `unreliable` flag.
    pub reasons: Vec<String>,
}

/// Storage and execution capabilities of a pluggable backend.
///
/// The engine owns all reference counting; a backend may assume
/// `dispose_data` is called exactly once per id, when the count reaches zero.
/// Kernels reach concrete backend state by downcasting through [`Self::as_any`].
pub trait KernelBackend: Send + Sync {
    /// Human-readable backend identifier (e.g. `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Creates storage for `data_id` from host values. The id is allocated by
    /// the engine and is unique per call.
    fn write(
        &self,
        data_id: DataId,
        values: TensorValues,
        shape: &Shape,
        dtype: DType,
    ) -> BackendResult<()>;

    /// Adopts storage for an existing id whose payload was moved from another
    /// backend. Shape and dtype describe the moved tensor.
    fn move_in(
        &self,
        data_id: DataId,
        values: TensorValues,
        shape: &Shape,
        dtype: DType,
    ) -> BackendResult<()> {
        self.write(data_id, values, shape, dtype)
    }

    /// Reads storage back to the host synchronously.
    ///
    /// Backends whose storage is only asynchronously readable must fail fast
    /// with [`crate::error::BackendError::SyncReadUnsupported`] instead of
    /// blocking.
    fn read_sync(&self, data_id: DataId) -> BackendResult<TensorValues>;

    /// Reads storage back to the host asynchronously. The default routes
    /// through `read_sync`.
    fn read(&self, data_id: DataId) -> BoxFuture<'static, BackendResult<TensorValues>> {
        let result = self.read_sync(data_id);
        Box::pin(futures::future::ready(result))
    }

    /// Whether [`Self::read_sync`] is usable on this backend.
    fn supports_sync_read(&self) -> bool {
        true
    }

    /// Releases the storage behind one id. The engine guarantees a single
    /// call per id, at reference count zero.
    fn dispose_data(&self, data_id: DataId);

    /// Count of live storage entries; used for leak detection.
    fn num_data_ids(&self) -> usize;

    /// Backend-specific memory diagnostics.
    fn memory(&self) -> BackendMemoryInfo {
        BackendMemoryInfo::default()
    }

    /// Releases every resource owned by this backend instance. Called when
    /// the backend is removed or the engine is reset.
    fn dispose(&self);

    /// Downcast hook for kernels that need the concrete backend type.
    fn as_any(&self) -> &dyn Any;
}

/// Future returned by an asynchronous backend factory.
pub type BackendFuture = BoxFuture<'static, Result<Box<dyn KernelBackend>, BackendInitError>>;

/// Synchronous backend constructor.
pub type SyncBackendFactory =
    Arc<dyn Fn() -> Result<Box<dyn KernelBackend>, BackendInitError> + Send + Sync>;

/// Asynchronous backend constructor (hardware probing, module loading, ...).
pub type AsyncBackendFactory = Arc<dyn Fn() -> BackendFuture + Send + Sync>;

/// A registered factory, either form.
#[derive(Clone)]
pub enum BackendFactory {
    Sync(SyncBackendFactory),
    Async(AsyncBackendFactory),
}

impl BackendFactory {
    /// Whether resolving this factory requires awaiting.
    pub fn is_async(&self) -> bool {
        matches!(self, BackendFactory::Async(_))
    }
}
