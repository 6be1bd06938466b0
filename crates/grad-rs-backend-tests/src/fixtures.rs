//! Test-only backends and factories.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use grad_rs::backend::{BackendFuture, KernelBackend};
use grad_rs::error::{BackendError, BackendInitError, BackendResult};
use grad_rs::tensor::{DType, DataId, Shape, TensorValues};

/// Minimal host-storage backend with a configurable name. Serves as the
/// second backend in switch/routing tests.
pub struct ScratchBackend {
    name: String,
    storage: Mutex<HashMap<DataId, TensorValues>>,
}

impl ScratchBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: Mutex::new(HashMap::new()),
        }
    }

    pub fn values(&self, data_id: DataId) -> BackendResult<TensorValues> {
        self.storage
            .lock()
            .expect("scratch storage mutex poisoned")
            .get(&data_id)
            .cloned()
            .ok_or(BackendError::UnknownData(data_id))
    }

    pub fn insert(&self, data_id: DataId, values: TensorValues) {
        self.storage
            .lock()
            .expect("scratch storage mutex poisoned")
            .insert(data_id, values);
    }
}

impl KernelBackend for ScratchBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn write(
        &self,
        data_id: DataId,
        values: TensorValues,
        _shape: &Shape,
        _dtype: DType,
    ) -> BackendResult<()> {
        self.insert(data_id, values);
        Ok(())
    }

    fn read_sync(&self, data_id: DataId) -> BackendResult<TensorValues> {
        self.values(data_id)
    }

    fn dispose_data(&self, data_id: DataId) {
        self.storage
            .lock()
            .expect("scratch storage mutex poisoned")
            .remove(&data_id);
    }

    fn num_data_ids(&self) -> usize {
        self.storage
            .lock()
            .expect("scratch storage mutex poisoned")
            .len()
    }

    fn dispose(&self) {
        self.storage
            .lock()
            .expect("scratch storage mutex poisoned")
            .clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host-storage backend whose data is only asynchronously readable, for
/// exercising the sync-read capability gate.
pub struct AsyncOnlyBackend {
    inner: ScratchBackend,
}

impl AsyncOnlyBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: ScratchBackend::new(name),
        }
    }
}

impl KernelBackend for AsyncOnlyBackend {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn write(
        &self,
        data_id: DataId,
        values: TensorValues,
        shape: &Shape,
        dtype: DType,
    ) -> BackendResult<()> {
        self.inner.write(data_id, values, shape, dtype)
    }

    fn read_sync(&self, data_id: DataId) -> BackendResult<TensorValues> {
        let _ = data_id;
        Err(BackendError::SyncReadUnsupported {
            backend: self.backend_name().to_string(),
        })
    }

    fn read(&self, data_id: DataId) -> BoxFuture<'static, BackendResult<TensorValues>> {
        let result = self.inner.values(data_id);
        Box::pin(futures::future::ready(result))
    }

    fn supports_sync_read(&self) -> bool {
        false
    }

    fn dispose_data(&self, data_id: DataId) {
        self.inner.dispose_data(data_id);
    }

    fn num_data_ids(&self) -> usize {
        self.inner.num_data_ids()
    }

    fn dispose(&self) {
        KernelBackend::dispose(&self.inner);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An async factory resolving to a [`ScratchBackend`], counting invocations.
pub fn async_scratch_factory(
    name: &str,
    invocations: Arc<AtomicUsize>,
) -> impl Fn() -> BackendFuture + Send + Sync + 'static {
    let name = name.to_string();
    move || {
        invocations.fetch_add(1, Ordering::SeqCst);
        let name = name.clone();
        Box::pin(async move {
            Ok(Box::new(ScratchBackend::new(name)) as Box<dyn KernelBackend>)
        })
    }
}

/// An async factory that always fails to initialize.
pub fn failing_async_factory(name: &str) -> impl Fn() -> BackendFuture + Send + Sync + 'static {
    let name = name.to_string();
    move || {
        let name = name.clone();
        Box::pin(async move {
            Err::<Box<dyn KernelBackend>, _>(BackendInitError::Failed {
                name,
                reason: "probe rejected".to_string(),
            })
        })
    }
}
