//! Host-memory storage backend.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

use grad_rs::backend::{BackendMemoryInfo, KernelBackend};
use grad_rs::error::{BackendError, BackendResult};
use grad_rs::tensor::{DType, DataId, Shape, TensorValues};

/// Reference CPU backend: every buffer is a host [`TensorValues`] keyed by
/// its engine-assigned [`DataId`].
#[derive(Default)]
pub struct CpuBackend {
    storage: Mutex<HashMap<DataId, TensorValues>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones the values behind one storage id.
    pub fn values(&self, data_id: DataId) -> BackendResult<TensorValues> {
        self.storage
            .lock()
            .expect("cpu storage mutex poisoned")
            .get(&data_id)
            .cloned()
            .ok_or(BackendError::UnknownData(data_id))
    }

    /// Inserts freshly computed kernel output storage.
    pub fn insert(&self, data_id: DataId, values: TensorValues) {
        self.storage
            .lock()
            .expect("cpu storage mutex poisoned")
            .insert(data_id, values);
    }
}

impl KernelBackend for CpuBackend {
    fn backend_name(&self) -> &str {
        "cpu"
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
            .expect("cpu storage mutex poisoned")
            .remove(&data_id);
    }

    fn num_data_ids(&self) -> usize {
        self.storage
            .lock()
            .expect("cpu storage mutex poisoned")
            .len()
    }

    fn memory(&self) -> BackendMemoryInfo {
        BackendMemoryInfo::default()
    }

    fn dispose(&self) {
        self.storage
            .lock()
            .expect("cpu storage mutex poisoned")
            .clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
