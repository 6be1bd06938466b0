//! Tensor handles: shape/dtype metadata decoupled from backend storage.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::tensor::{DType, Shape};

static NEXT_DATA_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque key identifying one piece of backend-owned storage.
///
/// Several tensor handles may share one `DataId` (e.g. reshapes alias their
/// input); the engine reference-counts the storage behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(u64);

impl DataId {
    /// Allocates a process-unique storage id.
    pub fn fresh() -> Self {
        DataId(NEXT_DATA_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// Unique id of a single tensor handle, distinct from its storage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    pub(crate) fn fresh() -> Self {
        TensorId(NEXT_TENSOR_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// The storage-level description a kernel returns for each of its outputs.
///
/// Kernels allocate (or alias) backend storage and hand the engine one of
/// these per output; the engine wraps them into tracked [`Tensor`] handles.
#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub data_id: DataId,
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorInfo {
    pub fn new(data_id: DataId, shape: Shape, dtype: DType) -> Self {
        Self {
            data_id,
            shape,
            dtype,
        }
    }
}

/// User-facing tensor handle.
///
/// Handles are cheap to clone and carry no liveness of their own: disposal is
/// explicit through the engine, and a disposed handle fails loudly on use.
#[derive(Debug, Clone)]
pub struct Tensor {
    id: TensorId,
    data_id: DataId,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    pub(crate) fn from_info(info: TensorInfo) -> Self {
        Tensor {
            id: TensorId::fresh(),
            data_id: info.data_id,
            shape: info.shape,
            dtype: info.dtype,
        }
    }

    /// Unique id of this handle.
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Storage key of the backing buffer.
    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements, derived from the shape.
    pub fn size(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Storage-level view of this handle.
    pub fn info(&self) -> TensorInfo {
        TensorInfo::new(self.data_id, self.shape.clone(), self.dtype)
    }
}
