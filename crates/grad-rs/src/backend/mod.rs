//! Backend abstraction: the storage/execution capability contract and the
//! factory types used to register backends with the engine.

mod spec;

pub use spec::{
    AsyncBackendFactory, BackendFactory, BackendFuture, BackendMemoryInfo, KernelBackend,
    SyncBackendFactory,
};
