//! Typed errors for the engine, registries, and backend contract.

use thiserror::Error;

use crate::tensor::{DType, DataId, TensorId};

/// Kernel registry contract violations.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel '{kernel}' is not registered for backend '{backend}'")]
    NotFound { kernel: String, backend: String },
    #[error("kernel '{kernel}' is already registered for backend '{backend}'")]
    Duplicate { kernel: String, backend: String },
}

/// Failures raised while recording or replaying the gradient tape.
#[derive(Debug, Error)]
pub enum GradientError {
    #[error("gradient function not found for kernel '{kernel}'")]
    NotFound { kernel: String },
    #[error(
        "cannot compute gradient of y=f(x) with respect to x: \
         no operation on the tape connects the inputs to the output"
    )]
    Disconnected,
    #[error("gradient for input '{input}' of kernel '{kernel}' was not produced")]
    MissingInputGradient { kernel: String, input: String },
    #[error("gradients must have float32 dtype, kernel '{kernel}' produced {got:?}")]
    NonFloatGradient { kernel: String, got: DType },
}

/// Use of a tensor handle after it has been disposed, or a double dispose.
#[derive(Debug, Error)]
#[error("tensor handle {id:?} has already been disposed")]
pub struct TensorDisposedError {
    pub id: TensorId,
}

/// Backend registration or factory failures.
#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("backend '{name}' not found in registry")]
    UnknownBackend { name: String },
    #[error("initialization of backend '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
    #[error("backend '{name}' requires asynchronous initialization; await Engine::ready first")]
    AsyncInitRequired { name: String },
    #[error("could not initialize any backend, all registered factories failed")]
    NoBackend,
    #[error("no backend is active and no backend factory has been registered")]
    NoneRegistered,
}

/// Op-level shape validation failure, raised before any kernel runs.
#[derive(Debug, Error)]
#[error("{op}: {detail}")]
pub struct ShapeError {
    pub op: &'static str,
    pub detail: String,
}

impl ShapeError {
    pub fn new(op: &'static str, detail: impl Into<String>) -> Self {
        Self {
            op,
            detail: detail.into(),
        }
    }
}

/// Op-level dtype validation failure, raised before any kernel runs.
#[derive(Debug, Error)]
#[error("{op}: {detail}")]
pub struct DtypeError {
    pub op: &'static str,
    pub detail: String,
}

impl DtypeError {
    pub fn new(op: &'static str, detail: impl Into<String>) -> Self {
        Self {
            op,
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by backend storage and kernel execution.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no storage registered for data id {0:?}")]
    UnknownData(DataId),
    #[error("synchronous read is not supported by backend '{backend}'")]
    SyncReadUnsupported { backend: String },
    #[error("kernel '{kernel}' expects input '{input}'")]
    MissingInput { kernel: String, input: String },
    #[error("kernel attribute '{attr}' is missing or has the wrong type")]
    BadAttr { attr: String },
    #[error("backend execution failure: {0}")]
    Execution(String),
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution(message.into())
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;
