//! Tape-based reverse-mode autodiff engine with name-keyed kernel dispatch
//! and pluggable execution backends.
//!
//! The engine tracks a forward computation on a tape, resolves gradient
//! functions per kernel name, and replays the tape in reverse to accumulate
//! input gradients, while reference-counting tensor storage across whatever
//! backend is active. Backends register a factory plus per-kernel
//! implementations; ops are thin validated wrappers over
//! [`Engine::run_kernel`].

pub mod backend;
pub mod engine;
mod env;
pub mod error;
pub mod gradients;
pub mod kernel;
pub mod ops;
pub mod tensor;

pub use backend::KernelBackend;
pub use engine::{engine, Engine, MemoryInfo, Variable};
pub use tensor::{DType, NamedTensors, Shape, Tensor, TensorInfo, TensorValues};
