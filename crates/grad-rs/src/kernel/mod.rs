//! Kernel and gradient registration surfaces.

mod attrs;
pub mod names;
mod registry;

pub use attrs::{AttrValue, KernelAttrs};
pub use registry::{
    BackendHook, GradContext, GradFunc, GradientConfig, GradientRegistry, GradientThunk,
    KernelConfig, KernelFunc, KernelParams, KernelRegistry, NamedGradientMap,
};
