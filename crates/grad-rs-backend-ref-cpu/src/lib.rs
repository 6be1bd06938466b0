//! Reference CPU backend for grad-rs.

mod cpu;
mod kernels;

pub use cpu::CpuBackend;

use std::sync::Arc;

use grad_rs::engine::Engine;
use grad_rs::error::KernelError;
use grad_rs::kernel::{names, KernelConfig};
use grad_rs::KernelBackend;

/// Priority under which the CPU backend registers; device backends should
/// register higher.
pub const CPU_PRIORITY: i32 = 100;

/// Registers the CPU backend factory and its kernels with `engine`, under the
/// name `"cpu"`. Gradients are backend-agnostic and register separately via
/// `grad_rs::gradients::register_all`.
pub fn register_cpu_backend(engine: &Engine) -> Result<(), KernelError> {
    engine.register_backend(
        "cpu",
        || Ok(Box::new(CpuBackend::new()) as Box<dyn KernelBackend>),
        CPU_PRIORITY,
    );
    register_kernels(engine, "cpu")
}

/// Registers the CPU kernel set under an arbitrary backend name. Useful for
/// alias backends that reuse the host implementations.
pub fn register_kernels(engine: &Engine, backend_name: &str) -> Result<(), KernelError> {
    let entries: &[(&str, grad_rs::kernel::KernelFunc)] = &[
        (names::IDENTITY, Arc::new(kernels::identity_kernel)),
        (names::CAST, Arc::new(kernels::cast_kernel)),
        (names::FILL, Arc::new(kernels::fill_kernel)),
        (names::ZEROS_LIKE, Arc::new(kernels::zeros_like_kernel)),
        (names::ONES_LIKE, Arc::new(kernels::ones_like_kernel)),
        (names::ADD, Arc::new(kernels::add_kernel)),
        (names::SUB, Arc::new(kernels::sub_kernel)),
        (names::MULTIPLY, Arc::new(kernels::multiply_kernel)),
        (names::REAL_DIV, Arc::new(kernels::div_kernel)),
        (names::NEG, Arc::new(kernels::neg_kernel)),
        (names::SQUARE, Arc::new(kernels::square_kernel)),
        (names::SQRT, Arc::new(kernels::sqrt_kernel)),
        (names::EXP, Arc::new(kernels::exp_kernel)),
        (names::LOG, Arc::new(kernels::log_kernel)),
        (names::RELU, Arc::new(kernels::relu_kernel)),
        (names::ABS, Arc::new(kernels::abs_kernel)),
        (names::STEP, Arc::new(kernels::step_kernel)),
        (names::SIGN, Arc::new(kernels::sign_kernel)),
        (names::SUM, Arc::new(kernels::sum_kernel)),
        (names::MEAN, Arc::new(kernels::mean_kernel)),
        (names::MAT_MUL, Arc::new(kernels::matmul_kernel)),
        (names::TRANSPOSE, Arc::new(kernels::transpose_kernel)),
        (names::RESHAPE, Arc::new(kernels::reshape_kernel)),
    ];
    for (kernel_name, kernel_func) in entries {
        engine.register_kernel(KernelConfig::new(
            *kernel_name,
            backend_name,
            Arc::clone(kernel_func),
        ))?;
    }
    Ok(())
}
