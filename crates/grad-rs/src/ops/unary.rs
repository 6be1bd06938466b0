//! Elementwise unary ops.

use anyhow::Result;

use crate::engine::Engine;
use crate::kernel::{names, KernelAttrs};
use crate::tensor::{NamedTensors, Tensor};

use super::{ensure_float, ensure_numeric, single};

fn run_unary(engine: &Engine, kernel: &'static str, x: &Tensor) -> Result<Tensor> {
    let inputs = NamedTensors::new().with("x", x);
    single(kernel, engine.run_kernel(kernel, inputs, KernelAttrs::new())?)
}

/// `-x`.
pub fn neg(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_numeric("neg", x)?;
    run_unary(engine, names::NEG, x)
}

/// `x * x`.
pub fn square(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_numeric("square", x)?;
    run_unary(engine, names::SQUARE, x)
}

/// Elementwise square root.
pub fn sqrt(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("sqrt", x)?;
    run_unary(engine, names::SQRT, x)
}

/// Elementwise natural exponential.
pub fn exp(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("exp", x)?;
    run_unary(engine, names::EXP, x)
}

/// Elementwise natural logarithm.
pub fn log(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("log", x)?;
    run_unary(engine, names::LOG, x)
}

/// `max(x, 0)`.
pub fn relu(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("relu", x)?;
    run_unary(engine, names::RELU, x)
}

/// `|x|`.
pub fn abs(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_numeric("abs", x)?;
    run_unary(engine, names::ABS, x)
}

/// `1` where `x > 0`, else `0`.
pub fn step(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("step", x)?;
    run_unary(engine, names::STEP, x)
}

/// `-1`, `0`, or `1` by the sign of `x`.
pub fn sign(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("sign", x)?;
    run_unary(engine, names::SIGN, x)
}
