//! Full reductions to a scalar.

use anyhow::Result;

use crate::engine::Engine;
use crate::kernel::{names, KernelAttrs};
use crate::tensor::{NamedTensors, Tensor};

use super::{ensure_float, ensure_numeric, single};

/// Sum of all elements. Output dtype matches the input.
pub fn sum(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_numeric("sum", x)?;
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::SUM,
        engine.run_kernel(names::SUM, inputs, KernelAttrs::new())?,
    )
}

/// Arithmetic mean of all elements. Float only.
pub fn mean(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    ensure_float("mean", x)?;
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::MEAN,
        engine.run_kernel(names::MEAN, inputs, KernelAttrs::new())?,
    )
}
