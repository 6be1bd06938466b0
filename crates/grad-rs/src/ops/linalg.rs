//! Rank-2 linear algebra.

use anyhow::Result;

use crate::engine::Engine;
use crate::error::ShapeError;
use crate::kernel::{names, KernelAttrs};
use crate::tensor::{NamedTensors, Tensor};

use super::{ensure_float, single};

/// `a @ b` for rank-2 operands.
pub fn matmul(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    ensure_float("matmul", a)?;
    ensure_float("matmul", b)?;
    if a.rank() != 2 || b.rank() != 2 {
        return Err(ShapeError::new(
            "matmul",
            format!(
                "rank-2 operands required, got shapes {:?} and {:?}",
                a.shape().dims(),
                b.shape().dims()
            ),
        )
        .into());
    }
    if a.shape().dims()[1] != b.shape().dims()[0] {
        return Err(ShapeError::new(
            "matmul",
            format!(
                "inner dimensions must agree: {:?} vs {:?}",
                a.shape().dims(),
                b.shape().dims()
            ),
        )
        .into());
    }
    let inputs = NamedTensors::new().with("a", a).with("b", b);
    single(
        names::MAT_MUL,
        engine.run_kernel(names::MAT_MUL, inputs, KernelAttrs::new())?,
    )
}

/// Transpose of a rank-2 tensor.
pub fn transpose(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    if x.rank() != 2 {
        return Err(ShapeError::new(
            "transpose",
            format!("rank-2 operand required, got shape {:?}", x.shape().dims()),
        )
        .into());
    }
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::TRANSPOSE,
        engine.run_kernel(names::TRANSPOSE, inputs, KernelAttrs::new())?,
    )
}
