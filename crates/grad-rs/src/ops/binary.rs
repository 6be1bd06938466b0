//! Elementwise binary ops. Operands must share a shape, or one side may be
//! a scalar broadcast over the other.

use anyhow::Result;

use crate::engine::Engine;
use crate::error::{DtypeError, ShapeError};
use crate::kernel::{names, KernelAttrs};
use crate::tensor::{DType, NamedTensors, Tensor};

use super::{ensure_numeric, single};

fn validate_binary(op: &'static str, a: &Tensor, b: &Tensor) -> Result<()> {
    ensure_numeric(op, a)?;
    ensure_numeric(op, b)?;
    if a.dtype() != b.dtype() {
        return Err(DtypeError::new(
            op,
            format!("operand dtypes differ: {} vs {}", a.dtype(), b.dtype()),
        )
        .into());
    }
    let compatible =
        a.shape() == b.shape() || a.shape().is_scalar() || b.shape().is_scalar();
    if !compatible {
        return Err(ShapeError::new(
            op,
            format!(
                "operand shapes {:?} and {:?} are incompatible (equal shapes or a scalar \
                 operand required)",
                a.shape().dims(),
                b.shape().dims()
            ),
        )
        .into());
    }
    Ok(())
}

fn run_binary(engine: &Engine, kernel: &'static str, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let inputs = NamedTensors::new().with("a", a).with("b", b);
    single(kernel, engine.run_kernel(kernel, inputs, KernelAttrs::new())?)
}

/// `a + b`, elementwise.
pub fn add(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    validate_binary("add", a, b)?;
    run_binary(engine, names::ADD, a, b)
}

/// `a - b`, elementwise.
pub fn sub(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    validate_binary("sub", a, b)?;
    run_binary(engine, names::SUB, a, b)
}

/// `a * b`, elementwise.
pub fn mul(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    validate_binary("mul", a, b)?;
    run_binary(engine, names::MULTIPLY, a, b)
}

/// `a / b`, elementwise. Float only.
pub fn div(engine: &Engine, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    validate_binary("div", a, b)?;
    if a.dtype() != DType::Float32 {
        return Err(DtypeError::new(
            "div",
            format!("division requires float32 operands, got {}", a.dtype()),
        )
        .into());
    }
    run_binary(engine, names::REAL_DIV, a, b)
}
