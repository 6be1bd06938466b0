//! The op layer: validated wrappers over `Engine::run_kernel`.
//!
//! Ops never touch backend storage; every one of them funnels through the
//! engine's single dispatch entry point, which is what makes them
//! recordable on the gradient tape.

mod binary;
mod creation;
mod linalg;
mod reduction;
mod shape_ops;
mod unary;

pub use binary::{add, div, mul, sub};
pub use creation::{fill, identity, ones, ones_like, scalar, zeros, zeros_like};
pub use linalg::{matmul, transpose};
pub use reduction::{mean, sum};
pub use shape_ops::{cast, reshape};
pub use unary::{abs, exp, log, neg, relu, sign, sqrt, square, step};

use anyhow::{bail, Result};

use crate::error::DtypeError;
use crate::tensor::{DType, Tensor};

/// Unwraps the single output of a kernel invocation.
fn single(op: &'static str, mut outputs: Vec<Tensor>) -> Result<Tensor> {
    if outputs.len() != 1 {
        bail!("{op}: kernel returned {} outputs, expected 1", outputs.len());
    }
    Ok(outputs.remove(0))
}

fn ensure_numeric(op: &'static str, tensor: &Tensor) -> Result<(), DtypeError> {
    match tensor.dtype() {
        DType::Float32 | DType::Int32 => Ok(()),
        other => Err(DtypeError::new(
            op,
            format!("expected a numeric tensor, got {other}"),
        )),
    }
}

fn ensure_float(op: &'static str, tensor: &Tensor) -> Result<(), DtypeError> {
    if tensor.dtype() == DType::Float32 {
        Ok(())
    } else {
        Err(DtypeError::new(
            op,
            format!("expected a float32 tensor, got {}", tensor.dtype()),
        ))
    }
}
