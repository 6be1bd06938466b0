//! Tensor creation ops.

use anyhow::Result;

use crate::engine::Engine;
use crate::kernel::{names, AttrValue, KernelAttrs};
use crate::tensor::{DType, NamedTensors, Shape, Tensor};

use super::single;

/// A scalar float tensor. Thin wrapper over direct storage creation.
pub fn scalar(engine: &Engine, value: f32) -> Result<Tensor> {
    engine.make_scalar(value)
}

/// A tensor of `shape` filled with `value`, of dtype `dtype`.
pub fn fill(engine: &Engine, shape: &Shape, value: f64, dtype: DType) -> Result<Tensor> {
    let dims: Vec<i64> = shape.dims().iter().map(|d| *d as i64).collect();
    let attrs = KernelAttrs::new()
        .with("shape", AttrValue::IntList(dims))
        .with("value", AttrValue::Float(value))
        .with("dtype", AttrValue::DType(dtype));
    single(
        names::FILL,
        engine.run_kernel(names::FILL, NamedTensors::new(), attrs)?,
    )
}

/// A float32 tensor of zeros.
pub fn zeros(engine: &Engine, shape: &Shape) -> Result<Tensor> {
    fill(engine, shape, 0.0, DType::Float32)
}

/// A float32 tensor of ones.
pub fn ones(engine: &Engine, shape: &Shape) -> Result<Tensor> {
    fill(engine, shape, 1.0, DType::Float32)
}

/// Zeros with the shape and dtype of `x`.
pub fn zeros_like(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::ZEROS_LIKE,
        engine.run_kernel(names::ZEROS_LIKE, inputs, KernelAttrs::new())?,
    )
}

/// Ones with the shape and dtype of `x`.
pub fn ones_like(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::ONES_LIKE,
        engine.run_kernel(names::ONES_LIKE, inputs, KernelAttrs::new())?,
    )
}

/// A new handle over `x`'s storage, recorded on the tape like any other op.
pub fn identity(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    let inputs = NamedTensors::new().with("x", x);
    single(
        names::IDENTITY,
        engine.run_kernel(names::IDENTITY, inputs, KernelAttrs::new())?,
    )
}
