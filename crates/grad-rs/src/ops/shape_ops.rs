//! Shape and dtype adapters.

use anyhow::Result;

use crate::engine::Engine;
use crate::error::{DtypeError, ShapeError};
use crate::kernel::{names, AttrValue, KernelAttrs};
use crate::tensor::{DType, NamedTensors, Tensor};

use super::single;

/// Reinterprets `x` with a new shape of equal element count. Backends alias
/// the storage rather than copying.
pub fn reshape(engine: &Engine, x: &Tensor, new_shape: &[usize]) -> Result<Tensor> {
    let new_count: usize = new_shape.iter().product();
    if new_count != x.size() {
        return Err(ShapeError::new(
            "reshape",
            format!(
                "cannot reshape {:?} ({} elements) into {:?} ({} elements)",
                x.shape().dims(),
                x.size(),
                new_shape,
                new_count
            ),
        )
        .into());
    }
    let dims: Vec<i64> = new_shape.iter().map(|d| *d as i64).collect();
    let attrs = KernelAttrs::new().with("shape", AttrValue::IntList(dims));
    let inputs = NamedTensors::new().with("x", x);
    single(names::RESHAPE, engine.run_kernel(names::RESHAPE, inputs, attrs)?)
}

/// Converts `x` to `dtype`. String and complex conversions are not
/// supported.
pub fn cast(engine: &Engine, x: &Tensor, dtype: DType) -> Result<Tensor> {
    let supported = |d: DType| matches!(d, DType::Float32 | DType::Int32 | DType::Bool);
    if !supported(x.dtype()) || !supported(dtype) {
        return Err(DtypeError::new(
            "cast",
            format!("cannot cast {} to {}", x.dtype(), dtype),
        )
        .into());
    }
    let attrs = KernelAttrs::new().with("dtype", AttrValue::DType(dtype));
    let inputs = NamedTensors::new().with("x", x);
    single(names::CAST, engine.run_kernel(names::CAST, inputs, attrs)?)
}
