//! CPU kernel implementations for the core op set.
//!
//! Kernels read their inputs out of [`CpuBackend`] storage, compute on the
//! host, and return fresh (or aliased) storage descriptors. Shape and dtype
//! validation already happened at the op layer.

use grad_rs::error::{BackendError, BackendResult};
use grad_rs::kernel::{names, KernelParams};
use grad_rs::tensor::{DType, DataId, Shape, Tensor, TensorInfo, TensorValues};

use crate::cpu::CpuBackend;

fn cpu<'a>(params: &KernelParams<'a>) -> BackendResult<&'a CpuBackend> {
    params
        .backend
        .as_any()
        .downcast_ref::<CpuBackend>()
        .ok_or_else(|| BackendError::execution("kernel requires the reference CPU backend"))
}

fn materialize(backend: &CpuBackend, values: TensorValues, shape: Shape) -> Vec<TensorInfo> {
    let dtype = values.dtype();
    let data_id = DataId::fresh();
    backend.insert(data_id, values);
    vec![TensorInfo::new(data_id, shape, dtype)]
}

/// Elementwise combine with scalar broadcast on either side.
fn zip_broadcast<T: Copy>(a: &[T], b: &[T], f: impl Fn(T, T) -> T) -> BackendResult<Vec<T>> {
    if a.len() == b.len() {
        Ok(a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect())
    } else if a.len() == 1 {
        Ok(b.iter().map(|y| f(a[0], *y)).collect())
    } else if b.len() == 1 {
        Ok(a.iter().map(|x| f(*x, b[0])).collect())
    } else {
        Err(BackendError::execution(format!(
            "operand lengths {} and {} are incompatible",
            a.len(),
            b.len()
        )))
    }
}

fn broadcast_shape(a: &Tensor, b: &Tensor) -> Shape {
    if a.shape().is_scalar() {
        b.shape().clone()
    } else {
        a.shape().clone()
    }
}

fn binary(
    params: KernelParams<'_>,
    kernel: &'static str,
    ff: fn(f32, f32) -> f32,
    fi: Option<fn(i32, i32) -> i32>,
) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let a = params.input(kernel, "a")?;
    let b = params.input(kernel, "b")?;
    let av = backend.values(a.data_id())?;
    let bv = backend.values(b.data_id())?;
    let shape = broadcast_shape(a, b);
    let values = match (&av, &bv) {
        (TensorValues::Float32(x), TensorValues::Float32(y)) => {
            TensorValues::Float32(zip_broadcast(x, y, ff)?)
        }
        (TensorValues::Int32(x), TensorValues::Int32(y)) => match fi {
            Some(fi) => TensorValues::Int32(zip_broadcast(x, y, fi)?),
            None => {
                return Err(BackendError::execution(format!(
                    "kernel '{kernel}' does not support int32 operands"
                )))
            }
        },
        _ => {
            return Err(BackendError::execution(format!(
                "kernel '{kernel}' supports float32 and int32 operands only"
            )))
        }
    };
    Ok(materialize(backend, values, shape))
}

fn unary(
    params: KernelParams<'_>,
    kernel: &'static str,
    ff: fn(f32) -> f32,
    fi: Option<fn(i32) -> i32>,
) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(kernel, "x")?;
    let xv = backend.values(x.data_id())?;
    let values = match &xv {
        TensorValues::Float32(v) => TensorValues::Float32(v.iter().map(|x| ff(*x)).collect()),
        TensorValues::Int32(v) => match fi {
            Some(fi) => TensorValues::Int32(v.iter().map(|x| fi(*x)).collect()),
            None => {
                return Err(BackendError::execution(format!(
                    "kernel '{kernel}' does not support int32 operands"
                )))
            }
        },
        _ => {
            return Err(BackendError::execution(format!(
                "kernel '{kernel}' supports float32 and int32 operands only"
            )))
        }
    };
    Ok(materialize(backend, values, x.shape().clone()))
}

// ---- creation and shape ---------------------------------------------------

pub(crate) fn identity_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let x = params.input(names::IDENTITY, "x")?;
    // Alias: the engine reference-counts the shared storage.
    Ok(vec![x.info()])
}

pub(crate) fn reshape_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let x = params.input(names::RESHAPE, "x")?;
    let dims = params
        .attrs
        .int_list("shape")
        .ok_or_else(|| BackendError::BadAttr {
            attr: "shape".to_string(),
        })?;
    let shape = Shape::new(dims.iter().map(|d| *d as usize).collect::<Vec<_>>());
    Ok(vec![TensorInfo::new(x.data_id(), shape, x.dtype())])
}

pub(crate) fn cast_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::CAST, "x")?;
    let dtype = params
        .attrs
        .dtype("dtype")
        .ok_or_else(|| BackendError::BadAttr {
            attr: "dtype".to_string(),
        })?;
    let xv = backend.values(x.data_id())?;
    let as_f32: Vec<f32> = match &xv {
        TensorValues::Float32(v) => v.clone(),
        TensorValues::Int32(v) => v.iter().map(|x| *x as f32).collect(),
        TensorValues::Bool(v) => v.iter().map(|x| if *x { 1.0 } else { 0.0 }).collect(),
        _ => {
            return Err(BackendError::execution(
                "Cast supports float32, int32, and bool inputs only",
            ))
        }
    };
    let values = match dtype {
        DType::Float32 => TensorValues::Float32(as_f32),
        DType::Int32 => TensorValues::Int32(as_f32.iter().map(|x| *x as i32).collect()),
        DType::Bool => TensorValues::Bool(as_f32.iter().map(|x| *x != 0.0).collect()),
        other => {
            return Err(BackendError::execution(format!(
                "Cast to {other} is not supported"
            )))
        }
    };
    Ok(materialize(backend, values, x.shape().clone()))
}

pub(crate) fn fill_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let dims = params
        .attrs
        .int_list("shape")
        .ok_or_else(|| BackendError::BadAttr {
            attr: "shape".to_string(),
        })?;
    let value = params
        .attrs
        .float("value")
        .ok_or_else(|| BackendError::BadAttr {
            attr: "value".to_string(),
        })?;
    let dtype = params
        .attrs
        .dtype("dtype")
        .ok_or_else(|| BackendError::BadAttr {
            attr: "dtype".to_string(),
        })?;
    let shape = Shape::new(dims.iter().map(|d| *d as usize).collect::<Vec<_>>());
    let len = shape.num_elements();
    let values = match dtype {
        DType::Float32 => TensorValues::Float32(vec![value as f32; len]),
        DType::Int32 => TensorValues::Int32(vec![value as i32; len]),
        DType::Bool => TensorValues::Bool(vec![value != 0.0; len]),
        other => {
            return Err(BackendError::execution(format!(
                "Fill of {other} is not supported"
            )))
        }
    };
    Ok(materialize(backend, values, shape))
}

pub(crate) fn zeros_like_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::ZEROS_LIKE, "x")?;
    let values = TensorValues::zeros(x.dtype(), x.size());
    Ok(materialize(backend, values, x.shape().clone()))
}

pub(crate) fn ones_like_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::ONES_LIKE, "x")?;
    let values = TensorValues::ones(x.dtype(), x.size());
    Ok(materialize(backend, values, x.shape().clone()))
}

// ---- elementwise ----------------------------------------------------------

pub(crate) fn add_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    binary(params, names::ADD, |x, y| x + y, Some(|x, y| x + y))
}

pub(crate) fn sub_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    binary(params, names::SUB, |x, y| x - y, Some(|x, y| x - y))
}

pub(crate) fn multiply_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    binary(params, names::MULTIPLY, |x, y| x * y, Some(|x, y| x * y))
}

pub(crate) fn div_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    binary(params, names::REAL_DIV, |x, y| x / y, None)
}

pub(crate) fn neg_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::NEG, |x| -x, Some(|x| -x))
}

pub(crate) fn square_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::SQUARE, |x| x * x, Some(|x| x * x))
}

pub(crate) fn sqrt_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::SQRT, f32::sqrt, None)
}

pub(crate) fn exp_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::EXP, f32::exp, None)
}

pub(crate) fn log_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::LOG, f32::ln, None)
}

pub(crate) fn relu_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::RELU, |x| x.max(0.0), None)
}

pub(crate) fn abs_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::ABS, f32::abs, Some(i32::abs))
}

pub(crate) fn step_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(params, names::STEP, |x| if x > 0.0 { 1.0 } else { 0.0 }, None)
}

pub(crate) fn sign_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    unary(
        params,
        names::SIGN,
        |x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        },
        None,
    )
}

// ---- reductions -----------------------------------------------------------

pub(crate) fn sum_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::SUM, "x")?;
    let xv = backend.values(x.data_id())?;
    let values = match &xv {
        TensorValues::Float32(v) => TensorValues::Float32(vec![v.iter().sum()]),
        TensorValues::Int32(v) => TensorValues::Int32(vec![v.iter().sum()]),
        _ => {
            return Err(BackendError::execution(
                "Sum supports float32 and int32 operands only",
            ))
        }
    };
    Ok(materialize(backend, values, Shape::scalar()))
}

pub(crate) fn mean_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::MEAN, "x")?;
    let xv = backend.values(x.data_id())?;
    let v = xv
        .as_f32()
        .map_err(|_| BackendError::execution("Mean supports float32 operands only"))?;
    let mean = if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f32>() / v.len() as f32
    };
    Ok(materialize(
        backend,
        TensorValues::Float32(vec![mean]),
        Shape::scalar(),
    ))
}

// ---- linear algebra -------------------------------------------------------

pub(crate) fn matmul_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let a = params.input(names::MAT_MUL, "a")?;
    let b = params.input(names::MAT_MUL, "b")?;
    let av = backend.values(a.data_id())?;
    let bv = backend.values(b.data_id())?;
    let lhs = av
        .as_f32()
        .map_err(|_| BackendError::execution("MatMul supports float32 operands only"))?;
    let rhs = bv
        .as_f32()
        .map_err(|_| BackendError::execution("MatMul supports float32 operands only"))?;
    let (m, k) = (a.shape().dims()[0], a.shape().dims()[1]);
    let n = b.shape().dims()[1];
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let lhs_ip = lhs[i * k + p];
            for j in 0..n {
                out[i * n + j] += lhs_ip * rhs[p * n + j];
            }
        }
    }
    Ok(materialize(
        backend,
        TensorValues::Float32(out),
        Shape::new([m, n]),
    ))
}

pub(crate) fn transpose_kernel(params: KernelParams<'_>) -> BackendResult<Vec<TensorInfo>> {
    let backend = cpu(&params)?;
    let x = params.input(names::TRANSPOSE, "x")?;
    let xv = backend.values(x.data_id())?;
    let v = xv
        .as_f32()
        .map_err(|_| BackendError::execution("Transpose supports float32 operands only"))?;
    let (rows, cols) = (x.shape().dims()[0], x.shape().dims()[1]);
    let mut out = vec![0.0f32; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = v[i * cols + j];
        }
    }
    Ok(materialize(
        backend,
        TensorValues::Float32(out),
        Shape::new([cols, rows]),
    ))
}
