//! Host-side tensor payloads moved in and out of backend storage.

use crate::error::DtypeError;
use crate::tensor::DType;

/// Dense host values for one tensor, one variant per dtype.
///
/// `Complex64` stores interleaved real/imaginary pairs, so the vector length
/// is twice the element count.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Bool(Vec<bool>),
    Str(Vec<String>),
    Complex64(Vec<f32>),
}

impl TensorValues {
    /// Returns the dtype implied by the payload variant.
    pub fn dtype(&self) -> DType {
        match self {
            TensorValues::Float32(_) => DType::Float32,
            TensorValues::Int32(_) => DType::Int32,
            TensorValues::Bool(_) => DType::Bool,
            TensorValues::Str(_) => DType::Str,
            TensorValues::Complex64(_) => DType::Complex64,
        }
    }

    /// Number of logical elements held by the payload.
    pub fn num_elements(&self) -> usize {
        match self {
            TensorValues::Float32(v) => v.len(),
            TensorValues::Int32(v) => v.len(),
            TensorValues::Bool(v) => v.len(),
            TensorValues::Str(v) => v.len(),
            TensorValues::Complex64(v) => v.len() / 2,
        }
    }

    /// Total payload size in bytes. String payloads report their UTF-8 byte
    /// length, which makes aggregate byte accounting approximate.
    pub fn byte_len(&self) -> usize {
        match self {
            TensorValues::Float32(v) => v.len() * 4,
            TensorValues::Int32(v) => v.len() * 4,
            TensorValues::Bool(v) => v.len(),
            TensorValues::Str(v) => v.iter().map(|s| s.len()).sum(),
            TensorValues::Complex64(v) => v.len() * 4,
        }
    }

    /// Zero-filled payload of the given dtype and element count.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Float32 => TensorValues::Float32(vec![0.0; len]),
            DType::Int32 => TensorValues::Int32(vec![0; len]),
            DType::Bool => TensorValues::Bool(vec![false; len]),
            DType::Str => TensorValues::Str(vec![String::new(); len]),
            DType::Complex64 => TensorValues::Complex64(vec![0.0; len * 2]),
        }
    }

    /// One-filled payload of the given dtype and element count.
    pub fn ones(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Float32 => TensorValues::Float32(vec![1.0; len]),
            DType::Int32 => TensorValues::Int32(vec![1; len]),
            DType::Bool => TensorValues::Bool(vec![true; len]),
            DType::Str => TensorValues::Str(vec![String::new(); len]),
            DType::Complex64 => {
                let mut v = vec![0.0; len * 2];
                for pair in v.chunks_mut(2) {
                    pair[0] = 1.0;
                }
                TensorValues::Complex64(v)
            }
        }
    }

    /// Borrows the payload as `f32` values, failing on other dtypes.
    pub fn as_f32(&self) -> Result<&[f32], DtypeError> {
        match self {
            TensorValues::Float32(v) => Ok(v),
            other => Err(DtypeError::new(
                "TensorValues::as_f32",
                format!("expected float32 values, got {}", other.dtype()),
            )),
        }
    }

    /// Borrows the payload as `i32` values, failing on other dtypes.
    pub fn as_i32(&self) -> Result<&[i32], DtypeError> {
        match self {
            TensorValues::Int32(v) => Ok(v),
            other => Err(DtypeError::new(
                "TensorValues::as_i32",
                format!("expected int32 values, got {}", other.dtype()),
            )),
        }
    }

    /// Borrows the payload as booleans, failing on other dtypes.
    pub fn as_bool(&self) -> Result<&[bool], DtypeError> {
        match self {
            TensorValues::Bool(v) => Ok(v),
            other => Err(DtypeError::new(
                "TensorValues::as_bool",
                format!("expected bool values, got {}", other.dtype()),
            )),
        }
    }
}

impl From<Vec<f32>> for TensorValues {
    fn from(v: Vec<f32>) -> Self {
        TensorValues::Float32(v)
    }
}

impl From<Vec<i32>> for TensorValues {
    fn from(v: Vec<i32>) -> Self {
        TensorValues::Int32(v)
    }
}

impl From<Vec<bool>> for TensorValues {
    fn from(v: Vec<bool>) -> Self {
        TensorValues::Bool(v)
    }
}
