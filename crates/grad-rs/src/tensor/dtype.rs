//! Enumerates the logical element types tracked by the engine.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between tensor handles and backend storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    Float32,
    /// 32-bit signed integer, primarily for indices and masks.
    Int32,
    /// Boolean values stored one byte per element.
    Bool,
    /// Variable-length UTF-8 strings; byte accounting is approximate.
    Str,
    /// Complex numbers stored as interleaved `f32` real/imaginary pairs.
    Complex64,
}

impl DType {
    /// Returns the number of bytes per element, or `None` when the size is
    /// not fixed (strings).
    pub fn bytes_per_element(self) -> Option<usize> {
        match self {
            DType::Float32 | DType::Int32 => Some(4),
            DType::Bool => Some(1),
            DType::Str => None,
            DType::Complex64 => Some(8),
        }
    }

    /// Returns `true` when the dtype participates in gradient computation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Complex64)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::Int32 => "int32",
            DType::Bool => "bool",
            DType::Str => "string",
            DType::Complex64 => "complex64",
        };
        f.write_str(name)
    }
}
