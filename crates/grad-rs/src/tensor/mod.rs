//! Tensor handles, shapes, dtypes, and host payloads.

mod container;
mod dtype;
mod handle;
mod shape;
mod values;

pub use container::TensorContainer;
pub use dtype::DType;
pub use handle::{DataId, Tensor, TensorId, TensorInfo};
pub use shape::Shape;
pub use values::TensorValues;

/// Ordered name→tensor mapping used for kernel inputs.
///
/// Insertion order is preserved so kernels and gradient functions observe
/// inputs in the order the op author declared them.
#[derive(Debug, Clone, Default)]
pub struct NamedTensors {
    entries: Vec<(String, Tensor)>,
}

impl NamedTensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, tensor: &Tensor) -> Self {
        self.entries.push((name.into(), tensor.clone()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: &Tensor) {
        self.entries.push((name.into(), tensor.clone()));
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
