//! Return-value containers understood by scope tracking.

use crate::tensor::Tensor;

/// Anything `tidy` can return whose tensors must survive the scope.
///
/// Implementations push every contained tensor handle into `out`; the scope
/// manager promotes those handles to the parent scope instead of disposing
/// them.
pub trait TensorContainer {
    fn collect_tensors(&self, out: &mut Vec<Tensor>);
}

impl TensorContainer for () {
    fn collect_tensors(&self, _out: &mut Vec<Tensor>) {}
}

impl TensorContainer for Tensor {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        out.push(self.clone());
    }
}

impl<T: TensorContainer> TensorContainer for Option<T> {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        if let Some(inner) = self {
            inner.collect_tensors(out);
        }
    }
}

impl<T: TensorContainer> TensorContainer for Vec<T> {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        for item in self {
            item.collect_tensors(out);
        }
    }
}

impl<A: TensorContainer, B: TensorContainer> TensorContainer for (A, B) {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        self.0.collect_tensors(out);
        self.1.collect_tensors(out);
    }
}

impl<A: TensorContainer, B: TensorContainer, C: TensorContainer> TensorContainer for (A, B, C) {
    fn collect_tensors(&self, out: &mut Vec<Tensor>) {
        self.0.collect_tensors(out);
        self.1.collect_tensors(out);
        self.2.collect_tensors(out);
    }
}
