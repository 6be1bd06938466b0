//! The gradient tape: recorded forward operations and the x→y filter used
//! before backward replay.

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::Engine;
use crate::kernel::{GradientConfig, KernelAttrs};
use crate::tensor::{NamedTensors, Tensor, TensorId};

/// How a tape node resolves its gradient at replay time.
#[derive(Clone)]
pub(crate) enum TapeGrad {
    /// Look the kernel name up in the gradient registry during replay;
    /// missing registrations are a fatal [`crate::error::GradientError`].
    Registry,
    /// Registration resolved when the node was recorded.
    Config(Arc<GradientConfig>),
    /// Identity clone inserted when saving tensors for the backward pass.
    Identity,
    /// Caller-supplied gradient attached by `custom_grad`; produces one
    /// gradient per original input, in input order.
    Custom(CustomGradFn),
}

/// Gradient body attached by `custom_grad`: `(engine, dys, saved)` to one
/// gradient tensor per forward input.
pub(crate) type CustomGradFn =
    Arc<dyn Fn(&Engine, &[Tensor], &[Tensor]) -> anyhow::Result<Vec<Tensor>> + Send + Sync>;

/// One recorded kernel invocation.
#[derive(Clone)]
pub(crate) struct TapeNode {
    pub id: u64,
    pub kernel_name: String,
    /// Named inputs; pruned by the x→y filter to the connected subset.
    pub inputs: NamedTensors,
    pub outputs: Vec<Tensor>,
    /// Tensors pinned for the gradient function, in save-list order. The
    /// engine owns these clones and disposes them after the outermost
    /// backward pass completes.
    pub saved: Vec<Tensor>,
    pub attrs: KernelAttrs,
    pub grad: TapeGrad,
}

/// One recording context. Tapes nest: popping a tape merges its nodes into
/// the parent so outer gradient computations can differentiate through inner
/// ones.
#[derive(Default)]
pub(crate) struct Tape {
    pub nodes: Vec<TapeNode>,
}

/// Filters the tape down to nodes on a path from any of `xs` to `y`, in
/// recording order, with each node's inputs pruned to the connected subset.
///
/// A node survives only if (a) at least one input is reachable from `xs`
/// through earlier nodes and (b) at least one output reaches `y` through
/// later nodes.
pub(crate) fn filter_nodes_x_to_y(nodes: &[TapeNode], xs: &[Tensor], y: &Tensor) -> Vec<TapeNode> {
    // Forward sweep: mark tensors reachable from xs.
    let mut tensors_from_x: HashSet<TensorId> = xs.iter().map(|x| x.id()).collect();
    let mut node_from_x = vec![false; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let touches_x = node
            .inputs
            .iter()
            .any(|(_, input)| tensors_from_x.contains(&input.id()));
        if touches_x {
            for output in &node.outputs {
                tensors_from_x.insert(output.id());
            }
            node_from_x[i] = true;
        }
    }

    // Backward sweep: mark tensors that lead to y.
    let mut tensors_to_y: HashSet<TensorId> = HashSet::new();
    tensors_to_y.insert(y.id());
    let mut node_to_y = vec![false; nodes.len()];
    for (i, node) in nodes.iter().enumerate().rev() {
        let reaches_y = node
            .outputs
            .iter()
            .any(|output| tensors_to_y.contains(&output.id()));
        if reaches_y {
            for (_, input) in node.inputs.iter() {
                tensors_to_y.insert(input.id());
            }
            node_to_y[i] = true;
        }
    }

    let mut filtered = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        if !(node_from_x[i] && node_to_y[i]) {
            continue;
        }
        let mut pruned = node.clone();
        let mut inputs = NamedTensors::new();
        for (name, input) in node.inputs.iter() {
            if tensors_from_x.contains(&input.id()) {
                inputs.insert(name, input);
            }
        }
        pruned.inputs = inputs;
        filtered.push(pruned);
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, DataId, Shape, TensorInfo};

    fn scalar_handle() -> Tensor {
        Tensor::from_info(TensorInfo::new(DataId::fresh(), Shape::scalar(), DType::Float32))
    }

    fn node(id: u64, inputs: &[(&str, &Tensor)], outputs: &[&Tensor]) -> TapeNode {
        let mut named = NamedTensors::new();
        for (name, tensor) in inputs {
            named.insert(*name, tensor);
        }
        TapeNode {
            id,
            kernel_name: format!("node{id}"),
            inputs: named,
            outputs: outputs.iter().map(|t| (*t).clone()).collect(),
            saved: Vec::new(),
            attrs: KernelAttrs::new(),
            grad: TapeGrad::Registry,
        }
    }

    #[test]
    fn no_path_from_x_to_y_filters_everything() {
        let x = scalar_handle();
        let intermediate1 = scalar_handle();
        let intermediate2 = scalar_handle();
        let y = scalar_handle();

        let tape = vec![
            node(0, &[("x", &x)], &[&intermediate1]),
            node(1, &[("intermediate2", &intermediate2)], &[&y]),
        ];

        let filtered = filter_nodes_x_to_y(&tape, &[x], &y);
        assert!(filtered.is_empty());
    }

    #[test]
    fn direct_x_to_y_is_kept() {
        let x = scalar_handle();
        let y = scalar_handle();
        let tape = vec![node(0, &[("x", &x)], &[&y])];

        let filtered = filter_nodes_x_to_y(&tape, &[x], &y);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].inputs.len(), 1);
    }

    #[test]
    fn unconnected_input_is_pruned_from_surviving_node() {
        let x0 = scalar_handle();
        let x1 = scalar_handle();
        let y = scalar_handle();
        let tape = vec![node(0, &[("x0", &x0), ("x1", &x1)], &[&y])];

        let filtered = filter_nodes_x_to_y(&tape, &[x0.clone()], &y);
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].inputs.get("x0").is_some());
        assert!(filtered[0].inputs.get("x1").is_none());
    }

    #[test]
    fn chain_through_intermediate_is_kept_in_order() {
        let x = scalar_handle();
        let mid = scalar_handle();
        let y = scalar_handle();
        let tape = vec![node(0, &[("x", &x)], &[&mid]), node(1, &[("mid", &mid)], &[&y])];

        let filtered = filter_nodes_x_to_y(&tape, &[x], &y);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, 0);
        assert_eq!(filtered[1].id, 1);
    }

    #[test]
    fn side_branch_not_reaching_y_is_dropped() {
        let x = scalar_handle();
        let mid = scalar_handle();
        let dead_end = scalar_handle();
        let y = scalar_handle();
        let tape = vec![
            node(0, &[("x", &x)], &[&mid]),
            node(1, &[("mid", &mid)], &[&dead_end]),
            node(2, &[("mid", &mid)], &[&y]),
        ];

        let filtered = filter_nodes_x_to_y(&tape, &[x], &y);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, 0);
        assert_eq!(filtered[1].id, 2);
    }
}
