//! Reverse-mode differentiation: tape lifecycle, backward replay, and the
//! public gradient entry points.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::engine::tape::{filter_nodes_x_to_y, CustomGradFn, Tape, TapeGrad, TapeNode};
use crate::engine::{Engine, Variable};
use crate::error::{DtypeError, GradientError, ShapeError};
use crate::kernel::GradContext;
use crate::ops;
use crate::tensor::{DType, NamedTensors, Shape, Tensor, TensorId, TensorValues};

/// Result of [`Engine::gradients`]: the traced value plus one gradient per
/// requested input (`None` only when disconnected inputs are allowed).
pub struct ValueAndGrads {
    pub value: Tensor,
    pub grads: Vec<Option<Tensor>>,
}

/// What a `custom_grad` forward closure returns: the op's value and the
/// gradient body invoked during replay with `(engine, dy, saved)`.
pub struct CustomGradResult {
    pub value: Tensor,
    pub grad_func: Arc<dyn Fn(&Engine, &Tensor, &[Tensor]) -> Result<Vec<Tensor>> + Send + Sync>,
}

/// Pops the tape on drop so an error mid-trace cannot leave the engine
/// recording forever.
struct TapeGuard<'a> {
    engine: &'a Engine,
    done: bool,
}

impl Drop for TapeGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.engine.end_tape();
            self.engine.cleanup_finished_tape();
        }
    }
}

impl Engine {
    fn start_tape(&self) {
        self.state().tapes.push(Tape::default());
    }

    /// Pops the innermost tape. Its nodes merge into the parent tape when one
    /// exists (outer gradients may differentiate through them); otherwise
    /// they move to the finished list awaiting saved-tensor cleanup.
    fn end_tape(&self) {
        let mut guard = self.state();
        let st = &mut *guard;
        if let Some(tape) = st.tapes.pop() {
            match st.tapes.last_mut() {
                Some(parent) => parent.nodes.extend(tape.nodes),
                None => st.finished_tape.extend(tape.nodes),
            }
        }
    }

    /// Disposes the saved tensors pinned by completed tapes. Only meaningful
    /// once no tape is recording.
    fn cleanup_finished_tape(&self) {
        if !self.state().tapes.is_empty() {
            return;
        }
        let nodes = std::mem::take(&mut self.state().finished_tape);
        for node in nodes {
            for saved in node.saved {
                // Saved clones are engine-owned; a reset in between may have
                // already dropped them.
                let _ = self.dispose(&saved);
            }
        }
    }

    /// Whether kernel invocations are currently being recorded.
    pub fn is_tape_on(&self) -> bool {
        let st = self.state();
        !st.tapes.is_empty() && st.kernel_depth == 0
    }

    /// Traces `f` on a fresh tape and replays it in reverse, returning the
    /// traced value and the gradient of each of `xs`.
    ///
    /// `dy` seeds the output gradient and defaults to ones of the output
    /// shape. Inputs with no path to the output are an error unless
    /// `allow_no_gradients` is set, in which case their slot is `None`.
    pub fn gradients<F>(
        &self,
        f: F,
        xs: &[Tensor],
        dy: Option<&Tensor>,
        allow_no_gradients: bool,
    ) -> Result<ValueAndGrads>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        if xs.is_empty() {
            bail!("gradients() received an empty list of xs");
        }
        if let Some(dy) = dy {
            if dy.dtype() != DType::Float32 {
                return Err(DtypeError::new(
                    "gradients",
                    format!("dy must have float32 dtype, got {}", dy.dtype()),
                )
                .into());
            }
        }

        self.start_tape();
        let mut tape_guard = TapeGuard {
            engine: self,
            done: false,
        };

        let value = self.tidy(f)?;

        if let Some(dy) = dy {
            if dy.shape() != value.shape() {
                return Err(ShapeError::new(
                    "gradients",
                    format!(
                        "dy shape {:?} must match the shape {:?} returned by f",
                        dy.shape().dims(),
                        value.shape().dims()
                    ),
                )
                .into());
            }
        }

        let filtered = {
            let st = self.state();
            match st.tapes.last() {
                Some(tape) => filter_nodes_x_to_y(&tape.nodes, xs, &value),
                None => Vec::new(),
            }
        };
        tape_guard.done = true;
        self.end_tape();

        if !allow_no_gradients && filtered.is_empty() {
            self.cleanup_finished_tape();
            return Err(GradientError::Disconnected.into());
        }

        let backward = self.tidy(|| {
            let mut accumulated: HashMap<TensorId, Tensor> = HashMap::new();
            let seed = match dy {
                Some(dy) => dy.clone(),
                None => self.filled_raw(value.shape(), 1.0)?,
            };
            accumulated.insert(value.id(), seed);
            self.backpropagate(&mut accumulated, &filtered)?;
            let grads: Vec<Option<Tensor>> = xs
                .iter()
                .map(|x| accumulated.get(&x.id()).cloned())
                .collect();
            Ok(grads)
        });
        self.cleanup_finished_tape();
        let grads = backward?;

        if !allow_no_gradients && grads.iter().any(Option::is_none) {
            return Err(GradientError::Disconnected.into());
        }
        Ok(ValueAndGrads { value, grads })
    }

    /// Walks the filtered tape from last entry to first, accumulating input
    /// gradients. Fan-in (one tensor consumed by several ops) accumulates by
    /// elementwise addition, which requires an `Add` kernel on the active
    /// backend.
    fn backpropagate(
        &self,
        accumulated: &mut HashMap<TensorId, Tensor>,
        filtered: &[TapeNode],
    ) -> Result<()> {
        for node in filtered.iter().rev() {
            let mut dys = Vec::with_capacity(node.outputs.len());
            for output in &node.outputs {
                match accumulated.get(&output.id()) {
                    Some(grad) => dys.push(grad.clone()),
                    // Outputs never consumed downstream still need a seed for
                    // multi-output gradient functions.
                    None => dys.push(self.filled_raw(output.shape(), 0.0)?),
                }
            }

            let input_grads = self.node_input_gradients(node, &dys)?;

            for (name, grad) in input_grads {
                let Some(input) = node.inputs.get(&name) else {
                    continue;
                };
                if grad.dtype() != DType::Float32 {
                    return Err(GradientError::NonFloatGradient {
                        kernel: node.kernel_name.clone(),
                        got: grad.dtype(),
                    }
                    .into());
                }
                if grad.shape() != input.shape() {
                    return Err(ShapeError::new(
                        "backpropagate",
                        format!(
                            "gradient shape {:?} for input '{}' of kernel '{}' does not match \
                             the input shape {:?}",
                            grad.shape().dims(),
                            name,
                            node.kernel_name,
                            input.shape().dims()
                        ),
                    )
                    .into());
                }
                let merged = match accumulated.remove(&input.id()) {
                    Some(existing) => ops::add(self, &existing, &grad)?,
                    None => grad,
                };
                accumulated.insert(input.id(), merged);
            }
        }
        Ok(())
    }

    /// Produces `(input name, gradient)` pairs for one node. Resolution is
    /// fatal when the registry has no gradient for the node's kernel.
    fn node_input_gradients(
        &self,
        node: &TapeNode,
        dys: &[Tensor],
    ) -> Result<Vec<(String, Tensor)>> {
        match &node.grad {
            TapeGrad::Identity => {
                let Some((name, _)) = node.inputs.iter().next() else {
                    return Ok(Vec::new());
                };
                let dy = &dys[0];
                let grad = if dy.dtype() == DType::Float32 {
                    dy.clone()
                } else {
                    ops::cast(self, dy, DType::Float32)?
                };
                Ok(vec![(name.to_string(), grad)])
            }
            TapeGrad::Custom(custom) => self.custom_input_gradients(custom, node, dys),
            TapeGrad::Config(config) => self.registry_input_gradients(config, node, dys),
            TapeGrad::Registry => {
                let config = self
                    .gradient_registry()
                    .get(&node.kernel_name)
                    .ok_or_else(|| Engine::missing_gradient_error(&node.kernel_name))?;
                self.registry_input_gradients(&config, node, dys)
            }
        }
    }

    fn registry_input_gradients(
        &self,
        config: &crate::kernel::GradientConfig,
        node: &TapeNode,
        dys: &[Tensor],
    ) -> Result<Vec<(String, Tensor)>> {
        let ctx = GradContext {
            engine: self,
            dys,
            saved: &node.saved,
            attrs: &node.attrs,
        };
        let mut map = (config.grad_func)(ctx)?;
        let mut grads = Vec::with_capacity(node.inputs.len());
        for (name, _) in node.inputs.iter() {
            let thunk = map
                .take(name)
                .ok_or_else(|| GradientError::MissingInputGradient {
                    kernel: node.kernel_name.clone(),
                    input: name.to_string(),
                })?;
            grads.push((name.to_string(), thunk()?));
        }
        Ok(grads)
    }

    /// Custom gradients return one tensor per original input position; inputs
    /// pruned from the tape are computed but dropped, matching the contract
    /// that the custom body sees all of its inputs.
    fn custom_input_gradients(
        &self,
        custom: &CustomGradFn,
        node: &TapeNode,
        dys: &[Tensor],
    ) -> Result<Vec<(String, Tensor)>> {
        let all = custom(self, dys, &node.saved)?;
        let mut grads = Vec::new();
        for (index, grad) in all.into_iter().enumerate() {
            let name = index.to_string();
            if node.inputs.get(&name).is_some() {
                grads.push((name, grad));
            }
        }
        Ok(grads)
    }

    /// Creates a constant-filled float32 tensor directly through backend
    /// storage, without dispatching a kernel. Used for gradient seeds.
    fn filled_raw(&self, shape: &Shape, value: f32) -> Result<Tensor> {
        self.make_tensor(
            TensorValues::Float32(vec![value; shape.num_elements()]),
            shape.clone(),
        )
    }

    // ---- public differentiation wrappers ---------------------------------

    /// Gradient of `f` at `x`. `dy` optionally scales the output gradient.
    pub fn grad<F>(&self, f: F, x: &Tensor, dy: Option<&Tensor>) -> Result<Tensor>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.tidy(|| {
            let result = self.gradients(f, std::slice::from_ref(x), dy, false)?;
            result.grads.into_iter().next().flatten().ok_or_else(|| {
                anyhow::Error::from(GradientError::Disconnected)
            })
        })
    }

    /// Gradients of `f` with respect to each of `xs`.
    pub fn grads<F>(&self, f: F, xs: &[Tensor], dy: Option<&Tensor>) -> Result<Vec<Tensor>>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.tidy(|| {
            let result = self.gradients(f, xs, dy, false)?;
            result
                .grads
                .into_iter()
                .map(|grad| grad.ok_or_else(|| anyhow::Error::from(GradientError::Disconnected)))
                .collect()
        })
    }

    /// Like [`Engine::grad`], but also returns the value of `f`.
    pub fn value_and_grad<F>(
        &self,
        f: F,
        x: &Tensor,
        dy: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.tidy(|| {
            let result = self.gradients(f, std::slice::from_ref(x), dy, false)?;
            let grad = result
                .grads
                .into_iter()
                .next()
                .flatten()
                .ok_or_else(|| anyhow::Error::from(GradientError::Disconnected))?;
            Ok((result.value, grad))
        })
    }

    /// Like [`Engine::grads`], but also returns the value of `f`.
    pub fn value_and_grads<F>(
        &self,
        f: F,
        xs: &[Tensor],
        dy: Option<&Tensor>,
    ) -> Result<(Tensor, Vec<Tensor>)>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        self.tidy(|| {
            let result = self.gradients(f, xs, dy, false)?;
            let grads = result
                .grads
                .into_iter()
                .map(|grad| grad.ok_or_else(|| anyhow::Error::from(GradientError::Disconnected)))
                .collect::<Result<Vec<_>>>()?;
            Ok((result.value, grads))
        })
    }

    /// Gradient of a scalar loss with respect to trainable variables.
    /// Defaults to every registered trainable variable; disconnected
    /// variables are simply omitted from the result.
    pub fn variable_grads<F>(
        &self,
        f: F,
        var_list: Option<&[Variable]>,
    ) -> Result<(Tensor, Vec<(String, Tensor)>)>
    where
        F: FnOnce() -> Result<Tensor>,
    {
        let variables: Vec<Variable> = match var_list {
            Some(list) => list.iter().filter(|v| v.trainable()).cloned().collect(),
            None => self.trainable_variables(),
        };
        if variables.is_empty() {
            bail!("variable_grads() found no trainable variables");
        }
        let xs: Vec<Tensor> = variables.iter().map(|v| v.tensor().clone()).collect();

        let result = self.gradients(f, &xs, None, true)?;
        if !result.value.shape().is_scalar() {
            return Err(ShapeError::new(
                "variable_grads",
                format!(
                    "f must return a scalar, got shape {:?}",
                    result.value.shape().dims()
                ),
            )
            .into());
        }
        if result.grads.iter().all(Option::is_none) {
            return Err(GradientError::Disconnected.into());
        }

        let mut named = Vec::new();
        for (variable, grad) in variables.iter().zip(result.grads) {
            if let Some(grad) = grad {
                named.push((variable.name().to_string(), grad));
            }
        }
        Ok((result.value, named))
    }

    /// Runs `forward` as a single differentiable unit with a caller-supplied
    /// gradient, overriding whatever the registry would compute for the ops
    /// inside it.
    ///
    /// `forward` receives the inputs and a `save` callback for pinning
    /// tensors its gradient will need; the returned `grad_func` sees them in
    /// save order.
    pub fn custom_grad<F>(&self, inputs: &[Tensor], forward: F) -> Result<Tensor>
    where
        F: FnOnce(&[Tensor], &mut dyn FnMut(&Tensor)) -> Result<CustomGradResult>,
    {
        let tape_on = self.is_tape_on();

        let mut save_requests: Vec<Tensor> = Vec::new();
        let result = {
            self.state().kernel_depth += 1;
            let _depth = super::KernelDepthGuard(self);
            let mut save = |tensor: &Tensor| save_requests.push(tensor.clone());
            forward(inputs, &mut save)?
        };

        if tape_on {
            let (_, backend) = self.active_backend()?;
            // Tensors are immutable, so pinning after the forward body ran
            // observes the same values the save callback saw.
            let saved: Vec<Tensor> = save_requests
                .iter()
                .map(|tensor| self.clone_for_tape(tensor, &backend))
                .collect();

            let mut named = NamedTensors::new();
            for (index, input) in inputs.iter().enumerate() {
                named.insert(index.to_string(), input);
            }
            let input_count = inputs.len();
            let user_grad = Arc::clone(&result.grad_func);
            let custom: CustomGradFn = Arc::new(move |engine, dys, saved| {
                let grads = user_grad(engine, &dys[0], saved)?;
                if grads.len() != input_count {
                    bail!(
                        "custom gradient produced {} gradients for {} inputs",
                        grads.len(),
                        input_count
                    );
                }
                Ok(grads)
            });
            self.record_node(
                "CustomGrad".to_string(),
                named,
                vec![result.value.clone()],
                saved,
                crate::kernel::KernelAttrs::new(),
                TapeGrad::Custom(custom),
            );
        }

        Ok(result.value)
    }
}
