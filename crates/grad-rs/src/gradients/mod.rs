//! Gradient functions for the core op set.
//!
//! Each function receives the replay context and returns one lazily-evaluated
//! thunk per differentiable input; thunks for inputs pruned from the tape are
//! never run. Gradients are always float32.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::engine::Engine;
use crate::kernel::{names, GradContext, GradientConfig, NamedGradientMap};
use crate::ops;
use crate::tensor::{DType, Tensor};

/// Registers every core gradient with the engine. Call once per engine,
/// alongside backend/kernel registration.
pub fn register_all(engine: &Engine) {
    engine.register_gradient(
        GradientConfig::new(names::ADD, Arc::new(add_grad)).save_inputs(&["a", "b"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::SUB, Arc::new(sub_grad)).save_inputs(&["a", "b"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::MULTIPLY, Arc::new(multiply_grad)).save_inputs(&["a", "b"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::REAL_DIV, Arc::new(div_grad)).save_inputs(&["a", "b"]),
    );
    engine.register_gradient(GradientConfig::new(names::NEG, Arc::new(neg_grad)));
    engine.register_gradient(
        GradientConfig::new(names::SQUARE, Arc::new(square_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::SQRT, Arc::new(sqrt_grad)).save_inputs(&["x"]),
    );
    engine
        .register_gradient(GradientConfig::new(names::EXP, Arc::new(exp_grad)).save_outputs(&[true]));
    engine.register_gradient(
        GradientConfig::new(names::LOG, Arc::new(log_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::RELU, Arc::new(relu_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::ABS, Arc::new(abs_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(GradientConfig::new(names::STEP, Arc::new(zero_grad)));
    engine.register_gradient(GradientConfig::new(names::SIGN, Arc::new(zero_grad)));
    engine.register_gradient(GradientConfig::new(names::ONES_LIKE, Arc::new(zero_grad)));
    engine.register_gradient(GradientConfig::new(names::ZEROS_LIKE, Arc::new(zero_grad)));
    engine.register_gradient(
        GradientConfig::new(names::SUM, Arc::new(sum_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::MEAN, Arc::new(mean_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(
        GradientConfig::new(names::MAT_MUL, Arc::new(matmul_grad)).save_inputs(&["a", "b"]),
    );
    engine.register_gradient(GradientConfig::new(names::TRANSPOSE, Arc::new(transpose_grad)));
    engine.register_gradient(
        GradientConfig::new(names::RESHAPE, Arc::new(reshape_grad)).save_inputs(&["x"]),
    );
    engine.register_gradient(GradientConfig::new(names::IDENTITY, Arc::new(identity_grad)));
    engine.register_gradient(GradientConfig::new(names::CAST, Arc::new(identity_grad)));
}

fn saved(ctx: &GradContext<'_>, kernel: &'static str, index: usize) -> Result<Tensor> {
    ctx.saved
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow!("gradient for '{kernel}' is missing saved tensor {index}"))
}

/// Collapses a gradient onto a scalar operand that was broadcast in the
/// forward pass.
fn reduce_to(engine: &Engine, grad: Tensor, target: &Tensor) -> Result<Tensor> {
    if target.shape().is_scalar() && !grad.shape().is_scalar() {
        ops::sum(engine, &grad)
    } else {
        Ok(grad)
    }
}

fn float_of(engine: &Engine, x: &Tensor) -> Result<Tensor> {
    if x.dtype() == DType::Float32 {
        Ok(x.clone())
    } else {
        ops::cast(engine, x, DType::Float32)
    }
}

fn add_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let a = saved(&ctx, names::ADD, 0)?;
    let b = saved(&ctx, names::ADD, 1)?;
    let dy_b = dy.clone();
    Ok(NamedGradientMap::new()
        .with("a", move || reduce_to(engine, dy, &a))
        .with("b", move || reduce_to(engine, dy_b, &b)))
}

fn sub_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let a = saved(&ctx, names::SUB, 0)?;
    let b = saved(&ctx, names::SUB, 1)?;
    let dy_b = dy.clone();
    Ok(NamedGradientMap::new()
        .with("a", move || reduce_to(engine, dy, &a))
        .with("b", move || {
            let grad = ops::neg(engine, &dy_b)?;
            reduce_to(engine, grad, &b)
        }))
}

fn multiply_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let a = saved(&ctx, names::MULTIPLY, 0)?;
    let b = saved(&ctx, names::MULTIPLY, 1)?;
    let (dy_a, a_a, b_a) = (dy.clone(), a.clone(), b.clone());
    Ok(NamedGradientMap::new()
        .with("a", move || {
            let grad = ops::mul(engine, &dy_a, &float_of(engine, &b_a)?)?;
            reduce_to(engine, grad, &a_a)
        })
        .with("b", move || {
            let grad = ops::mul(engine, &dy, &float_of(engine, &a)?)?;
            reduce_to(engine, grad, &b)
        }))
}

fn div_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let a = saved(&ctx, names::REAL_DIV, 0)?;
    let b = saved(&ctx, names::REAL_DIV, 1)?;
    let (dy_a, a_a, b_a) = (dy.clone(), a.clone(), b.clone());
    Ok(NamedGradientMap::new()
        .with("a", move || {
            let grad = ops::div(engine, &dy_a, &b_a)?;
            reduce_to(engine, grad, &a_a)
        })
        .with("b", move || {
            let numerator = ops::mul(engine, &dy, &a)?;
            let denominator = ops::mul(engine, &b, &b)?;
            let grad = ops::neg(engine, &ops::div(engine, &numerator, &denominator)?)?;
            reduce_to(engine, grad, &b)
        }))
}

fn neg_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    Ok(NamedGradientMap::new().with("x", move || ops::neg(engine, &dy)))
}

fn square_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::SQUARE, 0)?;
    Ok(NamedGradientMap::new().with("x", move || {
        let two = ops::scalar(engine, 2.0)?;
        let doubled = ops::mul(engine, &float_of(engine, &x)?, &two)?;
        ops::mul(engine, &dy, &doubled)
    }))
}

fn sqrt_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::SQRT, 0)?;
    Ok(NamedGradientMap::new().with("x", move || {
        let two = ops::scalar(engine, 2.0)?;
        let denom = ops::mul(engine, &ops::sqrt(engine, &x)?, &two)?;
        ops::div(engine, &dy, &denom)
    }))
}

fn exp_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let y = saved(&ctx, names::EXP, 0)?;
    Ok(NamedGradientMap::new().with("x", move || ops::mul(engine, &dy, &y)))
}

fn log_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::LOG, 0)?;
    Ok(NamedGradientMap::new().with("x", move || ops::div(engine, &dy, &x)))
}

fn relu_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::RELU, 0)?;
    Ok(NamedGradientMap::new()
        .with("x", move || ops::mul(engine, &dy, &ops::step(engine, &x)?)))
}

fn abs_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::ABS, 0)?;
    Ok(NamedGradientMap::new().with("x", move || {
        let sign = ops::sign(engine, &float_of(engine, &x)?)?;
        ops::mul(engine, &dy, &sign)
    }))
}

/// For ops whose output is constant with respect to the input.
fn zero_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    Ok(NamedGradientMap::new().with("x", move || ops::zeros(engine, dy.shape())))
}

fn sum_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::SUM, 0)?;
    Ok(NamedGradientMap::new().with("x", move || {
        let expanded = ops::ones(engine, x.shape())?;
        ops::mul(engine, &expanded, &dy)
    }))
}

fn mean_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::MEAN, 0)?;
    Ok(NamedGradientMap::new().with("x", move || {
        let count = ops::scalar(engine, x.size() as f32)?;
        let scaled = ops::div(engine, &dy, &count)?;
        let expanded = ops::ones(engine, x.shape())?;
        ops::mul(engine, &expanded, &scaled)
    }))
}

fn matmul_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let a = saved(&ctx, names::MAT_MUL, 0)?;
    let b = saved(&ctx, names::MAT_MUL, 1)?;
    let dy_b = dy.clone();
    Ok(NamedGradientMap::new()
        .with("a", move || {
            ops::matmul(engine, &dy, &ops::transpose(engine, &b)?)
        })
        .with("b", move || {
            ops::matmul(engine, &ops::transpose(engine, &a)?, &dy_b)
        }))
}

fn transpose_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    Ok(NamedGradientMap::new().with("x", move || ops::transpose(engine, &dy)))
}

fn reshape_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let engine = ctx.engine;
    let dy = ctx.dy().clone();
    let x = saved(&ctx, names::RESHAPE, 0)?;
    Ok(NamedGradientMap::new()
        .with("x", move || ops::reshape(engine, &dy, x.shape().dims())))
}

fn identity_grad<'a>(ctx: GradContext<'a>) -> Result<NamedGradientMap<'a>> {
    let dy = ctx.dy().clone();
    Ok(NamedGradientMap::new().with("x", move || Ok(dy)))
}
