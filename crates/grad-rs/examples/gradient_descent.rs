//! Fits a scalar linear model y = w*x + b by gradient descent on the CPU
//! backend, exercising variables, the tape, and scope cleanup.
//!
//! Run with: cargo run -p grad-rs --example gradient_descent

use anyhow::Result;
use grad_rs::engine::Engine;
use grad_rs::ops;
use grad_rs::tensor::Shape;

fn main() -> Result<()> {
    let engine = Engine::new();
    grad_rs_backend_ref_cpu::register_cpu_backend(&engine)?;
    grad_rs::gradients::register_all(&engine);

    // Data for y = 3x + 2.
    let xs = engine.make_tensor(vec![0.0f32, 1.0, 2.0, 3.0], Shape::new([4]))?;
    let ys = engine.make_tensor(vec![2.0f32, 5.0, 8.0, 11.0], Shape::new([4]))?;

    let w_init = engine.make_scalar(0.0)?;
    let b_init = engine.make_scalar(0.0)?;
    let mut w = engine.make_variable("w", &w_init, true)?;
    let mut b = engine.make_variable("b", &b_init, true)?;

    let learning_rate = 0.05f32;
    for step in 0..200 {
        let (loss, grads) = engine.variable_grads(
            || {
                let predicted = ops::add(&engine, &ops::mul(&engine, w.tensor(), &xs)?, b.tensor())?;
                let residual = ops::sub(&engine, &predicted, &ys)?;
                ops::mean(&engine, &ops::square(&engine, &residual)?)
            },
            None,
        )?;

        for (name, grad) in &grads {
            let variable = if name == "w" { &mut w } else { &mut b };
            let updated: grad_rs::Tensor = engine.tidy(|| {
                let rate = ops::scalar(&engine, learning_rate)?;
                let delta = ops::mul(&engine, grad, &rate)?;
                ops::sub(&engine, variable.tensor(), &delta)
            })?;
            engine.assign_variable(variable, &updated)?;
            engine.dispose(&updated)?;
        }

        if step % 50 == 0 {
            let loss_value = engine.read_sync(&loss)?;
            println!("step {step:3}: loss = {:.6}", loss_value.as_f32()?[0]);
        }
        engine.dispose(&loss)?;
        for (_, grad) in grads {
            engine.dispose(&grad)?;
        }
    }

    let w_value = engine.read_sync(w.tensor())?;
    let b_value = engine.read_sync(b.tensor())?;
    println!(
        "fitted: w = {:.3}, b = {:.3} (memory: {:?})",
        w_value.as_f32()?[0],
        b_value.as_f32()?[0],
        engine.memory()
    );
    Ok(())
}
