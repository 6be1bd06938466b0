//! Backend-generic conformance suites. Each function takes a fully wired
//! engine (backend + kernels + gradients registered) and panics on failure.

use grad_rs::engine::Engine;
use grad_rs::ops;
use grad_rs::tensor::{DType, Shape};

use crate::test_util::{expect_arrays_close, read_f32};

/// Scope exit must return tensor and buffer counts to their prior values.
pub fn no_leak_after_tidy(engine: &Engine) {
    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0], Shape::new([3]))
        .unwrap();
    let tensors_before = engine.num_tensors();
    let buffers_before = engine.num_data_buffers();

    let kept: grad_rs::Tensor = engine
        .tidy(|| {
            let a = ops::square(engine, &x)?;
            let b = ops::add(engine, &a, &x)?;
            let _dead = ops::mul(engine, &a, &b)?;
            ops::sum(engine, &b)
        })
        .unwrap();

    assert_eq!(engine.num_tensors(), tensors_before + 1);
    engine.dispose(&kept).unwrap();
    assert_eq!(engine.num_tensors(), tensors_before);
    assert_eq!(engine.num_data_buffers(), buffers_before);
}

/// `grad(f)(x)` must match `x` in shape, with float32 dtype, across ranks.
pub fn gradient_shape_and_dtype_law(engine: &Engine) {
    let cases: Vec<(Vec<f32>, Shape)> = vec![
        (vec![3.0], Shape::scalar()),
        (vec![1.0, 2.0, 3.0], Shape::new([3])),
        (vec![1.0, 2.0, 3.0, 4.0], Shape::new([2, 2])),
    ];
    for (values, shape) in cases {
        let x = engine.make_tensor(values, shape.clone()).unwrap();
        let grad = engine
            .grad(
                || {
                    let y = ops::square(engine, &x)?;
                    ops::sum(engine, &y)
                },
                &x,
                None,
            )
            .unwrap();
        assert_eq!(grad.shape(), &shape, "gradient shape law violated");
        assert_eq!(grad.dtype(), DType::Float32, "gradient dtype law violated");
        engine.dispose(&x).unwrap();
        engine.dispose(&grad).unwrap();
    }
}

/// The tape-computed gradient of a composite expression must match the
/// hand-derived closed form.
pub fn composite_gradient_cross_check(engine: &Engine) {
    // f(x) = sum(relu(x W)) with W fixed; df/dx = step(xW) W^T.
    let x = engine
        .make_tensor(vec![2.0f32, 1.0], Shape::new([1, 2]))
        .unwrap();
    let w = engine
        .make_tensor(vec![1.0f32, -1.0, 0.5, 2.0], Shape::new([2, 2]))
        .unwrap();

    let grad = engine
        .grad(
            || {
                let product = ops::matmul(engine, &x, &w)?;
                let activated = ops::relu(engine, &product)?;
                ops::sum(engine, &activated)
            },
            &x,
            None,
        )
        .unwrap();

    // x W = [2.5, 0]; step = [1, 0]; grad = step W^T = [1*1 + 0*-1, 1*0.5 + 0*2].
    expect_arrays_close(&read_f32(engine, &grad), &[1.0, 0.5]);

    // grad(square(x)) must equal grad(x * x).
    let v = engine
        .make_tensor(vec![2.0f32, -3.0], Shape::new([2]))
        .unwrap();
    let via_square = engine
        .grad(
            || {
                let y = ops::square(engine, &v)?;
                ops::sum(engine, &y)
            },
            &v,
            None,
        )
        .unwrap();
    let via_mul = engine
        .grad(
            || {
                let y = ops::mul(engine, &v, &v)?;
                ops::sum(engine, &y)
            },
            &v,
            None,
        )
        .unwrap();
    expect_arrays_close(&read_f32(engine, &via_square), &read_f32(engine, &via_mul));

    for tensor in [&x, &w, &grad, &v, &via_square, &via_mul] {
        engine.dispose(tensor).unwrap();
    }
}
