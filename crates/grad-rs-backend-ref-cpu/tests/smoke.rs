use grad_rs_backend_tests::{cpu_engine, suites};

#[test]
fn no_leak_after_tidy() {
    let engine = cpu_engine();
    suites::no_leak_after_tidy(&engine);
}

#[test]
fn gradient_shape_and_dtype_law() {
    let engine = cpu_engine();
    suites::gradient_shape_and_dtype_law(&engine);
}

#[test]
fn composite_gradient_cross_check() {
    let engine = cpu_engine();
    suites::composite_gradient_cross_check(&engine);
}

#[test]
fn backend_data_ids_match_engine_buffers() {
    use grad_rs::ops;
    use grad_rs::tensor::Shape;

    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0], Shape::new([3]))
        .unwrap();
    let y: grad_rs::Tensor = engine
        .tidy(|| {
            let squared = ops::square(&engine, &x)?;
            ops::sum(&engine, &squared)
        })
        .unwrap();

    // Engine buffer count and backend storage count must agree after scope
    // cleanup: x plus the surviving result.
    assert_eq!(engine.num_data_buffers(), 2);
    engine.dispose(&x).unwrap();
    engine.dispose(&y).unwrap();
    assert_eq!(engine.num_data_buffers(), 0);
}
