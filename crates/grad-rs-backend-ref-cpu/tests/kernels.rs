use grad_rs::ops;
use grad_rs::tensor::{DType, Shape};
use grad_rs_backend_tests::cpu_engine;
use grad_rs_backend_tests::test_util::{expect_arrays_close, read_f32};

#[test]
fn elementwise_binary_kernels() {
    let engine = cpu_engine();
    let a = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0], Shape::new([3]))
        .unwrap();
    let b = engine
        .make_tensor(vec![4.0f32, 5.0, 6.0], Shape::new([3]))
        .unwrap();

    expect_arrays_close(
        &read_f32(&engine, &ops::add(&engine, &a, &b).unwrap()),
        &[5.0, 7.0, 9.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::sub(&engine, &a, &b).unwrap()),
        &[-3.0, -3.0, -3.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::mul(&engine, &a, &b).unwrap()),
        &[4.0, 10.0, 18.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::div(&engine, &a, &b).unwrap()),
        &[0.25, 0.4, 0.5],
    );
}

#[test]
fn scalar_operands_broadcast() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0], Shape::new([3]))
        .unwrap();
    let ten = ops::scalar(&engine, 10.0).unwrap();

    let shifted = ops::add(&engine, &x, &ten).unwrap();
    assert_eq!(shifted.shape().dims(), &[3]);
    expect_arrays_close(&read_f32(&engine, &shifted), &[11.0, 12.0, 13.0]);

    let scaled = ops::mul(&engine, &ten, &x).unwrap();
    expect_arrays_close(&read_f32(&engine, &scaled), &[10.0, 20.0, 30.0]);
}

#[test]
fn mismatched_shapes_are_rejected_before_dispatch() {
    let engine = cpu_engine();
    let a = engine
        .make_tensor(vec![1.0f32, 2.0], Shape::new([2]))
        .unwrap();
    let b = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0], Shape::new([3]))
        .unwrap();
    let err = ops::add(&engine, &a, &b).unwrap_err();
    assert!(err.to_string().contains("incompatible"));
}

#[test]
fn unary_kernels() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![-4.0f32, 0.0, 9.0], Shape::new([3]))
        .unwrap();

    expect_arrays_close(
        &read_f32(&engine, &ops::neg(&engine, &x).unwrap()),
        &[4.0, 0.0, -9.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::abs(&engine, &x).unwrap()),
        &[4.0, 0.0, 9.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::relu(&engine, &x).unwrap()),
        &[0.0, 0.0, 9.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::step(&engine, &x).unwrap()),
        &[0.0, 0.0, 1.0],
    );
    expect_arrays_close(
        &read_f32(&engine, &ops::sign(&engine, &x).unwrap()),
        &[-1.0, 0.0, 1.0],
    );

    let positive = engine
        .make_tensor(vec![1.0f32, 4.0, 9.0], Shape::new([3]))
        .unwrap();
    expect_arrays_close(
        &read_f32(&engine, &ops::sqrt(&engine, &positive).unwrap()),
        &[1.0, 2.0, 3.0],
    );
    let exped = ops::exp(&engine, &ops::log(&engine, &positive).unwrap()).unwrap();
    expect_arrays_close(&read_f32(&engine, &exped), &[1.0, 4.0, 9.0]);
}

#[test]
fn reductions() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0, 4.0], Shape::new([2, 2]))
        .unwrap();

    let total = ops::sum(&engine, &x).unwrap();
    assert!(total.shape().is_scalar());
    expect_arrays_close(&read_f32(&engine, &total), &[10.0]);

    let average = ops::mean(&engine, &x).unwrap();
    expect_arrays_close(&read_f32(&engine, &average), &[2.5]);

    let ints = engine
        .make_tensor(vec![1i32, 2, 3], Shape::new([3]))
        .unwrap();
    let int_total = ops::sum(&engine, &ints).unwrap();
    assert_eq!(int_total.dtype(), DType::Int32);
    assert_eq!(
        engine.read_sync(&int_total).unwrap().as_i32().unwrap(),
        &[6]
    );
}

#[test]
fn matmul_and_transpose() {
    let engine = cpu_engine();
    let a = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0, 4.0], Shape::new([2, 2]))
        .unwrap();
    let b = engine
        .make_tensor(vec![5.0f32, 6.0, 7.0, 8.0], Shape::new([2, 2]))
        .unwrap();

    let product = ops::matmul(&engine, &a, &b).unwrap();
    expect_arrays_close(&read_f32(&engine, &product), &[19.0, 22.0, 43.0, 50.0]);

    let rect = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new([2, 3]))
        .unwrap();
    let flipped = ops::transpose(&engine, &rect).unwrap();
    assert_eq!(flipped.shape().dims(), &[3, 2]);
    expect_arrays_close(&read_f32(&engine, &flipped), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

    let bad = ops::matmul(&engine, &rect, &rect);
    assert!(bad.is_err());
}

#[test]
fn fill_and_like_kernels() {
    let engine = cpu_engine();
    let filled = ops::fill(&engine, &Shape::new([2, 2]), 3.5, DType::Float32).unwrap();
    expect_arrays_close(&read_f32(&engine, &filled), &[3.5, 3.5, 3.5, 3.5]);

    let zeros = ops::zeros_like(&engine, &filled).unwrap();
    expect_arrays_close(&read_f32(&engine, &zeros), &[0.0, 0.0, 0.0, 0.0]);

    let ones = ops::ones_like(&engine, &filled).unwrap();
    expect_arrays_close(&read_f32(&engine, &ones), &[1.0, 1.0, 1.0, 1.0]);

    let int_fill = ops::fill(&engine, &Shape::new([2]), 7.0, DType::Int32).unwrap();
    assert_eq!(
        engine.read_sync(&int_fill).unwrap().as_i32().unwrap(),
        &[7, 7]
    );
}

#[test]
fn cast_kernel_converts_between_dtypes() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![0.0f32, 1.5, -2.0], Shape::new([3]))
        .unwrap();

    let ints = ops::cast(&engine, &x, DType::Int32).unwrap();
    assert_eq!(
        engine.read_sync(&ints).unwrap().as_i32().unwrap(),
        &[0, 1, -2]
    );

    let bools = ops::cast(&engine, &x, DType::Bool).unwrap();
    assert_eq!(
        engine.read_sync(&bools).unwrap().as_bool().unwrap(),
        &[false, true, true]
    );

    let back = ops::cast(&engine, &bools, DType::Float32).unwrap();
    expect_arrays_close(&read_f32(&engine, &back), &[0.0, 1.0, 1.0]);
}
