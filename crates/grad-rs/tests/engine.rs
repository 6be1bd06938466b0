use grad_rs::engine::Engine;
use grad_rs::ops;
use grad_rs::tensor::{DType, Shape, TensorValues};
use grad_rs_backend_tests::cpu_engine;
use grad_rs_backend_tests::test_util::{expect_arrays_close, read_f32};

#[test]
fn make_tensor_roundtrips_values() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.5f32, -2.0, 3.25], Shape::new([3]))
        .unwrap();
    assert_eq!(x.dtype(), DType::Float32);
    assert_eq!(x.size(), 3);
    expect_arrays_close(&read_f32(&engine, &x), &[1.5, -2.0, 3.25]);
}

#[test]
fn make_tensor_rejects_length_mismatch() {
    let engine = cpu_engine();
    let err = engine
        .make_tensor(vec![1.0f32, 2.0], Shape::new([3]))
        .unwrap_err();
    assert!(err.to_string().contains("elements"));
}

#[test]
fn memory_reports_live_counts_and_bytes() {
    let engine = cpu_engine();
    let before = engine.memory();

    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0, 4.0], Shape::new([4]))
        .unwrap();
    let after = engine.memory();
    assert_eq!(after.num_tensors, before.num_tensors + 1);
    assert_eq!(after.num_data_buffers, before.num_data_buffers + 1);
    assert_eq!(after.num_bytes, before.num_bytes + 16);
    assert!(!after.unreliable);

    engine.dispose(&x).unwrap();
    let end = engine.memory();
    assert_eq!(end.num_tensors, before.num_tensors);
    assert_eq!(end.num_data_buffers, before.num_data_buffers);
    assert_eq!(end.num_bytes, before.num_bytes);
}

#[test]
fn string_tensors_mark_memory_unreliable() {
    let engine = cpu_engine();
    let s = engine
        .make_tensor(
            TensorValues::Str(vec!["alpha".to_string(), "beta".to_string()]),
            Shape::new([2]),
        )
        .unwrap();
    let info = engine.memory();
    assert!(info.unreliable);
    assert!(!info.reasons.is_empty());

    engine.dispose(&s).unwrap();
    assert!(!engine.memory().unreliable);
}

#[test]
fn double_dispose_fails_loudly() {
    let engine = cpu_engine();
    let x = engine.make_scalar(1.0).unwrap();
    engine.dispose(&x).unwrap();
    let err = engine.dispose(&x).unwrap_err();
    assert!(err.to_string().contains("disposed"));
}

#[test]
fn ops_on_disposed_tensors_fail() {
    let engine = cpu_engine();
    let x = engine.make_scalar(2.0).unwrap();
    engine.dispose(&x).unwrap();
    let err = ops::square(&engine, &x).unwrap_err();
    assert!(err.to_string().contains("disposed"));
}

#[test]
fn tidy_disposes_intermediates_and_promotes_the_result() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.0f32, 2.0], Shape::new([2]))
        .unwrap();
    let tensors_before = engine.num_tensors();
    let buffers_before = engine.num_data_buffers();

    let result: grad_rs::Tensor = engine
        .tidy(|| {
            let squared = ops::square(&engine, &x)?;
            let doubled = ops::add(&engine, &squared, &squared)?;
            ops::sum(&engine, &doubled)
        })
        .unwrap();

    assert_eq!(engine.num_tensors(), tensors_before + 1);
    expect_arrays_close(&read_f32(&engine, &result), &[10.0]);

    engine.dispose(&result).unwrap();
    assert_eq!(engine.num_tensors(), tensors_before);
    assert_eq!(engine.num_data_buffers(), buffers_before);
}

#[test]
fn nested_tidy_only_disposes_the_inner_scope() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![3.0f32, 4.0], Shape::new([2]))
        .unwrap();

    let outer: grad_rs::Tensor = engine
        .tidy(|| {
            let outer_tensor = ops::square(&engine, &x)?;
            let inner: grad_rs::Tensor =
                engine.tidy(|| ops::add(&engine, &outer_tensor, &outer_tensor))?;
            // The outer scope's tensor must have survived the inner scope.
            expect_arrays_close(&read_f32(&engine, &outer_tensor), &[9.0, 16.0]);
            ops::sum(&engine, &inner)
        })
        .unwrap();

    expect_arrays_close(&read_f32(&engine, &outer), &[50.0]);
}

#[test]
fn keep_excludes_a_tensor_from_scope_disposal() {
    let engine = cpu_engine();
    let x = engine.make_scalar(5.0).unwrap();

    let mut kept_handle = None;
    let _: () = engine
        .tidy(|| {
            let intermediate = ops::square(&engine, &x)?;
            engine.keep(&intermediate)?;
            kept_handle = Some(intermediate);
            Ok(())
        })
        .unwrap();

    let kept = kept_handle.unwrap();
    expect_arrays_close(&read_f32(&engine, &kept), &[25.0]);
    engine.dispose(&kept).unwrap();
}

#[test]
fn tidy_disposes_on_the_error_path() {
    let engine = cpu_engine();
    let x = engine.make_scalar(1.0).unwrap();
    let tensors_before = engine.num_tensors();

    let result: anyhow::Result<grad_rs::Tensor> = engine.tidy(|| {
        let _intermediate = ops::square(&engine, &x)?;
        anyhow::bail!("forward failed")
    });
    assert!(result.is_err());
    assert_eq!(engine.num_tensors(), tensors_before);
}

#[test]
fn reshape_aliases_storage_and_refcounts_it() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1.0f32, 2.0, 3.0, 4.0], Shape::new([2, 2]))
        .unwrap();
    let buffers_before = engine.num_data_buffers();

    let flat = ops::reshape(&engine, &x, &[4]).unwrap();
    assert_eq!(flat.shape().dims(), &[4]);
    // Same storage, two handles.
    assert_eq!(flat.data_id(), x.data_id());
    assert_eq!(engine.num_data_buffers(), buffers_before);

    engine.dispose(&x).unwrap();
    // The alias keeps the buffer alive.
    expect_arrays_close(&read_f32(&engine, &flat), &[1.0, 2.0, 3.0, 4.0]);
    engine.dispose(&flat).unwrap();
    assert_eq!(engine.num_data_buffers(), buffers_before - 1);
}

#[test]
fn cast_and_int_tensors() {
    let engine = cpu_engine();
    let x = engine
        .make_tensor(vec![1i32, -2, 3], Shape::new([3]))
        .unwrap();
    assert_eq!(x.dtype(), DType::Int32);

    let as_float = ops::cast(&engine, &x, DType::Float32).unwrap();
    expect_arrays_close(&read_f32(&engine, &as_float), &[1.0, -2.0, 3.0]);

    let squared = ops::square(&engine, &x).unwrap();
    let values = engine.read_sync(&squared).unwrap();
    assert_eq!(values.as_i32().unwrap(), &[1, 4, 9]);
}

#[test]
fn variables_register_assign_and_dispose() {
    let engine = cpu_engine();
    let initial = engine
        .make_tensor(vec![1.0f32, 2.0], Shape::new([2]))
        .unwrap();
    let mut weights = engine.make_variable("weights", &initial, true).unwrap();
    assert!(weights.trainable());
    assert_eq!(engine.variable_names(), vec!["weights".to_string()]);

    // Duplicate names are rejected.
    let err = engine
        .make_variable("weights", &initial, true)
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));

    let update = engine
        .make_tensor(vec![10.0f32, 20.0], Shape::new([2]))
        .unwrap();
    engine.assign_variable(&mut weights, &update).unwrap();
    expect_arrays_close(&read_f32(&engine, weights.tensor()), &[10.0, 20.0]);

    // Shape changes are rejected.
    let wrong = engine.make_scalar(0.0).unwrap();
    assert!(engine.assign_variable(&mut weights, &wrong).is_err());

    engine.dispose_variables();
    assert!(engine.variable_names().is_empty());
}

#[test]
fn variable_storage_survives_tidy() {
    let engine = cpu_engine();
    let initial = engine
        .make_tensor(vec![2.0f32, 3.0], Shape::new([2]))
        .unwrap();
    let weights = engine
        .tidy(|| {
            let variable = engine.make_variable("w", &initial, true)?;
            Ok(variable.tensor().clone())
        })
        .unwrap();
    // The variable handle is kept; tidy must not free it.
    expect_arrays_close(&read_f32(&engine, &weights), &[2.0, 3.0]);
}

#[test]
fn reset_clears_state_but_keeps_factories() {
    let engine = cpu_engine();
    let x = engine.make_scalar(7.0).unwrap();
    assert!(engine.num_tensors() > 0);

    engine.reset();
    assert_eq!(engine.num_tensors(), 0);
    assert_eq!(engine.num_data_buffers(), 0);
    assert!(engine.read_sync(&x).is_err());

    // The cpu factory survives the reset, so new work still runs.
    let y = engine.make_scalar(1.0).unwrap();
    let z = ops::add(&engine, &y, &y).unwrap();
    expect_arrays_close(&read_f32(&engine, &z), &[2.0]);
}
