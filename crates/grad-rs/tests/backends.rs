use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::executor::block_on;
use grad_rs::backend::KernelBackend;
use grad_rs::engine::Engine;
use grad_rs::error::BackendInitError;
use grad_rs::kernel::{KernelConfig, KernelParams};
use grad_rs::tensor::{DType, DataId, NamedTensors, Shape, TensorInfo, TensorValues};
use grad_rs_backend_tests::fixtures::{
    async_scratch_factory, failing_async_factory, AsyncOnlyBackend, ScratchBackend,
};
use grad_rs_backend_tests::test_util::expect_arrays_close;

/// Kernel that emits one scalar carrying a backend-identifying value.
fn probe_kernel(marker: f32) -> grad_rs::kernel::KernelFunc {
    Arc::new(move |params: KernelParams<'_>| {
        let backend = params
            .backend
            .as_any()
            .downcast_ref::<ScratchBackend>()
            .expect("scratch backend expected");
        let data_id = DataId::fresh();
        backend.insert(data_id, TensorValues::Float32(vec![marker]));
        Ok(vec![TensorInfo::new(
            data_id,
            Shape::scalar(),
            DType::Float32,
        )])
    })
}

#[test]
fn duplicate_backend_registration_keeps_the_existing_factory() {
    let engine = Engine::new();
    assert!(engine.register_backend(
        "twice",
        || Ok(Box::new(ScratchBackend::new("twice")) as Box<dyn KernelBackend>),
        1,
    ));
    assert!(!engine.register_backend(
        "twice",
        || Ok(Box::new(ScratchBackend::new("twice")) as Box<dyn KernelBackend>),
        9,
    ));
}

#[test]
fn async_factory_resolves_through_set_backend() {
    let engine = Engine::new();
    let invocations = Arc::new(AtomicUsize::new(0));
    engine.register_backend_async(
        "probe",
        async_scratch_factory("probe", Arc::clone(&invocations)),
        1,
    );

    block_on(engine.set_backend("probe")).unwrap();
    assert_eq!(engine.backend_name().as_deref(), Some("probe"));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // The resolved instance is cached; switching back does not re-run the
    // factory.
    block_on(engine.set_backend("probe")).unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[test]
fn ready_initializes_the_highest_priority_backend_that_succeeds() {
    let engine = Engine::new();
    let invocations = Arc::new(AtomicUsize::new(0));
    engine.register_backend_async("flaky", failing_async_factory("flaky"), 10);
    engine.register_backend_async(
        "fallback",
        async_scratch_factory("fallback", Arc::clone(&invocations)),
        1,
    );

    block_on(engine.ready()).unwrap();
    assert_eq!(engine.backend_name().as_deref(), Some("fallback"));
}

#[test]
fn ready_with_no_registered_backend_fails() {
    let engine = Engine::new();
    let err = block_on(engine.ready()).unwrap_err();
    assert!(matches!(err, BackendInitError::NoneRegistered));
}

#[test]
fn failed_set_backend_leaves_the_previous_backend_active() {
    let engine = Engine::new();
    engine.register_backend(
        "stable",
        || Ok(Box::new(ScratchBackend::new("stable")) as Box<dyn KernelBackend>),
        1,
    );
    engine.register_backend_async("broken", failing_async_factory("broken"), 1);

    block_on(engine.set_backend("stable")).unwrap();
    let err = block_on(engine.set_backend("broken")).unwrap_err();
    assert!(matches!(err, BackendInitError::Failed { .. }));
    assert_eq!(engine.backend_name().as_deref(), Some("stable"));
}

#[test]
fn set_backend_on_an_unknown_name_fails() {
    let engine = Engine::new();
    let err = block_on(engine.set_backend("nowhere")).unwrap_err();
    assert!(matches!(err, BackendInitError::UnknownBackend { .. }));
}

#[test]
fn switching_backends_routes_kernels_to_the_active_implementation() {
    let engine = Engine::new();
    engine.register_backend(
        "alpha",
        || Ok(Box::new(ScratchBackend::new("alpha")) as Box<dyn KernelBackend>),
        2,
    );
    engine.register_backend(
        "beta",
        || Ok(Box::new(ScratchBackend::new("beta")) as Box<dyn KernelBackend>),
        1,
    );
    engine
        .register_kernel(KernelConfig::new("Probe", "alpha", probe_kernel(1.0)))
        .unwrap();
    engine
        .register_kernel(KernelConfig::new("Probe", "beta", probe_kernel(2.0)))
        .unwrap();

    block_on(engine.set_backend("alpha")).unwrap();
    let from_alpha = engine
        .run_kernel("Probe", NamedTensors::new(), Default::default())
        .unwrap();
    let values = engine.read_sync(&from_alpha[0]).unwrap();
    expect_arrays_close(values.as_f32().unwrap(), &[1.0]);

    block_on(engine.set_backend("beta")).unwrap();
    let from_beta = engine
        .run_kernel("Probe", NamedTensors::new(), Default::default())
        .unwrap();
    let values = engine.read_sync(&from_beta[0]).unwrap();
    expect_arrays_close(values.as_f32().unwrap(), &[2.0]);
}

#[test]
fn inputs_move_to_the_active_backend_before_dispatch() {
    fn echo_kernel(params: KernelParams<'_>) -> grad_rs::error::BackendResult<Vec<TensorInfo>> {
        let backend = params
            .backend
            .as_any()
            .downcast_ref::<ScratchBackend>()
            .expect("scratch backend expected");
        let x = params.input("Echo", "x")?;
        let values = backend.values(x.data_id())?;
        let data_id = DataId::fresh();
        backend.insert(data_id, values);
        Ok(vec![TensorInfo::new(data_id, x.shape().clone(), x.dtype())])
    }

    let engine = Engine::new();
    engine.register_backend(
        "alpha",
        || Ok(Box::new(ScratchBackend::new("alpha")) as Box<dyn KernelBackend>),
        2,
    );
    engine.register_backend(
        "beta",
        || Ok(Box::new(ScratchBackend::new("beta")) as Box<dyn KernelBackend>),
        1,
    );
    engine
        .register_kernel(KernelConfig::new("Echo", "beta", Arc::new(echo_kernel)))
        .unwrap();

    block_on(engine.set_backend("alpha")).unwrap();
    let x = engine
        .make_tensor(vec![7.0f32, 8.0], Shape::new([2]))
        .unwrap();

    // The kernel only exists on beta; after the switch, x's storage must
    // follow for the kernel to read it there.
    block_on(engine.set_backend("beta")).unwrap();
    let inputs = NamedTensors::new().with("x", &x);
    let outputs = engine
        .run_kernel("Echo", inputs, Default::default())
        .unwrap();
    let values = engine.read_sync(&outputs[0]).unwrap();
    expect_arrays_close(values.as_f32().unwrap(), &[7.0, 8.0]);
}

#[test]
fn sync_reads_fail_fast_on_async_only_backends() {
    let engine = Engine::new();
    engine.register_backend(
        "deferred",
        || Ok(Box::new(AsyncOnlyBackend::new("deferred")) as Box<dyn KernelBackend>),
        1,
    );
    block_on(engine.set_backend("deferred")).unwrap();

    let x = engine
        .make_tensor(vec![1.0f32, 2.0], Shape::new([2]))
        .unwrap();
    let err = engine.read_sync(&x).unwrap_err();
    assert!(
        err.to_string().contains("synchronous read is not supported"),
        "got: {err}"
    );

    let values = block_on(engine.read(&x)).unwrap();
    expect_arrays_close(values.as_f32().unwrap(), &[1.0, 2.0]);
}

#[test]
fn remove_backend_disposes_the_instance_and_clears_the_active_slot() {
    let engine = Engine::new();
    engine.register_backend(
        "ephemeral",
        || Ok(Box::new(ScratchBackend::new("ephemeral")) as Box<dyn KernelBackend>),
        1,
    );
    block_on(engine.set_backend("ephemeral")).unwrap();
    assert_eq!(engine.backend_name().as_deref(), Some("ephemeral"));

    engine.remove_backend("ephemeral");
    assert_eq!(engine.backend_name(), None);
    assert!(engine.make_scalar(1.0).is_err());

    // Removing an absent backend is a silent no-op.
    engine.remove_backend("ephemeral");
}

#[test]
fn backend_names_sort_by_priority() {
    let engine = Engine::new();
    engine.register_backend(
        "low",
        || Ok(Box::new(ScratchBackend::new("low")) as Box<dyn KernelBackend>),
        1,
    );
    engine.register_backend(
        "high",
        || Ok(Box::new(ScratchBackend::new("high")) as Box<dyn KernelBackend>),
        5,
    );
    assert_eq!(engine.backend_names(), vec!["high", "low"]);
}
