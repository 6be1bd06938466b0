//! Shared assertion helpers.

use grad_rs::engine::Engine;
use grad_rs::tensor::Tensor;

const EPSILON: f32 = 1e-5;

/// Reads a float tensor back to the host, panicking on failure.
pub fn read_f32(engine: &Engine, tensor: &Tensor) -> Vec<f32> {
    engine
        .read_sync(tensor)
        .expect("tensor readback failed")
        .as_f32()
        .expect("expected float32 values")
        .to_vec()
}

/// Asserts elementwise closeness within a fixed tolerance.
pub fn expect_arrays_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "length mismatch: {actual:?} vs {expected:?}"
    );
    for (index, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() < EPSILON,
            "value mismatch at index {index}: {a} vs {e} (actual {actual:?}, expected {expected:?})"
        );
    }
}
