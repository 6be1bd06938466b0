//! Conformance suites and fixtures shared by grad-rs backend crates.

pub mod fixtures;
pub mod suites;
pub mod test_util;

use grad_rs::engine::Engine;

/// A fresh isolated engine wired with the reference CPU backend and the core
/// gradient set.
pub fn cpu_engine() -> Engine {
    let engine = Engine::new();
    grad_rs_backend_ref_cpu::register_cpu_backend(&engine).expect("cpu kernel registration failed");
    grad_rs::gradients::register_all(&engine);
    engine
}
