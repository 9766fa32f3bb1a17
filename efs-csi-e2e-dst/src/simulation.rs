//! Simulation runners and utilities.
//!
//! This module provides helper functions to run deterministic simulations.
//!
//! ## Usage
//!
//! ```bash
//! DST_SEED=1234 RUST_LOG=efs_csi_e2e=debug cargo test -p efs-csi-e2e-dst
//! ```

use tracing_subscriber::EnvFilter;

use crate::harness::{FixtureHarness, SimulationError};

/// Build a single-threaded tokio runtime for simulation.
///
/// Every executor runs on the same task, so scheduling follows the order in
/// which futures are polled and the plan sampled from the seed.
pub fn build_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// Install a fmt subscriber filtered by `RUST_LOG`. Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("efs_csi_e2e=info,warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Run a shared-fixture simulation with the given seed.
pub async fn run_fixture_simulation(
    seed: u64,
    max_executors: usize,
    iterations: u64,
) -> Result<(), SimulationError> {
    eprintln!(
        "Fixture simulation: seed={}, max_executors={}, iterations={}",
        seed, max_executors, iterations
    );

    let mut harness = FixtureHarness::new(seed, max_executors);
    harness.run(iterations).await?;

    let stats = harness.stats();
    eprintln!("Fixture simulation complete: {:?}", stats);
    Ok(())
}

/// Get the seed from environment or generate a random one.
pub fn get_seed() -> u64 {
    std::env::var("DST_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(rand::random)
}
