//! Deterministic Simulation Testing (DST) for shared-fixture coordination.
//!
//! This crate provides in-memory fakes of the cloud, the cluster and the
//! manifest tool, kept separate from `efs-csi-e2e` so they are never compiled
//! into the library.
//!
//! ## Crate Structure
//!
//! - `harness` - Fakes, the multi-executor harness and its oracle
//! - `simulation` - Runtime and simulation runners
//!
//! ## Running DST Tests
//!
//! ```bash
//! # PR-level quick tests (100 suite runs)
//! cargo test -p efs-csi-e2e-dst simulation
//!
//! # Nightly long-running tests
//! cargo test -p efs-csi-e2e-dst simulation -- --ignored
//! ```

pub mod harness;
pub mod simulation;

pub use harness::{
    FakeCloud, FakeCluster, FakeManifests, FixtureHarness, FixtureOracle, FixturePlan,
    FixtureStats, SimulationError,
};
pub use simulation::{build_runtime, get_seed, init_logging, run_fixture_simulation};
