//! Simulation harnesses for shared-fixture coordination.
//!
//! Harnesses provide the infrastructure for running deterministic simulations:
//! - In-memory fakes of the cloud, the cluster and the manifest tool
//! - An oracle deriving the expected side effects from a sampled plan
//! - Statistics tracking

pub mod cloud;
pub mod cluster;
pub mod fixture;
pub mod manifest;

pub use cloud::{FakeCloud, FileSystem, FileSystemStore};
pub use cluster::FakeCluster;
pub use fixture::{FixtureHarness, FixtureOracle, FixturePlan, FixtureStats};
pub use manifest::FakeManifests;

/// Error type for simulation failures.
#[derive(Debug)]
pub enum SimulationError {
    Mismatch { context: String },
    Unexpected(String),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mismatch { context } => write!(f, "oracle mismatch: {}", context),
            Self::Unexpected(msg) => write!(f, "unexpected error: {}", msg),
        }
    }
}

impl std::error::Error for SimulationError {}
