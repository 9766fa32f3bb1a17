//! efs-csi-e2e: shared-fixture coordination for end-to-end validation of the
//! EFS CSI driver.
//!
//! A suite runs in many parallel executors against one network file system.
//! One executor (the leader) resolves the fixture: it creates the file system
//! or adopts a configured one, and deploys the driver if none is registered.
//! It broadcasts the file system id to every other executor and tears down
//! only what it created once every executor is done.
//!
//! Test cases address subpaths of the shared file system through volume
//! handles of the form `<file-system-id>[:<subpath>]`; see
//! [`PathIsolationScenario`].

pub mod cleanup;
pub mod cloud;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod manifest;
pub mod scenario;
pub mod suite;
pub mod types;
pub mod volume;

pub use cloud::FileSystemProvisioner;
pub use cluster::{ClusterClient, DriverRegistry};
pub use config::{Config, ScenarioConfig, SharedFixtureConfig};
pub use driver::{DRIVER_NAME, DriverDeployment};
pub use error::{ScenarioError, SetupError, TeardownError};
pub use fixture::{FixtureCoordinator, FixtureState, Role};
pub use manifest::{Kubectl, ManifestTool};
pub use scenario::PathIsolationScenario;
pub use suite::EfsDriver;
pub use types::VolumeHandle;
pub use volume::VolumeBinding;

#[cfg(test)]
pub(crate) mod test_util;
