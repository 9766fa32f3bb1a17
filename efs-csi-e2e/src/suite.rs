//! The driver descriptor handed to the generic storage test suites.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::driver::DRIVER_NAME;
use crate::error::HandleError;
use crate::fixture::FixtureState;
use crate::types::VolumeHandle;
use crate::volume::CsiVolumeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Persistence,
    Exec,
    MultiPods,
    Rwx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub supported_fs_types: BTreeSet<String>,
    pub supported_mount_options: BTreeSet<String>,
    pub capabilities: BTreeMap<Capability, bool>,
}

impl DriverInfo {
    fn efs() -> Self {
        Self {
            name: DRIVER_NAME.to_string(),
            // Only the default fs type.
            supported_fs_types: BTreeSet::from([String::new()]),
            supported_mount_options: ["tls", "ro"].into_iter().map(String::from).collect(),
            capabilities: [
                Capability::Persistence,
                Capability::Exec,
                Capability::MultiPods,
                Capability::Rwx,
            ]
            .into_iter()
            .map(|c| (c, true))
            .collect(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.get(&capability).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerTestConfig {
    pub prefix: &'static str,
    pub namespace: String,
}

/// A pre-provisioned-volume driver backed by the shared file system.
///
/// The generic suites create their own claims and volumes from
/// [`persistent_volume_source`](Self::persistent_volume_source); the driver
/// never creates volumes itself.
#[derive(Debug, Clone)]
pub struct EfsDriver {
    info: DriverInfo,
    file_system_id: String,
}

impl EfsDriver {
    pub fn new(fixture: &FixtureState) -> Self {
        Self {
            info: DriverInfo::efs(),
            file_system_id: fixture.file_system_id().to_string(),
        }
    }

    pub fn driver_info(&self) -> &DriverInfo {
        &self.info
    }

    pub fn prepare_test(&self, namespace: impl Into<String>) -> PerTestConfig {
        PerTestConfig {
            prefix: "efs",
            namespace: namespace.into(),
        }
    }

    /// Volume source addressing the root of the shared file system. No node
    /// affinity applies.
    pub fn persistent_volume_source(
        &self,
        read_only: bool,
        fs_type: &str,
    ) -> Result<CsiVolumeSource, HandleError> {
        Ok(CsiVolumeSource {
            driver: self.info.name.clone(),
            volume_handle: VolumeHandle::encode(&self.file_system_id, "")?,
            read_only,
            fs_type: fs_type.to_string(),
        })
    }
}

/// Generic storage suites run against the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSuiteKind {
    Volumes,
    VolumeIo,
    VolumeMode,
    SubPath,
    Provisioning,
    MultiVolume,
}

impl fmt::Display for TestSuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Volumes => "volumes",
            Self::VolumeIo => "volumeIO",
            Self::VolumeMode => "volumeMode",
            Self::SubPath => "subPath",
            Self::Provisioning => "provisioning",
            Self::MultiVolume => "multiVolume",
        };
        f.write_str(name)
    }
}

/// Suites in the order they are defined.
pub const CSI_TEST_SUITES: [TestSuiteKind; 6] = [
    TestSuiteKind::Volumes,
    TestSuiteKind::VolumeIo,
    TestSuiteKind::VolumeMode,
    TestSuiteKind::SubPath,
    TestSuiteKind::Provisioning,
    TestSuiteKind::MultiVolume,
];

/// The external framework that owns the generic suites.
pub trait SuiteRunner {
    fn define(&mut self, suite: TestSuiteKind, driver: &EfsDriver);
}

pub fn define_test_suites(runner: &mut dyn SuiteRunner, driver: &EfsDriver) {
    for suite in CSI_TEST_SUITES {
        runner.define(suite, driver);
    }
}

pub fn driver_name_with_feature_tags(driver: &EfsDriver) -> String {
    format!("[Driver: {}]", driver.driver_info().name)
}
