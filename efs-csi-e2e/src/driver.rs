//! Driver deployment detection, deployment and removal.

use std::sync::Arc;

use tracing::info;

use crate::cluster::DriverRegistry;
use crate::error::{ManifestError, SetupError};
use crate::manifest::ManifestTool;

pub const DRIVER_NAME: &str = "efs.csi.aws.com";

/// What [`DriverDeployment::ensure_deployed`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// A driver was already registered; someone else owns it.
    AlreadyPresent,
    /// This run applied the manifest and must remove it at teardown.
    Deployed,
}

impl DeployOutcome {
    pub fn owns_teardown(self) -> bool {
        matches!(self, Self::Deployed)
    }
}

/// Deploys the driver from a manifest reference unless it is already registered.
#[derive(Clone)]
pub struct DriverDeployment {
    registry: Arc<dyn DriverRegistry>,
    manifests: Arc<dyn ManifestTool>,
    reference: String,
}

impl DriverDeployment {
    pub fn new(
        registry: Arc<dyn DriverRegistry>,
        manifests: Arc<dyn ManifestTool>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            manifests,
            reference: reference.into(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Look up the driver registration and deploy only if it is missing.
    ///
    /// Lookup errors other than "not found" are fatal.
    pub async fn ensure_deployed(&self) -> Result<DeployOutcome, SetupError> {
        match self.registry.get_csi_driver(DRIVER_NAME).await {
            Ok(()) => {
                info!(driver = DRIVER_NAME, "using already-deployed driver");
                Ok(DeployOutcome::AlreadyPresent)
            }
            Err(e) if e.is_not_found() => {
                info!(driver = DRIVER_NAME, reference = %self.reference, "deploying driver");
                self.manifests
                    .apply(&self.reference)
                    .await
                    .map_err(|source| SetupError::DriverDeploy {
                        reference: self.reference.clone(),
                        source,
                    })?;
                info!(driver = DRIVER_NAME, "deployed driver");
                Ok(DeployOutcome::Deployed)
            }
            Err(source) => Err(SetupError::DriverLookup {
                driver: DRIVER_NAME.to_string(),
                source,
            }),
        }
    }

    pub async fn remove(&self) -> Result<(), ManifestError> {
        info!(driver = DRIVER_NAME, reference = %self.reference, "cleaning up driver");
        self.manifests.delete(&self.reference).await
    }
}
