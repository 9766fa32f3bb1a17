//! Shared fixture coordination across parallel executors.
//!
//! The embedding test runner assigns roles. Exactly one executor calls
//! [`FixtureCoordinator::resolve_fixture`] and broadcasts
//! [`FixtureState::payload`]; every other executor calls
//! [`FixtureState::adopt`] with that payload. After all executors finish their
//! test cases, each calls [`FixtureCoordinator::teardown`] with its own state;
//! only the leader's state carries teardown responsibilities.

mod state;

pub use state::{FixtureState, Role};

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cloud::FileSystemProvisioner;
use crate::cluster::DriverRegistry;
use crate::config::SharedFixtureConfig;
use crate::driver::DriverDeployment;
use crate::error::{CloudError, ConfigError, SetupError, TeardownError, TeardownFailure};
use crate::manifest::ManifestTool;
use crate::types::HANDLE_SEPARATOR;

/// Provisions the shared fixture on the leader and tears it down afterwards.
pub struct FixtureCoordinator {
    config: SharedFixtureConfig,
    cloud: Arc<dyn FileSystemProvisioner>,
    deployment: DriverDeployment,
}

impl FixtureCoordinator {
    pub fn new(
        config: SharedFixtureConfig,
        cloud: Arc<dyn FileSystemProvisioner>,
        registry: Arc<dyn DriverRegistry>,
        manifests: Arc<dyn ManifestTool>,
    ) -> Self {
        let deployment = DriverDeployment::new(registry, manifests, config.driver_manifest.clone());
        Self {
            config,
            cloud,
            deployment,
        }
    }

    /// Leader-only setup: validate the configuration, create the file system
    /// and deploy the driver as configured.
    ///
    /// Every error is fatal to the suite. A file system created before a later
    /// step fails is not deleted; its id is logged for out-of-band cleanup.
    pub async fn resolve_fixture(&self) -> Result<FixtureState, SetupError> {
        self.config.validate()?;
        if let Some(id) = self.config.ignored_file_system_id() {
            warn!(
                file_system_id = id,
                "create_file_system is set, ignoring pre-existing file system"
            );
        }

        let (file_system_id, delete_file_system) = if self.config.create_file_system {
            (self.create_file_system().await?, true)
        } else {
            let id = self
                .config
                .existing_file_system_id()
                .ok_or(ConfigError::MissingFileSystem)?;
            info!(file_system_id = id, "using existing filesystem");
            (id.to_string(), false)
        };

        let destroy_driver = if self.config.deploy_driver {
            match self.deployment.ensure_deployed().await {
                Ok(outcome) => outcome.owns_teardown(),
                Err(e) => {
                    if delete_file_system {
                        error!(
                            file_system_id = %file_system_id,
                            error = %e,
                            "setup failed after creating filesystem; it must be deleted manually"
                        );
                    }
                    return Err(e);
                }
            }
        } else {
            false
        };

        Ok(FixtureState::leader(
            file_system_id,
            delete_file_system,
            destroy_driver,
        ))
    }

    async fn create_file_system(&self) -> Result<String, SetupError> {
        let (region, cluster) = (&self.config.region, &self.config.cluster_name);
        info!(region = %region, cluster = %cluster, "creating filesystem");

        let id = self
            .cloud
            .create_file_system(cluster)
            .await
            .map_err(|source| SetupError::Provision {
                operation: "creating file system",
                source,
            })?;

        let reason = if id.is_empty() {
            Some("empty")
        } else if id.contains(HANDLE_SEPARATOR) {
            Some("contains the handle separator")
        } else {
            None
        };
        if let Some(reason) = reason {
            error!(
                file_system_id = %id,
                cluster = %cluster,
                reason,
                "created filesystem has an unusable id; it must be deleted manually"
            );
            return Err(SetupError::Provision {
                operation: "creating file system",
                source: CloudError::InvalidFileSystemId {
                    file_system_id: id,
                    reason,
                },
            });
        }

        info!(file_system_id = %id, "created filesystem");
        Ok(id)
    }

    /// Tear down whatever `state` is responsible for.
    ///
    /// Followers do nothing. The leader attempts every step even if an
    /// earlier one fails and reports all failures together.
    pub async fn teardown(&self, state: &FixtureState) -> Result<(), TeardownError> {
        if state.role() == Role::Follower {
            debug!("follower teardown is a no-op");
            return Ok(());
        }

        let mut failures = Vec::new();

        if state.owns_deletion() {
            let file_system_id = state.file_system_id();
            info!(file_system_id, "deleting filesystem");
            match self.cloud.delete_file_system(file_system_id).await {
                Ok(()) => info!(file_system_id, "deleted filesystem"),
                Err(source) => {
                    warn!(file_system_id, error = %source, "deleting filesystem failed");
                    failures.push(TeardownFailure::DeleteFileSystem {
                        file_system_id: file_system_id.to_string(),
                        source,
                    });
                }
            }
        }

        if state.owns_driver_teardown()
            && let Err(source) = self.deployment.remove().await
        {
            warn!(error = %source, "removing driver failed");
            failures.push(TeardownFailure::RemoveDriver {
                reference: self.deployment.reference().to_string(),
                source,
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}
