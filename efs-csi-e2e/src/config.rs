//! Configuration for an end-to-end suite run.
//!
//! Configuration is fixed before the suite starts and read-only afterwards.
//! It is supplied by the embedding test runner, either built directly, loaded
//! from a TOML file, or overridden from `EFS_E2E_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::manifest::STABLE_MANIFEST;

pub const ENV_CLUSTER_NAME: &str = "EFS_E2E_CLUSTER_NAME";
pub const ENV_REGION: &str = "EFS_E2E_REGION";
pub const ENV_FILE_SYSTEM_ID: &str = "EFS_E2E_FILE_SYSTEM_ID";
pub const ENV_CREATE_FILE_SYSTEM: &str = "EFS_E2E_CREATE_FILE_SYSTEM";
pub const ENV_DEPLOY_DRIVER: &str = "EFS_E2E_DEPLOY_DRIVER";
pub const ENV_DRIVER_MANIFEST: &str = "EFS_E2E_DRIVER_MANIFEST";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fixture: SharedFixtureConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by a variable lookup, validated like [`Config::load`].
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.fixture.apply_vars(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fixture.validate()?;
        self.scenario.validate()
    }
}

/// The shared fixture: which file system the suite runs against and whether
/// this run provisions it and the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedFixtureConfig {
    /// Cluster the file system is tagged with when created.
    pub cluster_name: String,
    pub region: String,
    /// A pre-existing file system. Ignored when `create_file_system` is set.
    pub file_system_id: Option<String>,
    pub create_file_system: bool,
    /// Deploy a stable driver if none is registered. CI leaves this off
    /// because something else deploys the build under test.
    pub deploy_driver: bool,
    /// Kustomize reference applied when deploying the driver.
    pub driver_manifest: String,
}

impl Default for SharedFixtureConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            region: String::new(),
            file_system_id: None,
            create_file_system: true,
            deploy_driver: false,
            driver_manifest: STABLE_MANIFEST.to_string(),
        }
    }
}

impl SharedFixtureConfig {
    /// Configuration for a suite that creates its own file system.
    pub fn create(cluster_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Configuration for a suite that runs against an existing file system.
    pub fn existing(file_system_id: impl Into<String>) -> Self {
        Self {
            file_system_id: Some(file_system_id.into()),
            create_file_system: false,
            ..Default::default()
        }
    }

    /// The pre-existing file system id, if a non-empty one was supplied.
    pub fn existing_file_system_id(&self) -> Option<&str> {
        self.file_system_id.as_deref().filter(|id| !id.is_empty())
    }

    /// A supplied file system id that creation overrides.
    pub fn ignored_file_system_id(&self) -> Option<&str> {
        self.existing_file_system_id().filter(|_| self.create_file_system)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.create_file_system && self.existing_file_system_id().is_none() {
            return Err(ConfigError::MissingFileSystem);
        }
        if self.create_file_system {
            if self.region.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "region",
                    reason: "must be non-empty when create_file_system is set",
                });
            }
            if self.cluster_name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "cluster_name",
                    reason: "must be non-empty when create_file_system is set",
                });
            }
        }
        if self.deploy_driver && self.driver_manifest.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "driver_manifest",
                reason: "must be non-empty when deploy_driver is set",
            });
        }
        Ok(())
    }

    /// Override fields from `EFS_E2E_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Override fields from a variable lookup. Unset variables leave the
    /// field untouched.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CLUSTER_NAME) {
            self.cluster_name = value;
        }
        if let Some(value) = lookup(ENV_REGION) {
            self.region = value;
        }
        if let Some(value) = lookup(ENV_FILE_SYSTEM_ID) {
            self.file_system_id = Some(value);
        }
        if let Some(value) = lookup(ENV_CREATE_FILE_SYSTEM) {
            self.create_file_system = parse_bool("create_file_system", &value)?;
        }
        if let Some(value) = lookup(ENV_DEPLOY_DRIVER) {
            self.deploy_driver = parse_bool("deploy_driver", &value)?;
        }
        if let Some(value) = lookup(ENV_DRIVER_MANIFEST) {
            self.driver_manifest = value;
        }
        Ok(())
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            reason: "expected true, false, 1 or 0",
        }),
    }
}

/// Bounded waits used by the path-isolation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub pod_success_timeout_secs: u64,
    pub pod_running_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            pod_success_timeout_secs: 300,
            pod_running_timeout_secs: 300,
            poll_interval_ms: 2000,
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be > 0",
            });
        }
        Ok(())
    }

    pub fn pod_success_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_success_timeout_secs)
    }

    pub fn pod_running_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_running_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn create_requires_region_and_cluster() {
        let config = SharedFixtureConfig::create("e2e-cluster", "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "region",
                ..
            })
        ));

        let config = SharedFixtureConfig::create("", "us-west-2");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "cluster_name",
                ..
            })
        ));
    }

    #[test]
    fn no_file_system_and_no_creation_is_rejected() {
        let config = SharedFixtureConfig {
            create_file_system: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingFileSystem)
        ));

        let config = SharedFixtureConfig::existing("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingFileSystem)
        ));
    }

    #[test]
    fn valid_combinations_are_accepted() {
        assert!(
            SharedFixtureConfig::create("e2e-cluster", "us-west-2")
                .validate()
                .is_ok()
        );
        assert!(SharedFixtureConfig::existing("fs-123").validate().is_ok());

        // Creation wins over a supplied id.
        let both = SharedFixtureConfig {
            file_system_id: Some("fs-123".to_string()),
            ..SharedFixtureConfig::create("e2e-cluster", "us-west-2")
        };
        assert!(both.validate().is_ok());
        assert_eq!(both.ignored_file_system_id(), Some("fs-123"));
    }

    #[test]
    fn supplied_id_is_only_ignored_when_creating() {
        assert_eq!(
            SharedFixtureConfig::existing("fs-123").ignored_file_system_id(),
            None
        );
        assert_eq!(
            SharedFixtureConfig::create("e2e-cluster", "us-west-2").ignored_file_system_id(),
            None
        );
    }

    #[test]
    fn deploy_driver_requires_manifest() {
        let config = SharedFixtureConfig {
            deploy_driver: true,
            driver_manifest: String::new(),
            ..SharedFixtureConfig::existing("fs-123")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "driver_manifest",
                ..
            })
        ));
    }

    #[test]
    fn defaults_create_without_deploying() {
        let config = SharedFixtureConfig::default();
        assert!(config.create_file_system);
        assert!(!config.deploy_driver);
        assert_eq!(config.driver_manifest, STABLE_MANIFEST);
    }

    #[test]
    fn apply_vars_overrides_fields() {
        let vars = HashMap::from([
            (ENV_FILE_SYSTEM_ID, "fs-456"),
            (ENV_CREATE_FILE_SYSTEM, "false"),
            (ENV_DEPLOY_DRIVER, "1"),
        ]);
        let mut config = SharedFixtureConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.existing_file_system_id(), Some("fs-456"));
        assert!(!config.create_file_system);
        assert!(config.deploy_driver);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn apply_vars_rejects_bad_bool() {
        let mut config = SharedFixtureConfig::default();
        let result = config.apply_vars(|name| {
            (name == ENV_DEPLOY_DRIVER).then(|| "sometimes".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "deploy_driver",
                ..
            })
        ));
    }

    #[test]
    fn from_vars_validates_like_load() {
        let vars = HashMap::from([(ENV_CREATE_FILE_SYSTEM, "false")]);
        let result = Config::from_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert!(matches!(result, Err(ConfigError::MissingFileSystem)));

        let vars = HashMap::from([
            (ENV_CLUSTER_NAME, "e2e-cluster"),
            (ENV_REGION, "us-west-2"),
        ]);
        let config = Config::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.fixture.cluster_name, "e2e-cluster");
        assert!(config.fixture.create_file_system);
    }

    #[test]
    fn load_reads_toml_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[fixture]
cluster_name = "e2e-cluster"
region = "us-east-1"
deploy_driver = true

[scenario]
pod_running_timeout_secs = 60
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.fixture.cluster_name, "e2e-cluster");
        assert!(config.fixture.create_file_system);
        assert!(config.fixture.deploy_driver);
        assert_eq!(config.scenario.pod_running_timeout(), Duration::from_secs(60));
        assert_eq!(config.scenario.pod_success_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn load_rejects_invalid_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fixture]\ncreate_file_system = false").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::MissingFileSystem)
        ));
    }

    #[test]
    fn scenario_config_rejects_zero_poll_interval() {
        let config = ScenarioConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
