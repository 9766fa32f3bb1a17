//! Error types for fixture coordination and the path-isolation scenario.
//!
//! Errors fall into three groups that map onto how a suite reacts to them:
//! - [`SetupError`]: fatal, the suite stops before any test case runs.
//! - [`ScenarioError`]: a failed test case, isolated from every other case.
//! - [`TeardownError`]: reported once all tests are done, never re-fails a test.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },

    #[error(
        "can't run tests without an EFS file system: create_file_system is false and file_system_id is empty"
    )]
    MissingFileSystem,
}

/// Errors from building an opaque volume handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("file system id is empty")]
    EmptyFileSystemId,

    #[error("file system id {file_system_id:?} contains the handle separator")]
    SeparatorInFileSystemId { file_system_id: String },

    #[error("subpath {subpath:?} contains the handle separator")]
    SeparatorInSubpath { subpath: String },
}

/// Errors reported by the cloud control plane.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud API error: {message}")]
    Api { message: String },

    #[error("cloud returned unusable file system id {file_system_id:?}: {reason}")]
    InvalidFileSystemId {
        file_system_id: String,
        reason: &'static str,
    },
}

impl CloudError {
    pub fn api(err: impl fmt::Display) -> Self {
        Self::Api {
            message: err.to_string(),
        }
    }
}

/// Errors reported by the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("cluster API error: {message}")]
    Api { message: String },
}

impl ClusterError {
    pub fn api(err: impl fmt::Display) -> Self {
        Self::Api {
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from applying or removing a deployment manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to run kubectl {action} for {reference}: {source}")]
    Spawn {
        action: &'static str,
        reference: String,
        #[source]
        source: io::Error,
    },

    #[error("kubectl {action} for {reference} failed: {message}")]
    Failed {
        action: &'static str,
        reference: String,
        message: String,
    },
}

/// Fatal errors of the setup phase. Any of these aborts the whole suite.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid fixture configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{operation} failed: {source}")]
    Provision {
        operation: &'static str,
        #[source]
        source: CloudError,
    },

    #[error("getting csidriver {driver} failed: {source}")]
    DriverLookup {
        driver: String,
        #[source]
        source: ClusterError,
    },

    #[error("deploying driver from {reference} failed: {source}")]
    DriverDeploy {
        reference: String,
        #[source]
        source: ManifestError,
    },

    #[error("invalid fixture broadcast payload: {reason}")]
    Broadcast { reason: String },
}

impl SetupError {
    /// Name of the setup step that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Config(_) => "validating configuration",
            Self::Provision { operation, .. } => *operation,
            Self::DriverLookup { .. } => "looking up csidriver",
            Self::DriverDeploy { .. } => "deploying driver",
            Self::Broadcast { .. } => "adopting fixture",
        }
    }
}

/// A cleanup action that failed. Later cleanups still ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub operation: String,
    pub source: ClusterError,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.source)
    }
}

/// Test-case failures.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid volume handle: {0}")]
    Handle(#[from] HandleError),

    #[error("{operation} failed: {source}")]
    Cluster {
        operation: String,
        #[source]
        source: ClusterError,
    },

    #[error("pod {namespace}/{pod} failed: {message}")]
    PodFailed {
        namespace: String,
        pod: String,
        message: String,
    },

    #[error("pod {namespace}/{pod} ran to completion before reaching running")]
    PodCompleted { namespace: String, pod: String },

    #[error("timed out after {after:?} {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("cleanup failed: {0}")]
    Cleanup(CleanupFailures),
}

/// A teardown step that failed.
#[derive(Debug, Error)]
pub enum TeardownFailure {
    #[error("deleting file system {file_system_id} failed: {source}")]
    DeleteFileSystem {
        file_system_id: String,
        #[source]
        source: CloudError,
    },

    #[error("removing driver deployment {reference} failed: {source}")]
    RemoveDriver {
        reference: String,
        #[source]
        source: ManifestError,
    },
}

/// Cleanup actions of one test case that failed, in the order they ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailures(pub Vec<CleanupFailure>);

impl fmt::Display for CleanupFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} action(s) failed: ", self.0.len())?;
        write_joined(f, &self.0)
    }
}

/// Suite-level teardown failure. Every step was attempted.
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown step(s) failed: ", self.failures.len())?;
        write_joined(f, &self.failures)
    }
}

impl std::error::Error for TeardownError {}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str("; ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_names_the_operation() {
        let err = SetupError::Provision {
            operation: "creating file system",
            source: CloudError::api("throttled"),
        };
        assert_eq!(err.operation(), "creating file system");
        assert!(err.to_string().contains("throttled"));
    }

    #[test]
    fn teardown_error_lists_every_failure() {
        let err = TeardownError {
            failures: vec![
                TeardownFailure::DeleteFileSystem {
                    file_system_id: "fs-123".to_string(),
                    source: CloudError::api("mount targets still present"),
                },
                TeardownFailure::RemoveDriver {
                    reference: "overlays/stable".to_string(),
                    source: ManifestError::Failed {
                        action: "delete",
                        reference: "overlays/stable".to_string(),
                        message: "connection refused".to_string(),
                    },
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 teardown step(s) failed"));
        assert!(message.contains("fs-123"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn not_found_is_distinguished_from_other_cluster_errors() {
        let not_found = ClusterError::NotFound {
            kind: "csidriver",
            name: "efs.csi.aws.com".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!ClusterError::api("forbidden").is_not_found());
    }
}
