//! Applying and removing the driver's deployment manifests.

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ManifestError;

/// Stable overlay of the upstream driver deployment.
pub const STABLE_MANIFEST: &str =
    "github.com/kubernetes-sigs/aws-efs-csi-driver/deploy/kubernetes/overlays/stable/?ref=master";

/// Applies or removes a deployment descriptor by reference. Both operations
/// are idempotent.
#[async_trait]
pub trait ManifestTool: Send + Sync {
    async fn apply(&self, reference: &str) -> Result<(), ManifestError>;

    async fn delete(&self, reference: &str) -> Result<(), ManifestError>;
}

/// [`ManifestTool`] backed by `kubectl -k`.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig: None,
        }
    }
}

impl Kubectl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
        }
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    fn args(&self, action: &'static str, reference: &str) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(OsString::from("--kubeconfig"));
            args.push(kubeconfig.clone().into_os_string());
        }
        args.push(action.into());
        args.push("-k".into());
        args.push(reference.into());
        if action == "delete" {
            args.push("--ignore-not-found".into());
        }
        args
    }

    async fn run(&self, action: &'static str, reference: &str) -> Result<(), ManifestError> {
        let binary = self.binary.clone();
        let args = self.args(action, reference);
        let owned_reference = reference.to_string();
        debug!(action, reference, "running kubectl");

        // kubectl can take a while fetching remote kustomizations.
        tokio::task::spawn_blocking(move || {
            let output = std::process::Command::new(&binary)
                .args(&args)
                .output()
                .map_err(|e| ManifestError::Spawn {
                    action,
                    reference: owned_reference.clone(),
                    source: e,
                })?;

            if !output.status.success() {
                return Err(ManifestError::Failed {
                    action,
                    reference: owned_reference,
                    message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(())
        })
        .await
        .map_err(|e| ManifestError::Spawn {
            action,
            reference: reference.to_string(),
            source: std::io::Error::other(format!("task join error: {e}")),
        })?
    }
}

#[async_trait]
impl ManifestTool for Kubectl {
    async fn apply(&self, reference: &str) -> Result<(), ManifestError> {
        self.run("apply", reference).await
    }

    async fn delete(&self, reference: &str) -> Result<(), ManifestError> {
        self.run("delete", reference).await
    }
}
