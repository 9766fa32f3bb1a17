//! Statically bound claim/volume pairs addressing a subpath of the shared
//! file system.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cleanup::CleanupStack;
use crate::cluster::ClusterClient;
use crate::driver::DRIVER_NAME;
use crate::error::{ClusterError, HandleError, ScenarioError};
use crate::types::VolumeHandle;

/// Capacity requested and advertised by every binding. The file system does
/// not enforce it; the claim schema requires one.
pub const NOMINAL_CAPACITY: &str = "1Gi";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Retain,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    pub name: String,
    pub namespace: String,
    pub access_modes: Vec<AccessMode>,
    pub storage_request: String,
    /// Empty disables dynamic provisioning.
    pub storage_class_name: String,
    pub volume_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolumeSource {
    pub driver: String,
    pub volume_handle: VolumeHandle,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub fs_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolume {
    pub name: String,
    pub access_modes: Vec<AccessMode>,
    pub capacity: String,
    pub reclaim_policy: ReclaimPolicy,
    pub csi: CsiVolumeSource,
    pub claim_ref: Option<ClaimRef>,
}

/// A claim and the volume it is pre-bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub claim: PersistentVolumeClaim,
    pub volume: PersistentVolume,
}

impl VolumeBinding {
    /// Build a binding named `name` whose volume addresses `subpath` of the
    /// file system. An empty subpath addresses the root.
    pub fn new(
        namespace: &str,
        name: &str,
        file_system_id: &str,
        subpath: &str,
    ) -> Result<Self, HandleError> {
        let volume_handle = VolumeHandle::encode(file_system_id, subpath)?;

        let claim = PersistentVolumeClaim {
            name: name.to_string(),
            namespace: namespace.to_string(),
            access_modes: vec![AccessMode::ReadWriteMany],
            storage_request: NOMINAL_CAPACITY.to_string(),
            storage_class_name: String::new(),
            volume_name: name.to_string(),
        };
        let volume = PersistentVolume {
            name: name.to_string(),
            access_modes: vec![AccessMode::ReadWriteMany],
            capacity: NOMINAL_CAPACITY.to_string(),
            reclaim_policy: ReclaimPolicy::Retain,
            csi: CsiVolumeSource {
                driver: DRIVER_NAME.to_string(),
                volume_handle,
                read_only: false,
                fs_type: String::new(),
            },
            claim_ref: Some(ClaimRef {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
            }),
        };

        let binding = Self { claim, volume };
        debug_assert!(binding.is_paired());
        Ok(binding)
    }

    /// The volume references exactly this claim and the claim names the volume.
    pub fn is_paired(&self) -> bool {
        let refers_to_claim = self.volume.claim_ref.as_ref().is_some_and(|r| {
            r.namespace == self.claim.namespace && r.name == self.claim.name
        });
        refers_to_claim && self.claim.volume_name == self.volume.name
    }

    pub fn handle(&self) -> &VolumeHandle {
        &self.volume.csi.volume_handle
    }

    /// Create the claim, then the volume, registering each deletion on
    /// `cleanup` as soon as the object exists.
    pub async fn create(
        self,
        client: &Arc<dyn ClusterClient>,
        cleanup: &mut CleanupStack,
    ) -> Result<Self, ScenarioError> {
        let namespace = self.claim.namespace.clone();

        let claim = client
            .create_claim(&self.claim)
            .await
            .map_err(|source| create_error("claim", &namespace, &self.claim.name, source))?;
        {
            let client = Arc::clone(client);
            let (namespace, name) = (claim.namespace.clone(), claim.name.clone());
            cleanup.push(format!("deleting claim {namespace}/{name}"), async move {
                client.delete_claim(&namespace, &name).await
            });
        }

        let volume = client
            .create_volume(&self.volume)
            .await
            .map_err(|source| create_error("volume", &namespace, &self.volume.name, source))?;
        {
            let client = Arc::clone(client);
            let name = volume.name.clone();
            cleanup.push(format!("deleting volume {name}"), async move {
                client.delete_volume(&name).await
            });
        }

        let (file_system_id, subpath) = volume.csi.volume_handle.decode();
        info!(
            namespace = %namespace,
            name = %claim.name,
            file_system_id,
            subpath,
            "created volume binding"
        );

        Ok(Self { claim, volume })
    }
}

fn create_error(kind: &str, namespace: &str, name: &str, source: ClusterError) -> ScenarioError {
    ScenarioError::Cluster {
        operation: format!("creating {kind} {namespace}/{name}"),
        source,
    }
}
