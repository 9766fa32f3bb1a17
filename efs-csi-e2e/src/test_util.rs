//! Recording fakes for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::cloud::FileSystemProvisioner;
use crate::cluster::{ClusterClient, DriverRegistry, Pod, PodPhase, PodRequest};
use crate::error::{CloudError, ClusterError, ManifestError};
use crate::manifest::ManifestTool;
use crate::volume::{PersistentVolume, PersistentVolumeClaim};

/// Records create/delete calls and hands out sequential file system ids.
#[derive(Default)]
pub struct RecordingCloud {
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    issued_id: Option<String>,
    fail_create: bool,
    fail_delete: bool,
}

impl RecordingCloud {
    /// Hands out `id` for every create call.
    pub fn issuing(id: &str) -> Self {
        Self {
            issued_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Default::default()
        }
    }

    /// Cluster tags passed to each create call.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileSystemProvisioner for RecordingCloud {
    async fn create_file_system(&self, cluster_tag: &str) -> Result<String, CloudError> {
        if self.fail_create {
            return Err(CloudError::api("FileSystemLimitExceeded"));
        }
        let mut created = self.created.lock().unwrap();
        created.push(cluster_tag.to_string());
        match &self.issued_id {
            Some(id) => Ok(id.clone()),
            None => Ok(format!("fs-{:08x}", created.len())),
        }
    }

    async fn delete_file_system(&self, file_system_id: &str) -> Result<(), CloudError> {
        self.deleted.lock().unwrap().push(file_system_id.to_string());
        if self.fail_delete {
            return Err(CloudError::api("FileSystemInUse"));
        }
        Ok(())
    }
}

/// Answers every driver lookup the same way.
pub enum StaticRegistry {
    Present,
    NotFound,
    Error(ClusterError),
}

#[async_trait]
impl DriverRegistry for StaticRegistry {
    async fn get_csi_driver(&self, name: &str) -> Result<(), ClusterError> {
        match self {
            Self::Present => Ok(()),
            Self::NotFound => Err(ClusterError::NotFound {
                kind: "csidriver",
                name: name.to_string(),
            }),
            Self::Error(e) => Err(e.clone()),
        }
    }
}

#[derive(Default)]
pub struct RecordingManifests {
    applied: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_apply: bool,
    fail_delete: bool,
}

impl RecordingManifests {
    pub fn failing_apply() -> Self {
        Self {
            fail_apply: true,
            ..Default::default()
        }
    }

    pub fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Default::default()
        }
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestTool for RecordingManifests {
    async fn apply(&self, reference: &str) -> Result<(), ManifestError> {
        if self.fail_apply {
            return Err(ManifestError::Failed {
                action: "apply",
                reference: reference.to_string(),
                message: "unable to recognize".to_string(),
            });
        }
        self.applied.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn delete(&self, reference: &str) -> Result<(), ManifestError> {
        self.deleted.lock().unwrap().push(reference.to_string());
        if self.fail_delete {
            return Err(ManifestError::Failed {
                action: "delete",
                reference: reference.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory object store. Pods with a command succeed immediately; pods
/// without one are running. Optionally fails the pod creation at a given
/// index.
#[derive(Default)]
pub struct RecordingCluster {
    claims: Mutex<BTreeMap<(String, String), PersistentVolumeClaim>>,
    volumes: Mutex<BTreeMap<String, PersistentVolume>>,
    pods: Mutex<BTreeMap<(String, String), Pod>>,
    requests: Mutex<Vec<PodRequest>>,
    next_pod: AtomicUsize,
    fail_pod: Option<usize>,
}

impl RecordingCluster {
    /// Pod number `index` (zero-based) ends in the failed phase.
    pub fn failing_pod(index: usize) -> Self {
        Self {
            fail_pod: Some(index),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<PodRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn volumes(&self) -> Vec<PersistentVolume> {
        self.volumes.lock().unwrap().values().cloned().collect()
    }

    /// Number of claims, volumes and pods still present.
    pub fn object_count(&self) -> usize {
        self.claims.lock().unwrap().len()
            + self.volumes.lock().unwrap().len()
            + self.pods.lock().unwrap().len()
    }
}

#[async_trait]
impl ClusterClient for RecordingCluster {
    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        let key = (claim.namespace.clone(), claim.name.clone());
        let mut claims = self.claims.lock().unwrap();
        if claims.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: "persistentvolumeclaim",
                name: claim.name.clone(),
            });
        }
        claims.insert(key, claim.clone());
        Ok(claim.clone())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.claims
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind: "persistentvolumeclaim",
                name: name.to_string(),
            })
    }

    async fn create_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, ClusterError> {
        let mut volumes = self.volumes.lock().unwrap();
        if volumes.contains_key(&volume.name) {
            return Err(ClusterError::AlreadyExists {
                kind: "persistentvolume",
                name: volume.name.clone(),
            });
        }
        volumes.insert(volume.name.clone(), volume.clone());
        Ok(volume.clone())
    }

    async fn delete_volume(&self, name: &str) -> Result<(), ClusterError> {
        self.volumes
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind: "persistentvolume",
                name: name.to_string(),
            })
    }

    async fn create_pod(&self, request: &PodRequest) -> Result<Pod, ClusterError> {
        self.requests.lock().unwrap().push(request.clone());
        let index = self.next_pod.fetch_add(1, Ordering::SeqCst);

        let (phase, message) = if self.fail_pod == Some(index) {
            (PodPhase::Failed, "exit code 1".to_string())
        } else if request.command.is_empty() {
            (PodPhase::Running, String::new())
        } else {
            (PodPhase::Succeeded, String::new())
        };
        let pod = Pod {
            namespace: request.namespace.clone(),
            name: format!("pod-{index}"),
            phase,
            message,
        };
        self.pods
            .lock()
            .unwrap()
            .insert((pod.namespace.clone(), pod.name.clone()), pod.clone());
        Ok(pod)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            })
    }
}
