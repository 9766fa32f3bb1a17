//! In-memory cluster API.
//!
//! Pods are "executed" when created: each claim is resolved to its volume, the
//! volume handle is decoded and the addressed directory must exist on the
//! shared file system. A pod with a command runs it against the mounts and
//! succeeds; a pod without one keeps running. Every pod reports `Pending` on
//! its first poll so waits go through at least one sleep.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use efs_csi_e2e::cluster::{Pod, PodPhase, PodRequest};
use efs_csi_e2e::error::ClusterError;
use efs_csi_e2e::volume::{PersistentVolume, PersistentVolumeClaim};
use efs_csi_e2e::{ClusterClient, DRIVER_NAME, DriverRegistry};
use parking_lot::Mutex;

use super::cloud::FileSystemStore;

struct PodRecord {
    pod: Pod,
    polled: bool,
}

pub struct FakeCluster {
    file_systems: FileSystemStore,
    driver_registered: AtomicBool,
    driver_lookups: AtomicU64,
    claims: Mutex<BTreeMap<(String, String), PersistentVolumeClaim>>,
    volumes: Mutex<BTreeMap<String, PersistentVolume>>,
    pods: Mutex<BTreeMap<(String, String), PodRecord>>,
    next_pod: AtomicU64,
    /// Namespaces whose pod commands report success without writing anything.
    lost_writes: Mutex<BTreeSet<String>>,
}

/// A claim resolved down to a directory on a file system.
struct Mount {
    file_system_id: String,
    path: String,
}

impl FakeCluster {
    pub fn new(file_systems: FileSystemStore) -> Self {
        Self {
            file_systems,
            driver_registered: AtomicBool::new(false),
            driver_lookups: AtomicU64::new(0),
            claims: Mutex::new(BTreeMap::new()),
            volumes: Mutex::new(BTreeMap::new()),
            pods: Mutex::new(BTreeMap::new()),
            next_pod: AtomicU64::new(0),
            lost_writes: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set_driver_registered(&self, registered: bool) {
        self.driver_registered.store(registered, Ordering::SeqCst);
    }

    pub fn driver_registered(&self) -> bool {
        self.driver_registered.load(Ordering::SeqCst)
    }

    pub fn driver_lookups(&self) -> u64 {
        self.driver_lookups.load(Ordering::SeqCst)
    }

    pub fn lose_writes_in(&self, namespace: &str) {
        self.lost_writes.lock().insert(namespace.to_string());
    }

    /// Claims, volumes and pods still present.
    pub fn object_count(&self) -> usize {
        self.claims.lock().len() + self.volumes.lock().len() + self.pods.lock().len()
    }

    fn resolve_mount(&self, namespace: &str, claim: &str) -> Result<Mount, String> {
        let volume_name = self
            .claims
            .lock()
            .get(&(namespace.to_string(), claim.to_string()))
            .map(|c| c.volume_name.clone())
            .ok_or_else(|| format!("persistentvolumeclaim {claim:?} not found"))?;
        let handle = self
            .volumes
            .lock()
            .get(&volume_name)
            .map(|v| v.csi.volume_handle.clone())
            .ok_or_else(|| format!("persistentvolume {volume_name:?} not found"))?;

        let (file_system_id, subpath) = handle.decode();
        let file_systems = self.file_systems.lock();
        let fs = file_systems.get(file_system_id).ok_or_else(|| {
            format!("MountVolume.SetUp failed: file system {file_system_id} not found")
        })?;
        if !fs.has_directory(subpath) {
            return Err(format!(
                "MountVolume.SetUp failed for volume {volume_name:?}: \
                 {file_system_id}:{subpath}: no such file or directory"
            ));
        }

        Ok(Mount {
            file_system_id: file_system_id.to_string(),
            path: subpath.trim_end_matches('/').to_string(),
        })
    }

    /// Run `mkdir <dir>` steps joined by `&&` against the mounts.
    fn execute(&self, namespace: &str, command: &str, mounts: &[Mount]) -> Result<(), String> {
        if self.lost_writes.lock().contains(namespace) {
            return Ok(());
        }

        for step in command.split("&&").map(str::trim) {
            let target = step
                .strip_prefix("mkdir ")
                .ok_or_else(|| format!("unsupported command: {step}"))?;
            let (mount, rest) = (0..mounts.len())
                .find_map(|i| {
                    let mount_path = PodRequest::mount_path(i);
                    target
                        .strip_prefix(mount_path.as_str())
                        .and_then(|rest| rest.strip_prefix('/'))
                        .map(|rest| (&mounts[i], rest.to_string()))
                })
                .ok_or_else(|| {
                    format!("mkdir: cannot create directory {target:?}: read-only file system")
                })?;

            let path = format!("{}/{rest}", mount.path);
            let mut file_systems = self.file_systems.lock();
            let fs = file_systems
                .get_mut(&mount.file_system_id)
                .ok_or_else(|| format!("mkdir: {target}: stale file handle"))?;
            if !fs.directories.insert(path) {
                return Err(format!("mkdir: cannot create directory {target:?}: file exists"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DriverRegistry for FakeCluster {
    async fn get_csi_driver(&self, name: &str) -> Result<(), ClusterError> {
        self.driver_lookups.fetch_add(1, Ordering::SeqCst);
        if name == DRIVER_NAME && self.driver_registered() {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "csidriver",
                name: name.to_string(),
            })
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        let mut claims = self.claims.lock();
        let key = (claim.namespace.clone(), claim.name.clone());
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
        match self
            .claims
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "persistentvolumeclaim",
                name: name.to_string(),
            }),
        }
    }

    async fn create_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, ClusterError> {
        let mut volumes = self.volumes.lock();
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
        match self.volumes.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "persistentvolume",
                name: name.to_string(),
            }),
        }
    }

    async fn create_pod(&self, request: &PodRequest) -> Result<Pod, ClusterError> {
        let name = format!("pod-{}", self.next_pod.fetch_add(1, Ordering::SeqCst));

        let mounts: Result<Vec<_>, _> = request
            .claims
            .iter()
            .map(|claim| self.resolve_mount(&request.namespace, claim))
            .collect();
        let outcome = mounts.and_then(|mounts| {
            if request.command.is_empty() {
                Ok(PodPhase::Running)
            } else {
                self.execute(&request.namespace, &request.command, &mounts)
                    .map(|()| PodPhase::Succeeded)
            }
        });
        let (phase, message) = match outcome {
            Ok(phase) => (phase, String::new()),
            Err(message) => (PodPhase::Failed, message),
        };

        let pod = Pod {
            namespace: request.namespace.clone(),
            name,
            phase,
            message,
        };
        self.pods.lock().insert(
            (pod.namespace.clone(), pod.name.clone()),
            PodRecord {
                pod: pod.clone(),
                polled: false,
            },
        );
        Ok(Pod {
            phase: PodPhase::Pending,
            message: String::new(),
            ..pod
        })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let mut pods = self.pods.lock();
        let record = pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            })?;

        if !record.polled {
            record.polled = true;
            return Ok(Pod {
                phase: PodPhase::Pending,
                message: String::new(),
                ..record.pod.clone()
            });
        }
        Ok(record.pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        match self
            .pods
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            }),
        }
    }
}
