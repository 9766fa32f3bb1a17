//! In-memory cloud control plane.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use efs_csi_e2e::FileSystemProvisioner;
use efs_csi_e2e::error::CloudError;
use parking_lot::Mutex;

/// A file system: its tag and the directories created in it, as absolute
/// paths. The root always exists.
#[derive(Debug, Clone, Default)]
pub struct FileSystem {
    pub cluster_tag: String,
    pub directories: BTreeSet<String>,
}

impl FileSystem {
    pub fn has_directory(&self, path: &str) -> bool {
        path.is_empty() || path == "/" || self.directories.contains(path)
    }
}

/// File systems by id, shared between the cloud and the cluster that mounts them.
pub type FileSystemStore = Arc<Mutex<BTreeMap<String, FileSystem>>>;

pub struct FakeCloud {
    store: FileSystemStore,
    id_prefix: u32,
    next_id: AtomicU64,
    creates: AtomicU64,
    deletes: AtomicU64,
    fail_create: AtomicBool,
}

impl FakeCloud {
    /// Ids are derived from `id_seed` so a simulation seed reproduces them.
    pub fn new(store: FileSystemStore, id_seed: u64) -> Self {
        Self {
            store,
            id_prefix: id_seed as u32,
            next_id: AtomicU64::new(1),
            creates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Register a file system that exists before the suite starts.
    pub fn insert_existing(&self, file_system_id: &str) {
        self.store.lock().insert(
            file_system_id.to_string(),
            FileSystem {
                cluster_tag: "pre-existing".to_string(),
                directories: BTreeSet::new(),
            },
        );
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn exists(&self, file_system_id: &str) -> bool {
        self.store.lock().contains_key(file_system_id)
    }

    /// File systems currently tagged with `cluster_tag`.
    pub fn tagged(&self, cluster_tag: &str) -> usize {
        self.store
            .lock()
            .values()
            .filter(|fs| fs.cluster_tag == cluster_tag)
            .count()
    }

    pub fn create_calls(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSystemProvisioner for FakeCloud {
    async fn create_file_system(&self, cluster_tag: &str) -> Result<String, CloudError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CloudError::api("FileSystemLimitExceeded"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("fs-{:08x}{:09x}", self.id_prefix, n);
        self.store.lock().insert(
            id.clone(),
            FileSystem {
                cluster_tag: cluster_tag.to_string(),
                directories: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn delete_file_system(&self, file_system_id: &str) -> Result<(), CloudError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.store.lock().remove(file_system_id) {
            Some(_) => Ok(()),
            None => Err(CloudError::api(format!(
                "FileSystemNotFound: {file_system_id}"
            ))),
        }
    }
}
