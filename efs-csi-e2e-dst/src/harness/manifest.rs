//! In-memory manifest tool that registers and unregisters the driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use efs_csi_e2e::ManifestTool;
use efs_csi_e2e::error::ManifestError;
use parking_lot::Mutex;

use super::cluster::FakeCluster;

pub struct FakeManifests {
    cluster: Arc<FakeCluster>,
    applies: AtomicU64,
    deletes: AtomicU64,
    references: Mutex<Vec<String>>,
    fail_apply: AtomicBool,
}

impl FakeManifests {
    pub fn new(cluster: Arc<FakeCluster>) -> Self {
        Self {
            cluster,
            applies: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            references: Mutex::new(Vec::new()),
            fail_apply: AtomicBool::new(false),
        }
    }

    /// Make every apply fail without registering the driver.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    pub fn apply_calls(&self) -> u64 {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// References passed to every call, in order.
    pub fn references(&self) -> Vec<String> {
        self.references.lock().clone()
    }
}

#[async_trait]
impl ManifestTool for FakeManifests {
    async fn apply(&self, reference: &str) -> Result<(), ManifestError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.references.lock().push(reference.to_string());
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(ManifestError::Failed {
                action: "apply",
                reference: reference.to_string(),
                message: "error: unable to recognize \"kustomization\"".to_string(),
            });
        }
        self.cluster.set_driver_registered(true);
        Ok(())
    }

    async fn delete(&self, reference: &str) -> Result<(), ManifestError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.references.lock().push(reference.to_string());
        self.cluster.set_driver_registered(false);
        Ok(())
    }
}
