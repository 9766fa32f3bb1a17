//! Cloud control-plane interface for the shared file system.

use async_trait::async_trait;

use crate::error::CloudError;

/// Creates and deletes the network file system shared by the whole suite.
///
/// Implementations are constructed for one region. `create_file_system`
/// returns once the file system and its mount targets are usable from the
/// cluster's nodes.
#[async_trait]
pub trait FileSystemProvisioner: Send + Sync {
    /// Create a file system tagged with `cluster_tag` and return its id.
    async fn create_file_system(&self, cluster_tag: &str) -> Result<String, CloudError>;

    async fn delete_file_system(&self, file_system_id: &str) -> Result<(), CloudError>;
}
