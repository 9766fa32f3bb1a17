//! Mounting different subpaths of one shared file system on the same node.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cleanup::CleanupStack;
use crate::cluster::{ClusterClient, Pod, PodRequest, wait_for_pod_running, wait_for_pod_success};
use crate::config::ScenarioConfig;
use crate::error::{CleanupFailures, ScenarioError};
use crate::fixture::FixtureState;
use crate::volume::VolumeBinding;

/// Subdirectories created under the root binding and then mounted on their own.
pub const SUBPATHS: [(&str, &str); 2] = [("a", "/a"), ("b", "/b")];

/// Verifies that volumes encoding different subpaths of the same file system
/// mount as distinct, pre-populated directories.
pub struct PathIsolationScenario {
    client: Arc<dyn ClusterClient>,
    config: ScenarioConfig,
}

impl PathIsolationScenario {
    pub fn new(client: Arc<dyn ClusterClient>, config: ScenarioConfig) -> Self {
        Self { client, config }
    }

    /// Run the scenario in `namespace` against the shared file system.
    ///
    /// Every object created is deleted before returning, newest first. A
    /// failing step is reported over any cleanup failure.
    pub async fn run(&self, namespace: &str, fixture: &FixtureState) -> Result<(), ScenarioError> {
        let mut cleanup = CleanupStack::new();
        let result = self.steps(namespace, fixture, &mut cleanup).await;
        let failures = cleanup.run().await;

        match result {
            Err(e) => {
                if !failures.is_empty() {
                    warn!(
                        namespace,
                        failed = failures.len(),
                        "cleanup after failed scenario incomplete"
                    );
                }
                Err(e)
            }
            Ok(()) if !failures.is_empty() => {
                Err(ScenarioError::Cleanup(CleanupFailures(failures)))
            }
            Ok(()) => {
                info!(namespace, "path isolation scenario passed");
                Ok(())
            }
        }
    }

    async fn steps(
        &self,
        namespace: &str,
        fixture: &FixtureState,
        cleanup: &mut CleanupStack,
    ) -> Result<(), ScenarioError> {
        let file_system_id = fixture.file_system_id();

        info!(namespace, "creating volume binding with no subpath");
        let root_name = format!("{namespace}-root");
        let root = VolumeBinding::new(namespace, &root_name, file_system_id, "")?
            .create(&self.client, cleanup)
            .await?;

        info!(namespace, "creating pod to make subpaths");
        let mount = PodRequest::mount_path(0);
        let command = SUBPATHS
            .iter()
            .map(|(dir, _)| format!("mkdir {mount}/{dir}"))
            .collect::<Vec<_>>()
            .join(" && ");
        let request = PodRequest::new(namespace, vec![root.claim.name.clone()], command);
        let pod = self.create_pod(request, cleanup).await?;
        wait_for_pod_success(
            self.client.as_ref(),
            namespace,
            &pod.name,
            self.config.pod_success_timeout(),
            self.config.poll_interval(),
        )
        .await?;

        let mut claims = Vec::with_capacity(SUBPATHS.len());
        for (dir, subpath) in SUBPATHS {
            info!(namespace, subpath, "creating volume binding with subpath");
            let name = format!("{namespace}-{dir}");
            let binding = VolumeBinding::new(namespace, &name, file_system_id, subpath)?
                .create(&self.client, cleanup)
                .await?;
            claims.push(binding.claim.name);
        }

        info!(namespace, "creating pod to mount subpaths");
        let pod = self
            .create_pod(PodRequest::new(namespace, claims, ""), cleanup)
            .await?;
        wait_for_pod_running(
            self.client.as_ref(),
            namespace,
            &pod.name,
            self.config.pod_running_timeout(),
            self.config.poll_interval(),
        )
        .await
    }

    async fn create_pod(
        &self,
        request: PodRequest,
        cleanup: &mut CleanupStack,
    ) -> Result<Pod, ScenarioError> {
        let pod = self
            .client
            .create_pod(&request)
            .await
            .map_err(|source| ScenarioError::Cluster {
                operation: format!("creating pod in {}", request.namespace),
                source,
            })?;

        let client = Arc::clone(&self.client);
        let (namespace, name) = (pod.namespace.clone(), pod.name.clone());
        cleanup.push(format!("deleting pod {namespace}/{name}"), async move {
            client.delete_pod(&namespace, &name).await
        });
        Ok(pod)
    }
}
