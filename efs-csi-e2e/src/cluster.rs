//! Cluster API interface and bounded waits on pod state.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClusterError, ScenarioError};
use crate::volume::{PersistentVolume, PersistentVolumeClaim};

/// Looks up driver registrations (`CSIDriver` objects) by name.
#[async_trait]
pub trait DriverRegistry: Send + Sync {
    /// Returns `ClusterError::NotFound` when no driver with this name is registered.
    async fn get_csi_driver(&self, name: &str) -> Result<(), ClusterError>;
}

/// Object operations the scenario needs from the cluster API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn create_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, ClusterError>;

    async fn delete_volume(&self, name: &str) -> Result<(), ClusterError>;

    /// Build a pod from `request` and create it. Returns the created pod with
    /// its generated name.
    async fn create_pod(&self, request: &PodRequest) -> Result<Pod, ClusterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Input to the external pod builder.
///
/// The builder mounts claim `i` at `/mnt/volume{i+1}` and runs `command` in a
/// shell. An empty command keeps the pod running until it is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRequest {
    pub namespace: String,
    pub claims: Vec<String>,
    pub command: String,
}

impl PodRequest {
    pub fn new(
        namespace: impl Into<String>,
        claims: Vec<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            claims,
            command: command.into(),
        }
    }

    /// Mount path of the claim at `index`.
    pub fn mount_path(index: usize) -> String {
        format!("/mnt/volume{}", index + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    /// Status message, set when the pod failed.
    pub message: String,
}

/// Poll until the pod succeeds. A failed pod or an expired timeout fails the
/// wait.
pub async fn wait_for_pod_success(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ScenarioError> {
    wait_for_phase(client, namespace, name, PodPhase::Succeeded, timeout, poll_interval).await
}

/// Poll until the pod is running. A pod that fails or completes before
/// running fails the wait.
pub async fn wait_for_pod_running(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ScenarioError> {
    wait_for_phase(client, namespace, name, PodPhase::Running, timeout, poll_interval).await
}

async fn wait_for_phase(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    target: PodPhase,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ScenarioError> {
    debug_assert!(
        matches!(target, PodPhase::Running | PodPhase::Succeeded),
        "only running and succeeded are waitable phases"
    );

    let poll = async {
        loop {
            let pod = match client.get_pod(namespace, name).await {
                Ok(pod) => pod,
                Err(source) if source.is_not_found() => {
                    return Err(ScenarioError::Cluster {
                        operation: format!("getting pod {namespace}/{name}"),
                        source,
                    });
                }
                Err(e) => {
                    // Transient API errors only end the wait through the timeout.
                    warn!(namespace, pod = name, error = %e, "getting pod failed, retrying");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };
            debug!(namespace, pod = name, phase = %pod.phase, "polled pod");

            match pod.phase {
                phase if phase == target => return Ok::<(), ScenarioError>(()),
                PodPhase::Failed => {
                    return Err(ScenarioError::PodFailed {
                        namespace: namespace.to_string(),
                        pod: name.to_string(),
                        message: pod.message,
                    });
                }
                PodPhase::Succeeded => {
                    return Err(ScenarioError::PodCompleted {
                        namespace: namespace.to_string(),
                        pod: name.to_string(),
                    });
                }
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| ScenarioError::Timeout {
            operation: format!("waiting for pod {namespace}/{name} to be {target}"),
            after: timeout,
        })?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Replays a fixed sequence of phases, repeating the last one.
    struct PhaseScript {
        phases: Mutex<Vec<PodPhase>>,
        errors: Mutex<Vec<ClusterError>>,
    }

    impl PhaseScript {
        fn new(phases: Vec<PodPhase>) -> Self {
            Self::after_errors(Vec::new(), phases)
        }

        /// Fails the first polls with `errors`, in order, before replaying `phases`.
        fn after_errors(mut errors: Vec<ClusterError>, mut phases: Vec<PodPhase>) -> Self {
            errors.reverse();
            phases.reverse();
            Self {
                phases: Mutex::new(phases),
                errors: Mutex::new(errors),
            }
        }
    }

    #[async_trait]
    impl ClusterClient for PhaseScript {
        async fn create_claim(
            &self,
            _claim: &PersistentVolumeClaim,
        ) -> Result<PersistentVolumeClaim, ClusterError> {
            unimplemented!()
        }

        async fn delete_claim(&self, _namespace: &str, _name: &str) -> Result<(), ClusterError> {
            unimplemented!()
        }

        async fn create_volume(
            &self,
            _volume: &PersistentVolume,
        ) -> Result<PersistentVolume, ClusterError> {
            unimplemented!()
        }

        async fn delete_volume(&self, _name: &str) -> Result<(), ClusterError> {
            unimplemented!()
        }

        async fn create_pod(&self, _request: &PodRequest) -> Result<Pod, ClusterError> {
            unimplemented!()
        }

        async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
            if let Some(err) = self.errors.lock().unwrap().pop() {
                return Err(err);
            }
            let mut phases = self.phases.lock().unwrap();
            let phase = if phases.len() > 1 {
                phases.pop().unwrap()
            } else {
                phases[0]
            };
            Ok(Pod {
                namespace: namespace.to_string(),
                name: name.to_string(),
                phase,
                message: "exit code 1".to_string(),
            })
        }

        async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<(), ClusterError> {
            unimplemented!()
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30);
    const POLL: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn success_wait_polls_through_pending_and_running() {
        let client = PhaseScript::new(vec![
            PodPhase::Pending,
            PodPhase::Running,
            PodPhase::Succeeded,
        ]);
        wait_for_pod_success(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pod_fails_the_wait() {
        let client = PhaseScript::new(vec![PodPhase::Pending, PodPhase::Failed]);
        let err = wait_for_pod_success(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::PodFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pod_times_out() {
        let client = PhaseScript::new(vec![PodPhase::Pending]);
        let err = wait_for_pod_running(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Timeout { after, .. } if after == TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_api_error_keeps_polling() {
        let client = PhaseScript::after_errors(
            vec![ClusterError::api("etcdserver: leader changed")],
            vec![PodPhase::Running],
        );
        wait_for_pod_running(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_api_error_ends_in_timeout() {
        let errors = (0..100)
            .map(|_| ClusterError::api("connection refused"))
            .collect();
        let client = PhaseScript::after_errors(errors, vec![PodPhase::Running]);
        let err = wait_for_pod_success(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pod_fails_the_wait() {
        let client = PhaseScript::after_errors(
            vec![ClusterError::NotFound {
                kind: "pod",
                name: "pod".to_string(),
            }],
            vec![PodPhase::Running],
        );
        let err = wait_for_pod_running(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Cluster {
                source: ClusterError::NotFound { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_pod_fails_running_wait() {
        let client = PhaseScript::new(vec![PodPhase::Succeeded]);
        let err = wait_for_pod_running(&client, "ns", "pod", TIMEOUT, POLL)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::PodCompleted { .. }));
    }
}
