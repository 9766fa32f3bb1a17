//! Multi-executor simulation of the shared fixture lifecycle.
//!
//! Each iteration samples a [`FixturePlan`], builds fresh fakes and runs every
//! executor concurrently on one task: the leader resolves the fixture and
//! broadcasts it, followers adopt it, everyone runs test cases, waits at a
//! barrier and tears down. The [`FixtureOracle`] then checks the side effects
//! against what the plan implies.

use std::sync::Arc;

use efs_csi_e2e::cleanup::CleanupStack;
use efs_csi_e2e::cluster::{PodRequest, wait_for_pod_running};
use efs_csi_e2e::error::{CleanupFailures, ScenarioError};
use efs_csi_e2e::{
    ClusterClient, EfsDriver, FixtureCoordinator, FixtureState, PathIsolationScenario, Role,
    ScenarioConfig, SharedFixtureConfig, VolumeBinding,
};
use futures::future::join_all;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Barrier, watch};
use tracing::{debug, info};

use super::SimulationError;
use super::cloud::{FakeCloud, FileSystemStore};
use super::cluster::FakeCluster;
use super::manifest::FakeManifests;

pub const EXISTING_FILE_SYSTEM_ID: &str = "fs-0123456789abcdef0";
const CLUSTER_NAME: &str = "dst-cluster";
const REGION: &str = "us-west-2";

/// One sampled suite run.
#[derive(Debug, Clone)]
pub struct FixturePlan {
    pub executors: usize,
    pub leader: usize,
    pub create_file_system: bool,
    pub deploy_driver: bool,
    pub driver_preinstalled: bool,
    pub fail_create: bool,
    /// Applying the driver manifest fails. Only matters when a deploy is attempted.
    pub fail_apply: bool,
    /// Root-mount cases run by each executor.
    pub cases: Vec<usize>,
    /// The executor that runs the path-isolation scenario. It runs once per suite.
    pub isolation_executor: usize,
    /// The mkdir pod of the path-isolation scenario writes nothing.
    pub lose_writes: bool,
}

impl FixturePlan {
    fn create_aborts(&self) -> bool {
        self.create_file_system && self.fail_create
    }

    fn attempts_deploy(&self) -> bool {
        self.deploy_driver && !self.driver_preinstalled && !self.create_aborts()
    }

    fn deploy_aborts(&self) -> bool {
        self.attempts_deploy() && self.fail_apply
    }

    fn setup_aborts(&self) -> bool {
        self.create_aborts() || self.deploy_aborts()
    }

    fn isolation_namespace(&self) -> String {
        format!("efs-{}-isolation", self.isolation_executor)
    }
}

#[derive(Debug, Clone)]
enum Broadcast {
    Pending,
    Ready(Vec<u8>),
    Aborted(String),
}

/// What one executor observed.
#[derive(Debug, Default)]
struct ExecutorOutcome {
    file_system_id: Option<String>,
    setup_error: Option<String>,
    passed: u64,
    failed: Vec<(String, String)>,
    teardown_error: Option<String>,
}

/// Expected side effects of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureOracle {
    pub creates: u64,
    pub deletes: u64,
    pub driver_lookups: u64,
    pub driver_applies: u64,
    pub driver_deletes: u64,
    pub aborted: bool,
    pub passed: u64,
    pub failed: u64,
    pub file_system_survives: bool,
    /// Created file systems left behind because a later setup step failed.
    pub orphaned_file_systems: usize,
    pub driver_registered_after: bool,
}

impl FixtureOracle {
    pub fn from_plan(plan: &FixturePlan) -> Self {
        let aborted = plan.setup_aborts();
        let created = plan.create_file_system && !aborted;
        let deploys = plan.attempts_deploy() && !plan.fail_apply;
        let cases = if aborted {
            0
        } else {
            plan.cases.iter().sum::<usize>() as u64 + 1
        };
        let failed = u64::from(!aborted && plan.lose_writes);

        Self {
            creates: u64::from(plan.create_file_system),
            deletes: u64::from(created),
            driver_lookups: u64::from(plan.deploy_driver && !plan.create_aborts()),
            driver_applies: u64::from(plan.attempts_deploy()),
            driver_deletes: u64::from(deploys),
            aborted,
            passed: cases - failed,
            failed,
            file_system_survives: !plan.create_file_system,
            orphaned_file_systems: usize::from(plan.create_file_system && plan.deploy_aborts()),
            driver_registered_after: plan.driver_preinstalled,
        }
    }
}

/// Simulation statistics.
#[derive(Debug, Default, Clone)]
pub struct FixtureStats {
    pub runs: u64,
    pub executors: u64,
    pub file_systems_created: u64,
    pub drivers_deployed: u64,
    pub aborted_setups: u64,
    pub cases_passed: u64,
    pub cases_failed: u64,
}

pub struct FixtureHarness {
    rng: SmallRng,
    max_executors: usize,
    scenario: ScenarioConfig,
    stats: FixtureStats,
}

impl FixtureHarness {
    pub fn new(seed: u64, max_executors: usize) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            max_executors: max_executors.max(1),
            scenario: ScenarioConfig {
                pod_success_timeout_secs: 5,
                pod_running_timeout_secs: 5,
                poll_interval_ms: 1,
            },
            stats: FixtureStats::default(),
        }
    }

    /// Run `iterations` independent suite runs.
    pub async fn run(&mut self, iterations: u64) -> Result<(), SimulationError> {
        for _ in 0..iterations {
            let plan = self.sample_plan();
            self.execute(plan).await?;
        }
        Ok(())
    }

    fn sample_plan(&mut self) -> FixturePlan {
        let executors = self.rng.random_range(1..=self.max_executors);
        let create_file_system = self.rng.random_bool(0.5);
        let deploy_driver = self.rng.random_bool(0.5);
        FixturePlan {
            executors,
            leader: self.rng.random_range(0..executors),
            create_file_system,
            deploy_driver,
            driver_preinstalled: self.rng.random_bool(0.5),
            fail_create: create_file_system && self.rng.random_bool(0.1),
            fail_apply: deploy_driver && self.rng.random_bool(0.1),
            cases: (0..executors).map(|_| self.rng.random_range(0..=2)).collect(),
            isolation_executor: self.rng.random_range(0..executors),
            lose_writes: self.rng.random_bool(0.2),
        }
    }

    /// Run one suite according to `plan` and check it against the oracle.
    pub async fn execute(&mut self, plan: FixturePlan) -> Result<(), SimulationError> {
        debug!(?plan, "executing plan");

        let store = FileSystemStore::default();
        let cloud = Arc::new(FakeCloud::new(store.clone(), self.rng.random()));
        let cluster = Arc::new(FakeCluster::new(store));
        let manifests = Arc::new(FakeManifests::new(cluster.clone()));

        cloud.set_fail_create(plan.fail_create);
        manifests.set_fail_apply(plan.fail_apply);
        cluster.set_driver_registered(plan.driver_preinstalled);
        if plan.lose_writes {
            cluster.lose_writes_in(&plan.isolation_namespace());
        }

        let config = if plan.create_file_system {
            SharedFixtureConfig {
                deploy_driver: plan.deploy_driver,
                ..SharedFixtureConfig::create(CLUSTER_NAME, REGION)
            }
        } else {
            cloud.insert_existing(EXISTING_FILE_SYSTEM_ID);
            SharedFixtureConfig {
                deploy_driver: plan.deploy_driver,
                ..SharedFixtureConfig::existing(EXISTING_FILE_SYSTEM_ID)
            }
        };

        let (broadcast, _) = watch::channel(Broadcast::Pending);
        let broadcast = Arc::new(broadcast);
        let barrier = Arc::new(Barrier::new(plan.executors));

        let executors = (0..plan.executors).map(|index| {
            Executor {
                index,
                role: if index == plan.leader {
                    Role::Leader
                } else {
                    Role::Follower
                },
                coordinator: FixtureCoordinator::new(
                    config.clone(),
                    cloud.clone(),
                    cluster.clone(),
                    manifests.clone(),
                ),
                client: cluster.clone(),
                scenario: self.scenario.clone(),
                broadcast: broadcast.clone(),
                barrier: barrier.clone(),
                cases: plan.cases[index],
                runs_isolation: index == plan.isolation_executor,
            }
            .run()
        });
        let outcomes = join_all(executors).await;

        let oracle = FixtureOracle::from_plan(&plan);
        verify(&oracle, &outcomes, &cloud, &cluster, &manifests)?;

        self.stats.runs += 1;
        self.stats.executors += plan.executors as u64;
        self.stats.file_systems_created += oracle.deletes + oracle.orphaned_file_systems as u64;
        self.stats.drivers_deployed += oracle.driver_deletes;
        self.stats.aborted_setups += u64::from(oracle.aborted);
        self.stats.cases_passed += oracle.passed;
        self.stats.cases_failed += oracle.failed;
        Ok(())
    }

    pub fn stats(&self) -> &FixtureStats {
        &self.stats
    }
}

struct Executor {
    index: usize,
    role: Role,
    coordinator: FixtureCoordinator,
    client: Arc<dyn ClusterClient>,
    scenario: ScenarioConfig,
    broadcast: Arc<watch::Sender<Broadcast>>,
    barrier: Arc<Barrier>,
    cases: usize,
    runs_isolation: bool,
}

impl Executor {
    async fn run(self) -> ExecutorOutcome {
        let mut outcome = ExecutorOutcome::default();

        match self.setup().await {
            Ok(state) => {
                outcome.file_system_id = Some(state.file_system_id().to_string());
                self.run_cases(&state, &mut outcome).await;

                self.barrier.wait().await;
                if let Err(e) = self.coordinator.teardown(&state).await {
                    outcome.teardown_error = Some(e.to_string());
                }
            }
            Err(e) => {
                debug!(executor = self.index, error = %e, "setup failed");
                outcome.setup_error = Some(e);
                self.barrier.wait().await;
            }
        }
        outcome
    }

    async fn setup(&self) -> Result<FixtureState, String> {
        if self.role == Role::Leader {
            return match self.coordinator.resolve_fixture().await {
                Ok(state) => {
                    self.broadcast.send_replace(Broadcast::Ready(state.payload()));
                    Ok(state)
                }
                Err(e) => {
                    self.broadcast.send_replace(Broadcast::Aborted(e.to_string()));
                    Err(e.to_string())
                }
            };
        }

        let mut rx = self.broadcast.subscribe();
        let broadcast = rx
            .wait_for(|b| !matches!(b, Broadcast::Pending))
            .await
            .map_err(|e| e.to_string())?
            .clone();
        match broadcast {
            Broadcast::Ready(payload) => FixtureState::adopt(&payload).map_err(|e| e.to_string()),
            Broadcast::Aborted(reason) => Err(format!("leader setup failed: {reason}")),
            Broadcast::Pending => Err("no fixture broadcast".to_string()),
        }
    }

    async fn run_cases(&self, state: &FixtureState, outcome: &mut ExecutorOutcome) {
        let mut results = Vec::new();
        for case in 0..self.cases {
            let namespace = format!("efs-{}-{case}", self.index);
            let result = root_mount_case(&self.client, &self.scenario, &namespace, state).await;
            results.push((namespace, result));
        }
        if self.runs_isolation {
            let namespace = format!("efs-{}-isolation", self.index);
            let scenario = PathIsolationScenario::new(self.client.clone(), self.scenario.clone());
            let result = scenario.run(&namespace, state).await;
            results.push((namespace, result));
        }

        for (namespace, result) in results {
            match result {
                Ok(()) => outcome.passed += 1,
                Err(e) => {
                    debug!(
                        executor = self.index,
                        namespace = %namespace,
                        error = %e,
                        "case failed"
                    );
                    outcome.failed.push((namespace, e.to_string()));
                }
            }
        }
    }
}

/// A generic-suite style case: a pre-provisioned volume at the root of the
/// shared file system, mounted by a pod that must reach running.
async fn root_mount_case(
    client: &Arc<dyn ClusterClient>,
    config: &ScenarioConfig,
    namespace: &str,
    fixture: &FixtureState,
) -> Result<(), ScenarioError> {
    let mut cleanup = CleanupStack::new();
    let result = root_mount_steps(client, config, namespace, fixture, &mut cleanup).await;
    let failures = cleanup.run().await;
    match result {
        Ok(()) if !failures.is_empty() => {
            Err(ScenarioError::Cleanup(CleanupFailures(failures)))
        }
        other => other,
    }
}

async fn root_mount_steps(
    client: &Arc<dyn ClusterClient>,
    config: &ScenarioConfig,
    namespace: &str,
    fixture: &FixtureState,
    cleanup: &mut CleanupStack,
) -> Result<(), ScenarioError> {
    let driver = EfsDriver::new(fixture);
    let mut binding = VolumeBinding::new(
        namespace,
        &format!("{namespace}-volume"),
        fixture.file_system_id(),
        "",
    )?;
    binding.volume.csi = driver.persistent_volume_source(false, "")?;
    let binding = binding.create(client, cleanup).await?;

    let request = PodRequest::new(namespace, vec![binding.claim.name.clone()], "");
    let pod = client
        .create_pod(&request)
        .await
        .map_err(|source| ScenarioError::Cluster {
            operation: format!("creating pod in {namespace}"),
            source,
        })?;
    {
        let client = Arc::clone(client);
        let (namespace, name) = (pod.namespace.clone(), pod.name.clone());
        cleanup.push(format!("deleting pod {namespace}/{name}"), async move {
            client.delete_pod(&namespace, &name).await
        });
    }

    wait_for_pod_running(
        client.as_ref(),
        namespace,
        &pod.name,
        config.pod_running_timeout(),
        config.poll_interval(),
    )
    .await
}

fn mismatch(context: String) -> SimulationError {
    SimulationError::Mismatch { context }
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(
    what: &str,
    expected: T,
    actual: T,
) -> Result<(), SimulationError> {
    if expected != actual {
        return Err(mismatch(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        )));
    }
    Ok(())
}

fn verify(
    oracle: &FixtureOracle,
    outcomes: &[ExecutorOutcome],
    cloud: &FakeCloud,
    cluster: &FakeCluster,
    manifests: &FakeManifests,
) -> Result<(), SimulationError> {
    expect_eq("file system creates", oracle.creates, cloud.create_calls())?;
    expect_eq("file system deletes", oracle.deletes, cloud.delete_calls())?;
    expect_eq("driver lookups", oracle.driver_lookups, cluster.driver_lookups())?;
    expect_eq("driver applies", oracle.driver_applies, manifests.apply_calls())?;
    expect_eq("driver deletes", oracle.driver_deletes, manifests.delete_calls())?;

    if oracle.aborted {
        if let Some(outcome) = outcomes.iter().find(|o| o.setup_error.is_none()) {
            return Err(mismatch(format!(
                "executor adopted {:?} although setup aborted",
                outcome.file_system_id
            )));
        }
    } else {
        let mut ids = outcomes.iter().map(|o| o.file_system_id.as_deref());
        let first = ids.next().flatten();
        if first.is_none() || ids.any(|id| id != first) {
            let all: Vec<_> = outcomes.iter().map(|o| &o.file_system_id).collect();
            return Err(mismatch(format!("executors disagree on the file system: {all:?}")));
        }
        if oracle.file_system_survives {
            expect_eq("file system id", Some(EXISTING_FILE_SYSTEM_ID), first)?;
        }
    }

    if let Some(id) = outcomes.iter().find_map(|o| o.file_system_id.as_deref()) {
        expect_eq(
            "file system exists after teardown",
            oracle.file_system_survives,
            cloud.exists(id),
        )?;
    }
    expect_eq(
        "file systems left for the cluster",
        oracle.orphaned_file_systems,
        cloud.tagged(CLUSTER_NAME),
    )?;
    expect_eq(
        "driver registered after teardown",
        oracle.driver_registered_after,
        cluster.driver_registered(),
    )?;

    let passed: u64 = outcomes.iter().map(|o| o.passed).sum();
    let failed: Vec<_> = outcomes.iter().flat_map(|o| o.failed.iter()).collect();
    expect_eq("passed cases", oracle.passed, passed)?;
    expect_eq("failed cases", oracle.failed, failed.len() as u64)?;
    for (namespace, error) in &failed {
        if !error.contains("no such file or directory") {
            return Err(mismatch(format!("case {namespace} failed unexpectedly: {error}")));
        }
    }

    if let Some(error) = outcomes.iter().find_map(|o| o.teardown_error.as_ref()) {
        return Err(mismatch(format!("teardown failed: {error}")));
    }
    expect_eq("objects left in cluster", 0, cluster.object_count())?;

    info!(
        executors = outcomes.len(),
        passed,
        failed = failed.len(),
        aborted = oracle.aborted,
        "suite run verified"
    );
    Ok(())
}
