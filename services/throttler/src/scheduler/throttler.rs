//! The admission-control loop.

use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use throttle_tgs::{RepositoryState, TestMergeParameters, TgsError, UpdateRequest};
use tracing::{debug, info, instrument, warn};

use super::run_state::{RunReport, RunState};
use crate::db::{DbError, StateStore};
use crate::git::{GitError, SourceControl};
use crate::model::{Instance, InstanceId, UserId};
use crate::oracle::{OracleError, RevisionOracle, Staleness};
use crate::orchestrator::Orchestrator;

/// Result type for scheduler runs.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that end a run before any instance is evaluated.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to list online instances: {0}")]
    ListInstances(#[source] DbError),

    #[error("failed to list active compile jobs: {0}")]
    ListActiveJobs(#[source] DbError),
}

/// Failure while evaluating or triggering a single instance.
#[derive(Debug, thiserror::Error)]
enum InstanceError {
    #[error(transparent)]
    Revision(#[from] OracleError),

    #[error("reading checked-out branch: {0}")]
    Branch(#[from] GitError),

    #[error("reading repository state: {0}")]
    RepositoryState(#[source] TgsError),

    #[error("requesting repository update: {0}")]
    Update(#[source] TgsError),

    #[error("requesting deployment: {0}")]
    Deploy(#[source] TgsError),
}

/// Knobs for a scheduler run.
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    /// Upper bound on compile jobs this scheduler lets run at once.
    pub max_compile_jobs: usize,
    /// Exact job description that marks a job as a compile job.
    pub compile_job_description: String,
    /// Evaluate and count, but do not send update or deploy requests.
    pub dry_run: bool,
}

enum TriggerOutcome {
    Triggered,
    NoCapacity,
}

/// Decides which stale instances get redeployed, within the job cap.
pub struct Throttler {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceControl>,
    orchestrator: Arc<dyn Orchestrator>,
    oracle: RevisionOracle,
    principal: UserId,
    settings: ThrottleSettings,
    rng: StdRng,
}

impl Throttler {
    /// Create a scheduler acting as `principal`, the orchestrator identity
    /// its compile jobs are started by.
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn SourceControl>,
        orchestrator: Arc<dyn Orchestrator>,
        principal: UserId,
        settings: ThrottleSettings,
    ) -> Self {
        let oracle = RevisionOracle::new(Arc::clone(&store), Arc::clone(&source));
        Self {
            store,
            source,
            orchestrator,
            oracle,
            principal,
            settings,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Use a fixed seed for the visiting order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run a single admission pass over all online instances.
    #[instrument(skip(self), fields(principal = %self.principal, dry_run = self.settings.dry_run))]
    pub async fn run(&mut self) -> SchedulerResult<RunReport> {
        let mut instances = self
            .store
            .online_instances()
            .await
            .map_err(SchedulerError::ListInstances)?;
        let active_jobs = self
            .store
            .active_compile_jobs(self.principal, &self.settings.compile_job_description)
            .await
            .map_err(SchedulerError::ListActiveJobs)?;

        let compiling: HashSet<InstanceId> = active_jobs.iter().map(|j| j.instance_id).collect();
        debug!(
            active_jobs = active_jobs.len(),
            max_compile_jobs = self.settings.max_compile_jobs,
            instances = instances.len(),
            "Fetched run snapshot"
        );

        instances.shuffle(&mut self.rng);
        let order = instances.iter().map(|i| i.id).collect();
        let mut state = RunState::new(order, active_jobs.len(), self.settings.max_compile_jobs);

        for instance in &instances {
            if !state.has_capacity() {
                debug!(
                    active_jobs = state.active_jobs(),
                    "Max compile jobs reached, ending run early"
                );
                state.record_abort();
                break;
            }
            state.record_processed();

            if compiling.contains(&instance.id) {
                debug!(instance_id = %instance.id, name = %instance.name, "Skipping: already compiling");
                state.record_compiling();
                continue;
            }

            if let Err(e) = self.process(instance, &mut state).await {
                warn!(
                    instance_id = %instance.id,
                    name = %instance.name,
                    error = %e,
                    "Skipping instance after failure"
                );
                state.record_failed();
            }
        }

        let report = state.finish();
        if report.triggered_count() > 0 {
            info!(
                instances_total = report.instances_total,
                instances_processed = report.instances_processed,
                already_compiling = report.already_compiling,
                already_current = report.already_current,
                triggered = report.triggered_count(),
                failed = report.failed,
                "Throttle run complete"
            );
        } else {
            debug!(
                instances_total = report.instances_total,
                instances_processed = report.instances_processed,
                already_compiling = report.already_compiling,
                already_current = report.already_current,
                failed = report.failed,
                "Throttle run complete, nothing triggered"
            );
        }

        Ok(report)
    }

    /// Check one instance for staleness and trigger it if needed.
    async fn process(&self, instance: &Instance, state: &mut RunState) -> Result<(), InstanceError> {
        match self.oracle.staleness(instance).await? {
            Staleness::Current(revision) => {
                debug!(
                    instance_id = %instance.id,
                    name = %instance.name,
                    revision = %revision,
                    "Skipping: deployment is already latest"
                );
                state.record_current();
            }
            Staleness::Stale { upstream, .. } => {
                if let TriggerOutcome::NoCapacity = self.trigger(instance, state).await? {
                    debug!(
                        instance_id = %instance.id,
                        upstream = %upstream,
                        "Unable to update: max compile jobs reached"
                    );
                }
            }
        }
        Ok(())
    }

    /// Update the repository and deploy, counting the new job against capacity.
    async fn trigger(
        &self,
        instance: &Instance,
        state: &mut RunState,
    ) -> Result<TriggerOutcome, InstanceError> {
        // Checked again right before any request goes out.
        if !state.has_capacity() {
            return Ok(TriggerOutcome::NoCapacity);
        }

        let repository = self
            .orchestrator
            .repository_state(instance.id)
            .await
            .map_err(InstanceError::RepositoryState)?;
        let branch = self.source.current_branch(&instance.path).await?;
        let update = UpdateRequest {
            branch,
            test_merges: preserved_test_merges(&repository),
        };

        if self.settings.dry_run {
            info!(
                instance_id = %instance.id,
                name = %instance.name,
                branch = %update.branch,
                test_merges = update.test_merges.len(),
                "Dry run: would trigger update"
            );
        } else {
            info!(
                instance_id = %instance.id,
                name = %instance.name,
                branch = %update.branch,
                test_merges = update.test_merges.len(),
                "Triggering update"
            );
            self.orchestrator
                .request_update(instance.id, &update)
                .await
                .map_err(InstanceError::Update)?;
            self.orchestrator
                .request_deploy(instance.id)
                .await
                .map_err(InstanceError::Deploy)?;
        }

        state.record_trigger(instance.id);
        Ok(TriggerOutcome::Triggered)
    }
}

/// Active test merges, resubmitted with their target commit left for the
/// orchestrator to resolve against the updated branch.
fn preserved_test_merges(repository: &RepositoryState) -> Vec<TestMergeParameters> {
    repository
        .active_test_merges
        .iter()
        .map(TestMergeParameters::resubmit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use throttle_tgs::ActiveTestMerge;

    #[test]
    fn test_preserved_test_merges_clear_target() {
        let repository = RepositoryState {
            tracked_branch: Some("master".to_string()),
            active_test_merges: vec![
                ActiveTestMerge {
                    number: 5,
                    comment: Some("fix".to_string()),
                    target_commit_sha: Some("abc".to_string()),
                },
                ActiveTestMerge {
                    number: 7,
                    comment: None,
                    target_commit_sha: Some("def".to_string()),
                },
            ],
        };

        let merges = preserved_test_merges(&repository);

        assert_eq!(merges.len(), 2);
        assert!(merges.iter().all(|m| m.target_commit_sha.is_none()));
        assert_eq!(merges[0].comment.as_deref(), Some("fix"));
        assert_eq!(merges[1].number, 7);
    }

    #[test]
    fn test_no_active_merges_resubmits_nothing() {
        assert!(preserved_test_merges(&RepositoryState::default()).is_empty());
    }
}
