//! In-memory collaborators for exercising scheduler runs.
//!
//! - `MemoryStore`: instances, active jobs and deployment history
//! - `StaticSourceControl`: fixed branches and upstream revisions per path
//! - `RecordingOrchestrator`: records update/deploy requests, and can mark
//!   deployed instances as compiling in a `MemoryStore`

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use throttle_tgs::{ActiveTestMerge, RepositoryState, TgsError, UpdateRequest};

use crate::db::{DbError, StateStore};
use crate::git::{GitError, SourceControl};
use crate::model::{ActiveJob, Instance, InstanceId, Revision, UserId};
use crate::orchestrator::Orchestrator;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build an instance rooted at `/srv/tgs/<name>`.
pub fn instance(id: i64, name: &str) -> Instance {
    Instance {
        id: InstanceId(id),
        name: name.to_string(),
        path: PathBuf::from(format!("/srv/tgs/{name}")),
    }
}

#[derive(Default)]
struct StoreState {
    instances: Vec<Instance>,
    active_jobs: Vec<ActiveJob>,
    last_success: HashMap<InstanceId, Revision>,
    failing_revisions: HashSet<InstanceId>,
    revision_lookups: Vec<InstanceId>,
    fail_listing: bool,
    next_job_id: i64,
}

/// State store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                instances,
                next_job_id: 1,
                ..StoreState::default()
            }),
        }
    }

    pub fn set_last_success(&self, instance: InstanceId, revision: impl Into<Revision>) {
        lock(&self.state)
            .last_success
            .insert(instance, revision.into());
    }

    /// Register a running compile job for `instance`.
    pub fn add_active_job(&self, instance: InstanceId) {
        let mut state = lock(&self.state);
        let job_id = state.next_job_id;
        state.next_job_id += 1;
        state.active_jobs.push(ActiveJob {
            job_id,
            instance_id: instance,
        });
    }

    pub fn fail_revision_lookup(&self, instance: InstanceId) {
        lock(&self.state).failing_revisions.insert(instance);
    }

    pub fn fail_listing(&self) {
        lock(&self.state).fail_listing = true;
    }

    /// Instances whose deployment history was queried, in order.
    pub fn revision_lookups(&self) -> Vec<InstanceId> {
        lock(&self.state).revision_lookups.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn online_instances(&self) -> Result<Vec<Instance>, DbError> {
        let state = lock(&self.state);
        if state.fail_listing {
            return Err(DbError::Query(sqlx::Error::PoolClosed));
        }
        Ok(state.instances.clone())
    }

    async fn active_compile_jobs(
        &self,
        _started_by: UserId,
        _description: &str,
    ) -> Result<Vec<ActiveJob>, DbError> {
        Ok(lock(&self.state).active_jobs.clone())
    }

    async fn last_successful_revision(
        &self,
        instance: InstanceId,
    ) -> Result<Option<Revision>, DbError> {
        let mut state = lock(&self.state);
        state.revision_lookups.push(instance);
        if state.failing_revisions.contains(&instance) {
            return Err(DbError::Query(sqlx::Error::RowNotFound));
        }
        Ok(state.last_success.get(&instance).cloned())
    }
}

#[derive(Default)]
struct SourceState {
    upstream: HashMap<PathBuf, Revision>,
    branches: HashMap<PathBuf, String>,
    fetches: Vec<PathBuf>,
}

/// Source control answering from fixed tables. Paths without an upstream
/// revision fail like an unreachable remote; the default branch is `master`.
#[derive(Default)]
pub struct StaticSourceControl {
    state: Mutex<SourceState>,
}

impl StaticSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_upstream(&self, instance: &Instance, revision: impl Into<Revision>) {
        lock(&self.state)
            .upstream
            .insert(instance.path.clone(), revision.into());
    }

    pub fn set_branch(&self, instance: &Instance, branch: &str) {
        lock(&self.state)
            .branches
            .insert(instance.path.clone(), branch.to_string());
    }

    /// Paths an upstream fetch was attempted for, in order.
    pub fn fetches(&self) -> Vec<PathBuf> {
        lock(&self.state).fetches.clone()
    }
}

#[async_trait]
impl SourceControl for StaticSourceControl {
    async fn current_branch(&self, instance_path: &Path) -> Result<String, GitError> {
        Ok(lock(&self.state)
            .branches
            .get(instance_path)
            .cloned()
            .unwrap_or_else(|| "master".to_string()))
    }

    async fn latest_upstream_revision(&self, instance_path: &Path) -> Result<Revision, GitError> {
        let mut state = lock(&self.state);
        state.fetches.push(instance_path.to_path_buf());
        state
            .upstream
            .get(instance_path)
            .cloned()
            .ok_or_else(|| GitError::Failed {
                command: "fetch".to_string(),
                dir: instance_path.to_path_buf(),
                stderr: "could not read from remote repository".to_string(),
            })
    }
}

#[derive(Default)]
struct OrchestratorState {
    repositories: HashMap<InstanceId, RepositoryState>,
    updates: Vec<(InstanceId, UpdateRequest)>,
    deploys: Vec<InstanceId>,
    failing_deploys: HashSet<InstanceId>,
}

/// Orchestrator that records requests instead of sending them.
#[derive(Default)]
pub struct RecordingOrchestrator {
    identity: i64,
    state: Mutex<OrchestratorState>,
    store: Option<Arc<MemoryStore>>,
}

impl RecordingOrchestrator {
    pub fn new() -> Self {
        Self {
            identity: 1,
            ..Self::default()
        }
    }

    /// Deployments start a compile job in `store`, like the real orchestrator.
    pub fn reflecting(store: Arc<MemoryStore>) -> Self {
        Self {
            identity: 1,
            store: Some(store),
            ..Self::default()
        }
    }

    pub fn set_test_merges(&self, instance: InstanceId, merges: &[(i64, &str)]) {
        let active_test_merges = merges
            .iter()
            .map(|(number, comment)| ActiveTestMerge {
                number: *number,
                comment: Some(comment.to_string()),
                target_commit_sha: Some(format!("pr{number}head")),
            })
            .collect();
        lock(&self.state).repositories.insert(
            instance,
            RepositoryState {
                tracked_branch: Some("master".to_string()),
                active_test_merges,
            },
        );
    }

    pub fn fail_deploy(&self, instance: InstanceId) {
        lock(&self.state).failing_deploys.insert(instance);
    }

    pub fn updates(&self) -> Vec<(InstanceId, UpdateRequest)> {
        lock(&self.state).updates.clone()
    }

    pub fn deploys(&self) -> Vec<InstanceId> {
        lock(&self.state).deploys.clone()
    }
}

#[async_trait]
impl Orchestrator for RecordingOrchestrator {
    async fn current_identity(&self) -> Result<UserId, TgsError> {
        Ok(UserId(self.identity))
    }

    async fn repository_state(&self, instance: InstanceId) -> Result<RepositoryState, TgsError> {
        Ok(lock(&self.state)
            .repositories
            .get(&instance)
            .cloned()
            .unwrap_or_default())
    }

    async fn request_update(
        &self,
        instance: InstanceId,
        update: &UpdateRequest,
    ) -> Result<(), TgsError> {
        lock(&self.state).updates.push((instance, update.clone()));
        Ok(())
    }

    async fn request_deploy(&self, instance: InstanceId) -> Result<(), TgsError> {
        {
            let mut state = lock(&self.state);
            if state.failing_deploys.contains(&instance) {
                return Err(TgsError::Api {
                    method: "PUT",
                    path: "/DreamMaker".to_string(),
                    status: 409,
                    message: "deployment already in progress".to_string(),
                });
            }
            state.deploys.push(instance);
        }

        if let Some(store) = &self.store {
            store.add_active_job(instance);
        }
        Ok(())
    }
}
