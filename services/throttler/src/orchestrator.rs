//! Build-orchestration interface.
//!
//! The scheduler only needs four calls from the orchestrator; they are
//! abstracted here so runs can be exercised without a TGS server.

use async_trait::async_trait;
use throttle_tgs::{RepositoryState, TgsClient, TgsError, UpdateRequest};

use crate::model::{InstanceId, UserId};

/// Operations the scheduler issues against the orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Principal jobs started through this session are attributed to.
    async fn current_identity(&self) -> Result<UserId, TgsError>;

    /// Tracked branch and active test merges of an instance.
    async fn repository_state(&self, instance: InstanceId) -> Result<RepositoryState, TgsError>;

    /// Update the instance's repository from its remote.
    async fn request_update(
        &self,
        instance: InstanceId,
        update: &UpdateRequest,
    ) -> Result<(), TgsError>;

    /// Start a deployment for the instance.
    async fn request_deploy(&self, instance: InstanceId) -> Result<(), TgsError>;
}

#[async_trait]
impl Orchestrator for TgsClient {
    async fn current_identity(&self) -> Result<UserId, TgsError> {
        self.current_user_id().await
    }

    async fn repository_state(&self, instance: InstanceId) -> Result<RepositoryState, TgsError> {
        TgsClient::repository_state(self, instance).await
    }

    async fn request_update(
        &self,
        instance: InstanceId,
        update: &UpdateRequest,
    ) -> Result<(), TgsError> {
        self.update_repository(instance, update).await
    }

    async fn request_deploy(&self, instance: InstanceId) -> Result<(), TgsError> {
        self.deploy(instance).await
    }
}
