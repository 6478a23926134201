//! Dependency acquisition for a runnable [`Throttler`].
//!
//! A `Throttler` only comes into existence once the store, the
//! orchestrator session and the orchestrator identity are all in hand.
//! Nothing is retried; the caller logs the failure and exits.

use std::sync::Arc;

use thiserror::Error;
use throttle_tgs::{TgsClient, TgsError};
use tracing::info;

use crate::config::Config;
use crate::db::{Database, DbError};
use crate::git::GitInspector;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Throttler;

/// Which dependency could not be acquired.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("state store unavailable: {0}")]
    Store(#[source] DbError),

    #[error("orchestrator login failed: {0}")]
    OrchestratorLogin(#[source] TgsError),

    #[error("orchestrator identity lookup failed: {0}")]
    OrchestratorIdentity(#[source] TgsError),
}

impl StartupError {
    /// Short name of the failed dependency, for log fields.
    pub fn dependency(&self) -> &'static str {
        match self {
            Self::Store(_) => "state_store",
            Self::OrchestratorLogin(_) => "orchestrator_login",
            Self::OrchestratorIdentity(_) => "orchestrator_identity",
        }
    }
}

/// A connected scheduler plus the handles that need closing afterwards.
pub struct Connected {
    pub throttler: Throttler,
    pub database: Database,
}

/// Connect to every dependency and assemble a scheduler.
pub async fn connect(config: &Config, dry_run: bool) -> Result<Connected, StartupError> {
    let database = Database::connect(&config.database)
        .await
        .map_err(StartupError::Store)?;

    let client = TgsClient::login(&config.tgs.settings())
        .await
        .map_err(StartupError::OrchestratorLogin)?;
    let principal = client
        .current_identity()
        .await
        .map_err(StartupError::OrchestratorIdentity)?;
    info!(principal = %principal, "Orchestrator session established");

    let git = GitInspector::new(
        config.throttle.repository_subdir.clone(),
        config.throttle.git_timeout(),
    );

    let throttler = Throttler::new(
        Arc::new(database.clone()),
        Arc::new(git),
        Arc::new(client),
        principal,
        config.throttle.settings(dry_run),
    );

    Ok(Connected {
        throttler,
        database,
    })
}
