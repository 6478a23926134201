//! State store access.
//!
//! Read-only queries against the orchestrator's database:
//! - Online instances
//! - Compile jobs still running for a given principal
//! - The revision of an instance's last successful compile job
//!
//! The database layer uses SQLx with MySQL. Nothing here writes.

mod error;

pub use error::DbError;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use tracing::{debug, info};

use crate::model::{ActiveJob, Instance, InstanceId, Revision, UserId};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    /// Database connection URL.
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

const fn default_max_connections() -> u32 {
    2
}

const fn default_acquire_timeout_secs() -> u64 {
    5
}

impl DbConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Read access to instance and job state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// All instances currently marked online.
    async fn online_instances(&self) -> Result<Vec<Instance>, DbError>;

    /// Unfinished jobs started by `started_by` whose description is exactly `description`.
    async fn active_compile_jobs(
        &self,
        started_by: UserId,
        description: &str,
    ) -> Result<Vec<ActiveJob>, DbError>;

    /// Revision built by the most recent finished, uncancelled, error-free
    /// compile job of the instance. `None` if there never was one.
    async fn last_successful_revision(
        &self,
        instance: InstanceId,
    ) -> Result<Option<Revision>, DbError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: MySqlPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            "Connecting to database"
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StateStore for Database {
    async fn online_instances(&self) -> Result<Vec<Instance>, DbError> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT Id, Name, Path
            FROM Instances
            WHERE Online = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        debug!(count = rows.len(), "Fetched online instances");
        Ok(rows.into_iter().map(Instance::from).collect())
    }

    async fn active_compile_jobs(
        &self,
        started_by: UserId,
        description: &str,
    ) -> Result<Vec<ActiveJob>, DbError> {
        let rows = sqlx::query_as::<_, ActiveJobRow>(
            r#"
            SELECT Id, InstanceId
            FROM Jobs
            WHERE Description = ?
            AND StoppedAt IS NULL
            AND StartedById = ?
            "#,
        )
        .bind(description)
        .bind(started_by.0)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        debug!(count = rows.len(), started_by = %started_by, "Fetched active compile jobs");
        Ok(rows.into_iter().map(ActiveJob::from).collect())
    }

    async fn last_successful_revision(
        &self,
        instance: InstanceId,
    ) -> Result<Option<Revision>, DbError> {
        let sha: Option<String> = sqlx::query_scalar(
            r#"
            SELECT ri.CommitSha
            FROM Jobs j
            JOIN CompileJobs cj ON cj.JobId = j.Id
            JOIN RevisionInformations ri ON ri.Id = cj.RevisionInformationId
            WHERE j.InstanceId = ?
            AND j.Cancelled = 0
            AND j.StoppedAt IS NOT NULL
            AND j.ErrorCode IS NULL
            ORDER BY j.StoppedAt DESC, j.Id DESC
            LIMIT 1
            "#,
        )
        .bind(instance.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(sha.map(Revision::from))
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug)]
struct InstanceRow {
    id: i64,
    name: String,
    path: String,
}

impl<'r> sqlx::FromRow<'r, MySqlRow> for InstanceRow {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("Id")?,
            name: row.try_get("Name")?,
            path: row.try_get("Path")?,
        })
    }
}

impl From<InstanceRow> for Instance {
    fn from(row: InstanceRow) -> Self {
        Self {
            id: InstanceId(row.id),
            name: row.name,
            path: PathBuf::from(row.path),
        }
    }
}

#[derive(Debug)]
struct ActiveJobRow {
    id: i64,
    instance_id: i64,
}

impl<'r> sqlx::FromRow<'r, MySqlRow> for ActiveJobRow {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("Id")?,
            instance_id: row.try_get("InstanceId")?,
        })
    }
}

impl From<ActiveJobRow> for ActiveJob {
    fn from(row: ActiveJobRow) -> Self {
        Self {
            job_id: row.id,
            instance_id: InstanceId(row.instance_id),
        }
    }
}
