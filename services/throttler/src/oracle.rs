//! Revision oracle: what was last deployed, and what is available upstream.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::db::{DbError, StateStore};
use crate::git::{GitError, SourceControl};
use crate::model::{Instance, InstanceId, Revision};

/// Failure to establish the revisions of one instance.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("reading last successful revision: {0}")]
    Store(#[from] DbError),

    #[error("reading upstream revision: {0}")]
    SourceControl(#[from] GitError),
}

/// Whether an instance needs a new deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// The last successful deployment built the latest upstream revision.
    Current(Revision),

    /// Upstream moved on, or nothing was ever deployed successfully.
    Stale {
        last_success: Option<Revision>,
        upstream: Revision,
    },
}

impl Staleness {
    pub fn compare(last_success: Option<Revision>, upstream: Revision) -> Self {
        match last_success {
            Some(last) if last == upstream => Self::Current(last),
            last_success => Self::Stale {
                last_success,
                upstream,
            },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Answers revision questions from the state store and the working copy.
#[derive(Clone)]
pub struct RevisionOracle {
    store: Arc<dyn StateStore>,
    source: Arc<dyn SourceControl>,
}

impl RevisionOracle {
    pub fn new(store: Arc<dyn StateStore>, source: Arc<dyn SourceControl>) -> Self {
        Self { store, source }
    }

    pub async fn last_successful_revision(
        &self,
        instance: InstanceId,
    ) -> Result<Option<Revision>, OracleError> {
        Ok(self.store.last_successful_revision(instance).await?)
    }

    pub async fn latest_upstream_revision(
        &self,
        instance_path: &Path,
    ) -> Result<Revision, OracleError> {
        Ok(self.source.latest_upstream_revision(instance_path).await?)
    }

    /// Compare the last successful revision against upstream.
    pub async fn staleness(&self, instance: &Instance) -> Result<Staleness, OracleError> {
        let last_success = self.last_successful_revision(instance.id).await?;
        let upstream = self.latest_upstream_revision(&instance.path).await?;

        debug!(
            instance_id = %instance.id,
            last_success = last_success.as_ref().map(Revision::as_str).unwrap_or("<none>"),
            upstream = %upstream,
            "Resolved revisions"
        );

        Ok(Staleness::compare(last_success, upstream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_revisions_are_current() {
        let staleness = Staleness::compare(Some("sha1".into()), "sha1".into());
        assert_eq!(staleness, Staleness::Current("sha1".into()));
        assert!(!staleness.is_stale());
    }

    #[test]
    fn test_differing_revisions_are_stale() {
        let staleness = Staleness::compare(Some("sha2".into()), "sha3".into());
        assert!(staleness.is_stale());
    }

    #[test]
    fn test_missing_last_success_is_stale() {
        let staleness = Staleness::compare(None, "sha9".into());
        assert_eq!(
            staleness,
            Staleness::Stale {
                last_success: None,
                upstream: "sha9".into(),
            }
        );
    }
}
