//! Records read from the orchestrator's state.

use std::fmt;
use std::path::PathBuf;

pub use throttle_tgs::{InstanceId, UserId};

/// An online instance as listed by the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    /// Root of the instance on disk; the working copy lives beneath it.
    pub path: PathBuf,
}

/// A compile job that has started and not yet stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub job_id: i64,
    pub instance_id: InstanceId,
}

/// A source revision (commit hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Revision {
    fn from(sha: String) -> Self {
        Self(sha)
    }
}

impl From<&str> for Revision {
    fn from(sha: &str) -> Self {
        Self(sha.to_string())
    }
}
