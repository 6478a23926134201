//! Source-control inspection of instance working copies.
//!
//! Runs `git` in the repository directory of an instance to find the
//! checked-out branch and the newest commit on its upstream. Every
//! invocation is bounded by a timeout; a timed-out process is killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::model::Revision;

/// Error type for git operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git in {}: {source}", .dir.display())]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed in {}: {stderr}", .dir.display())]
    Failed {
        command: String,
        dir: PathBuf,
        stderr: String,
    },

    #[error("git {command} timed out after {timeout:?} in {}", .dir.display())]
    Timeout {
        command: String,
        dir: PathBuf,
        timeout: Duration,
    },

    #[error("working copy {} has a detached HEAD", .0.display())]
    DetachedHead(PathBuf),

    #[error("unexpected upstream ref '{0}'")]
    MalformedUpstream(String),
}

/// Branch and upstream lookups for a working copy.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Name of the branch currently checked out for the instance.
    async fn current_branch(&self, instance_path: &Path) -> Result<String, GitError>;

    /// Fetch the tracked upstream branch (shallow, no submodules) and
    /// resolve it to a commit.
    async fn latest_upstream_revision(&self, instance_path: &Path) -> Result<Revision, GitError>;
}

/// [`SourceControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitInspector {
    repository_subdir: PathBuf,
    timeout: Duration,
}

impl GitInspector {
    pub fn new(repository_subdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repository_subdir: repository_subdir.into(),
            timeout,
        }
    }

    fn working_copy(&self, instance_path: &Path) -> PathBuf {
        instance_path.join(&self.repository_subdir)
    }

    /// Run git with `args` in `dir` and return trimmed stdout.
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let command = args.join(" ");

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(dir = %dir.display(), command = %command, "Running git");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| GitError::Spawn {
                dir: dir.to_path_buf(),
                source,
            })?,
            Err(_) => {
                return Err(GitError::Timeout {
                    command,
                    dir: dir.to_path_buf(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Failed {
                command,
                dir: dir.to_path_buf(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitInspector {
    async fn current_branch(&self, instance_path: &Path) -> Result<String, GitError> {
        let dir = self.working_copy(instance_path);
        let branch = self.git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;

        if branch == "HEAD" {
            return Err(GitError::DetachedHead(dir));
        }
        Ok(branch)
    }

    async fn latest_upstream_revision(&self, instance_path: &Path) -> Result<Revision, GitError> {
        let dir = self.working_copy(instance_path);

        let upstream = self
            .git(
                &dir,
                &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            )
            .await?;
        let (remote, branch) = split_upstream(&upstream)?;

        self.git(
            &dir,
            &[
                "fetch",
                "-q",
                "--recurse-submodules=no",
                "--depth=1",
                remote,
                branch,
            ],
        )
        .await?;

        let sha = self.git(&dir, &["rev-parse", upstream.as_str()]).await?;
        debug!(upstream = %upstream, sha = %sha, "Resolved upstream revision");
        Ok(Revision::from(sha))
    }
}

/// Split `origin/feature/x` into `("origin", "feature/x")`.
fn split_upstream(upstream: &str) -> Result<(&str, &str), GitError> {
    match upstream.split_once('/') {
        Some((remote, branch)) if !remote.is_empty() && !branch.is_empty() => Ok((remote, branch)),
        _ => Err(GitError::MalformedUpstream(upstream.to_string())),
    }
}
