//! Request and response bodies for the subset of the TGS API in use.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric id of a TGS instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub i64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric id of a TGS user (the principal jobs are started by).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    pub bearer: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Subset of the user resource.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserResponse {
    pub id: i64,
}

/// A test merge as reported on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTestMerge {
    pub number: i64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub target_commit_sha: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevisionInformation {
    #[serde(default)]
    active_test_merges: Vec<ActiveTestMerge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepositoryResponse {
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    revision_information: Option<RevisionInformation>,
}

/// Repository state of one instance, as far as updates are concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryState {
    /// Branch the repository tracks, if it is on one.
    pub tracked_branch: Option<String>,
    /// Test merges currently applied on top of the branch.
    pub active_test_merges: Vec<ActiveTestMerge>,
}

impl From<RepositoryResponse> for RepositoryState {
    fn from(response: RepositoryResponse) -> Self {
        Self {
            tracked_branch: response.reference,
            active_test_merges: response
                .revision_information
                .map(|info| info.active_test_merges)
                .unwrap_or_default(),
        }
    }
}

/// A test merge to (re)apply as part of a repository update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMergeParameters {
    pub number: i64,
    /// Left unset to let the server resolve the PR head against the new base.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TestMergeParameters {
    /// Resubmission of an active merge with its target revision unresolved.
    pub fn resubmit(merge: &ActiveTestMerge) -> Self {
        Self {
            number: merge.number,
            target_commit_sha: None,
            comment: merge.comment.clone(),
        }
    }
}

/// Request to update an instance's repository from its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Branch to check out and update.
    pub branch: String,
    /// Test merges to apply after the update.
    pub test_merges: Vec<TestMergeParameters>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RepositoryUpdateBody<'a> {
    pub update_from_origin: bool,
    pub reference: &'a str,
    pub new_test_merges: &'a [TestMergeParameters],
}

impl<'a> From<&'a UpdateRequest> for RepositoryUpdateBody<'a> {
    fn from(request: &'a UpdateRequest) -> Self {
        Self {
            update_from_origin: true,
            reference: &request.branch,
            new_test_merges: &request.test_merges,
        }
    }
}
