//! Version-control hosting client used by the scan commands.
//!
//! | Module     | Contents                                         |
//! |------------|--------------------------------------------------|
//! | `github`   | `GitHubClient`, the REST implementation           |
//! | `checkout` | cloning a branch into a scratch directory (git2) |

pub mod checkout;
pub mod github;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use checkout::checkout_branch;
pub use github::GitHubClient;

/// An open pull request (subset of fields the commands need).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub id: u64,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
    pub head_sha: String,
    /// Clone URL of the source repository; differs from the target for forks.
    pub source_clone_url: Option<String>,
}

/// A comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInfo {
    pub id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// State of a commit status published by a repository scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl std::fmt::Display for CommitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitState::Pending => write!(f, "pending"),
            CommitState::Success => write!(f, "success"),
            CommitState::Failure => write!(f, "failure"),
            CommitState::Error => write!(f, "error"),
        }
    }
}

/// A commit status to publish on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitStatus {
    pub state: CommitState,
    pub description: String,
    pub context: String,
}

/// Abstraction over the VCS hosting API for testability.
/// Real implementation: `GitHubClient`.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Verify the credentials can reach the given repository.
    async fn test_connection(&self, owner: &str, repo: &str) -> Result<()>;

    async fn get_pull_request(&self, owner: &str, repo: &str, id: u64) -> Result<PullRequestInfo>;

    async fn list_open_pull_requests(&self, owner: &str, repo: &str)
    -> Result<Vec<PullRequestInfo>>;

    async fn list_pull_request_comments(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
    ) -> Result<Vec<CommentInfo>>;

    async fn add_pull_request_comment(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
        body: &str,
    ) -> Result<()>;

    /// SHA of the latest commit on `branch`.
    async fn get_latest_commit(&self, owner: &str, repo: &str, branch: &str) -> Result<String>;

    async fn set_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()>;

    /// HTTPS clone URL of the repository.
    fn clone_url(&self, owner: &str, repo: &str) -> String;
}
