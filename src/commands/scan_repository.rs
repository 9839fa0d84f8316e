//! `scan-repository` and `scan-multiple-repositories`.
//!
//! Each configured branch is checked out, scanned, and its latest commit gets
//! a `frogbot` commit status summarising the findings.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{FrogbotCommand, scan_dir};
use crate::config::{RepoAggregator, Repository};
use crate::connectivity::AccessCheckResult;
use crate::errors::JoinedError;
use crate::scanner::{ScanResults, Scanner};
use crate::vcs::{CommitState, CommitStatus, VcsClient, checkout_branch};

/// Context name of the commit status frogbot publishes.
pub const STATUS_CONTEXT: &str = "frogbot";

fn commit_status(results: &ScanResults) -> CommitStatus {
    let (state, description) = if results.is_empty() {
        (CommitState::Success, "No vulnerabilities found".to_string())
    } else {
        (
            CommitState::Failure,
            format!(
                "Found {} vulnerabilities ({} fixable)",
                results.vulnerabilities.len(),
                results.fixable_count()
            ),
        )
    };
    CommitStatus {
        state,
        description,
        context: STATUS_CONTEXT.to_string(),
    }
}

pub struct ScanRepositoryCmd {
    scanner: Arc<dyn Scanner>,
}

impl ScanRepositoryCmd {
    pub fn new(scanner: Arc<dyn Scanner>) -> Self {
        Self { scanner }
    }

    async fn scan_branch(&self, repo: &Repository, client: &dyn VcsClient, branch: &str) -> Result<()> {
        tracing::info!(repo = %repo.full_name(), branch = %branch, "Scanning branch");
        let scratch = tempfile::Builder::new()
            .prefix("frogbot-branch-")
            .tempdir()
            .context("Failed to create checkout directory")?;
        let clone_url = client.clone_url(&repo.git.owner, &repo.git.repo_name);
        let root = checkout_branch(&clone_url, &repo.git.token, branch, &scratch.path().join("repo"))
            .await?;

        let results = self
            .scanner
            .audit(&scan_dir(&root, repo))
            .await
            .context("Scan failed")?;

        let sha = client
            .get_latest_commit(&repo.git.owner, &repo.git.repo_name, branch)
            .await
            .context("Failed to resolve latest commit")?;
        client
            .set_commit_status(&repo.git.owner, &repo.git.repo_name, &sha, &commit_status(&results))
            .await
            .context("Failed to publish commit status")?;

        if repo.scan.fail_on_security_issues && !results.is_empty() {
            anyhow::bail!("Frogbot found {} vulnerabilities", results.vulnerabilities.len());
        }
        Ok(())
    }

    /// Scan every configured branch of `repo`; branch failures are joined.
    pub(crate) async fn scan_repository(
        &self,
        repo: &Repository,
        client: &dyn VcsClient,
    ) -> Result<()> {
        if repo.git.branches.is_empty() {
            anyhow::bail!(
                "No branches configured for {}; set JF_GIT_BASE_BRANCH",
                repo.full_name()
            );
        }
        client
            .test_connection(&repo.git.owner, &repo.git.repo_name)
            .await?;

        let mut failures = JoinedError::new();
        for branch in &repo.git.branches {
            if let Err(e) = self.scan_branch(repo, client, branch).await {
                failures.push(e.context(format!("Branch {} of {}", branch, repo.full_name())));
            }
        }
        failures.into_result().map_err(anyhow::Error::from)
    }
}

#[async_trait]
impl FrogbotCommand for ScanRepositoryCmd {
    async fn run(
        &self,
        repositories: &RepoAggregator,
        client: &dyn VcsClient,
        _frogbot_repo_connection: &AccessCheckResult,
    ) -> Result<()> {
        match repositories.first() {
            Some(repo) if repositories.len() == 1 => self.scan_repository(repo, client).await,
            _ => anyhow::bail!(
                "scan-repository expects exactly one repository, found {}",
                repositories.len()
            ),
        }
    }
}

/// Runs `scan-repository` for every configured repository.
pub struct ScanMultipleRepositoriesCmd {
    inner: ScanRepositoryCmd,
}

impl ScanMultipleRepositoriesCmd {
    pub fn new(scanner: Arc<dyn Scanner>) -> Self {
        Self {
            inner: ScanRepositoryCmd::new(scanner),
        }
    }
}

#[async_trait]
impl FrogbotCommand for ScanMultipleRepositoriesCmd {
    async fn run(
        &self,
        repositories: &RepoAggregator,
        client: &dyn VcsClient,
        _frogbot_repo_connection: &AccessCheckResult,
    ) -> Result<()> {
        let mut failures = JoinedError::new();
        for repo in repositories {
            if let Err(e) = self.inner.scan_repository(repo, client).await {
                tracing::warn!(repo = %repo.full_name(), error = %format!("{:#}", e), "Repository scan failed");
                failures.push(e);
            }
        }
        failures.into_result().map_err(anyhow::Error::from)
    }
}
