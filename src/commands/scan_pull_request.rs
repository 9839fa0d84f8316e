//! `scan-pull-request`: scan the checked-out pull request and comment on it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::comment::render_pull_request_comment;
use super::{FrogbotCommand, scan_dir};
use crate::config::{RepoAggregator, Repository};
use crate::connectivity::AccessCheckResult;
use crate::scanner::{ScanResults, Scanner};
use crate::vcs::{PullRequestInfo, VcsClient, checkout_branch};

/// Scans the pull request whose source branch is checked out in the
/// current directory, the usual layout of a CI job.
pub struct ScanPullRequestCmd {
    scanner: Arc<dyn Scanner>,
    source_root: PathBuf,
}

impl ScanPullRequestCmd {
    pub fn new(scanner: Arc<dyn Scanner>) -> Self {
        Self {
            scanner,
            source_root: PathBuf::from("."),
        }
    }

    /// Scan the source branch from `root` instead of the current directory.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }
}

#[async_trait]
impl FrogbotCommand for ScanPullRequestCmd {
    async fn run(
        &self,
        repositories: &RepoAggregator,
        client: &dyn VcsClient,
        frogbot_repo_connection: &AccessCheckResult,
    ) -> Result<()> {
        let repo = match repositories.first() {
            Some(repo) if repositories.len() == 1 => repo,
            _ => anyhow::bail!(
                "scan-pull-request expects exactly one repository, found {}",
                repositories.len()
            ),
        };
        let id = repo
            .git
            .pull_request_id
            .context("No pull request id configured")?;
        let pr = client
            .get_pull_request(&repo.git.owner, &repo.git.repo_name, id)
            .await
            .with_context(|| format!("Failed to fetch pull request #{} of {}", id, repo.full_name()))?;

        tracing::info!(
            repo = %repo.full_name(),
            pull_request = pr.id,
            source = %pr.source_branch,
            target = %pr.target_branch,
            "Scanning pull request"
        );
        let results =
            scan_pull_request(self.scanner.as_ref(), repo, client, &pr, &self.source_root).await?;
        post_results(client, repo, &pr, &results, frogbot_repo_connection).await?;
        enforce_fail_policy(repo, &pr, &results)
    }
}

/// Scan the source checkout at `source_root`. Unless every vulnerability is
/// requested, only findings the target branch does not already have are kept.
pub(crate) async fn scan_pull_request(
    scanner: &dyn Scanner,
    repo: &Repository,
    client: &dyn VcsClient,
    pr: &PullRequestInfo,
    source_root: &Path,
) -> Result<ScanResults> {
    let source = scanner
        .audit(&scan_dir(source_root, repo))
        .await
        .with_context(|| format!("Failed to scan source branch {}", pr.source_branch))?;
    if repo.scan.include_all_vulnerabilities {
        return Ok(source);
    }

    let scratch = tempfile::Builder::new()
        .prefix("frogbot-target-")
        .tempdir()
        .context("Failed to create checkout directory")?;
    let clone_url = client.clone_url(&repo.git.owner, &repo.git.repo_name);
    let target_root = checkout_branch(
        &clone_url,
        &repo.git.token,
        &pr.target_branch,
        &scratch.path().join("target"),
    )
    .await?;
    let target = scanner
        .audit(&scan_dir(&target_root, repo))
        .await
        .with_context(|| format!("Failed to scan target branch {}", pr.target_branch))?;

    let introduced = source.new_since(&target);
    tracing::info!(
        total = source.vulnerabilities.len(),
        introduced = introduced.vulnerabilities.len(),
        "Compared pull request against target branch"
    );
    Ok(introduced)
}

pub(crate) async fn post_results(
    client: &dyn VcsClient,
    repo: &Repository,
    pr: &PullRequestInfo,
    results: &ScanResults,
    connection: &AccessCheckResult,
) -> Result<()> {
    let body = render_pull_request_comment(results, connection);
    client
        .add_pull_request_comment(&repo.git.owner, &repo.git.repo_name, pr.id, &body)
        .await
        .with_context(|| format!("Failed to comment on pull request #{}", pr.id))
}

pub(crate) fn enforce_fail_policy(
    repo: &Repository,
    pr: &PullRequestInfo,
    results: &ScanResults,
) -> Result<()> {
    if repo.scan.fail_on_security_issues && !results.is_empty() {
        anyhow::bail!(
            "Frogbot found {} vulnerabilities in pull request #{} of {}",
            results.vulnerabilities.len(),
            pr.id,
            repo.full_name()
        );
    }
    Ok(())
}
