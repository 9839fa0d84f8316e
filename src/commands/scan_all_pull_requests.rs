//! `scan-all-pull-requests`: scan every open pull request not yet handled.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::FrogbotCommand;
use super::comment::needs_scan;
use super::scan_pull_request::{enforce_fail_policy, post_results, scan_pull_request};
use crate::config::{RepoAggregator, Repository};
use crate::connectivity::AccessCheckResult;
use crate::errors::JoinedError;
use crate::scanner::Scanner;
use crate::vcs::{PullRequestInfo, VcsClient, checkout_branch};

pub struct ScanAllPullRequestsCmd {
    scanner: Arc<dyn Scanner>,
}

impl ScanAllPullRequestsCmd {
    pub fn new(scanner: Arc<dyn Scanner>) -> Self {
        Self { scanner }
    }

    async fn scan_one(
        &self,
        repo: &Repository,
        client: &dyn VcsClient,
        pr: &PullRequestInfo,
        connection: &AccessCheckResult,
    ) -> Result<()> {
        let comments = client
            .list_pull_request_comments(&repo.git.owner, &repo.git.repo_name, pr.id)
            .await
            .context("Failed to list comments")?;
        if !needs_scan(&comments) {
            tracing::info!(pull_request = pr.id, "Already scanned; skipping");
            return Ok(());
        }

        tracing::info!(
            repo = %repo.full_name(),
            pull_request = pr.id,
            source = %pr.source_branch,
            "Scanning pull request"
        );
        let scratch = tempfile::Builder::new()
            .prefix("frogbot-source-")
            .tempdir()
            .context("Failed to create checkout directory")?;
        let clone_url = pr
            .source_clone_url
            .clone()
            .unwrap_or_else(|| client.clone_url(&repo.git.owner, &repo.git.repo_name));
        let source_root = checkout_branch(
            &clone_url,
            &repo.git.token,
            &pr.source_branch,
            &scratch.path().join("source"),
        )
        .await?;

        let results = scan_pull_request(self.scanner.as_ref(), repo, client, pr, &source_root).await?;
        post_results(client, repo, pr, &results, connection).await?;
        enforce_fail_policy(repo, pr, &results)
    }
}

#[async_trait]
impl FrogbotCommand for ScanAllPullRequestsCmd {
    async fn run(
        &self,
        repositories: &RepoAggregator,
        client: &dyn VcsClient,
        frogbot_repo_connection: &AccessCheckResult,
    ) -> Result<()> {
        let mut failures = JoinedError::new();
        for repo in repositories {
            let pull_requests = match client
                .list_open_pull_requests(&repo.git.owner, &repo.git.repo_name)
                .await
            {
                Ok(prs) => prs,
                Err(e) => {
                    failures.push(e.context(format!(
                        "Failed to list open pull requests of {}",
                        repo.full_name()
                    )));
                    continue;
                }
            };
            tracing::info!(
                repo = %repo.full_name(),
                open = pull_requests.len(),
                "Found open pull requests"
            );

            for pr in &pull_requests {
                if let Err(e) = self
                    .scan_one(repo, client, pr, frogbot_repo_connection)
                    .await
                {
                    tracing::warn!(pull_request = pr.id, error = %format!("{:#}", e), "Pull request scan failed");
                    failures.push(
                        e.context(format!("Pull request #{} of {}", pr.id, repo.full_name())),
                    );
                }
            }
        }
        failures.into_result().map_err(anyhow::Error::from)
    }
}
