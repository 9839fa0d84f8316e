use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CommentInfo, CommitStatus, PullRequestInfo, VcsClient};

pub const GITHUB_API_ENDPOINT: &str = "https://api.github.com";
const USER_AGENT: &str = "frogbot";
const PER_PAGE: usize = 100;

/// A GitHub pull request (subset of fields).
#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    title: String,
    head: GitHubRef,
    base: GitHubRef,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
    repo: Option<GitHubRefRepo>,
}

#[derive(Debug, Deserialize)]
struct GitHubRefRepo {
    clone_url: String,
}

impl From<GitHubPullRequest> for PullRequestInfo {
    fn from(pr: GitHubPullRequest) -> Self {
        Self {
            id: pr.number,
            title: pr.title,
            source_branch: pr.head.name,
            target_branch: pr.base.name,
            head_sha: pr.head.sha,
            source_clone_url: pr.head.repo.map(|r| r.clone_url),
        }
    }
}

/// A GitHub issue comment (subset of fields).
#[derive(Debug, Deserialize)]
struct GitHubComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    commit: GitHubCommitRef,
}

#[derive(Debug, Deserialize)]
struct GitHubCommitRef {
    sha: String,
}

#[derive(Debug, Serialize)]
struct NewComment<'a> {
    body: &'a str,
}

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Whether a string carries one of the current GitHub token prefixes.
///
/// Format check only. Older 40-character tokens and the workflow
/// `GITHUB_TOKEN` of some enterprise versions carry no prefix, so callers
/// should warn rather than reject.
pub fn has_github_token_prefix(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Derive the web host from an API endpoint.
///
/// - `https://api.github.com` → `https://github.com`
/// - `https://ghe.example.com/api/v3` → `https://ghe.example.com`
fn web_base_from_api(api_endpoint: &str) -> String {
    let trimmed = api_endpoint.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://api.") {
        return format!("https://{}", rest);
    }
    trimmed
        .strip_suffix("/api/v3")
        .unwrap_or(trimmed)
        .to_string()
}

/// GitHub REST client authenticated with a token.
pub struct GitHubClient {
    http: reqwest::Client,
    api_endpoint: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_endpoint: api_endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_endpoint, path)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Fetch every page of a list endpoint.
    async fn get_all_pages<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let page_str = page.to_string();
            let per_page = PER_PAGE.to_string();
            let mut query: Vec<(&str, &str)> = extra_query.to_vec();
            query.push(("per_page", &per_page));
            query.push(("page", &page_str));

            let resp: Vec<T> = self
                .get(url)
                .query(&query)
                .send()
                .await
                .with_context(|| format!("Failed to send request to {}", url))?
                .error_for_status()
                .with_context(|| format!("GitHub API returned error status for {}", url))?
                .json()
                .await
                .with_context(|| format!("Failed to parse response from {}", url))?;

            let count = resp.len();
            all.extend(resp);
            if count < PER_PAGE {
                break; // Last page
            }
            page += 1;
        }

        Ok(all)
    }
}

#[async_trait]
impl VcsClient for GitHubClient {
    async fn test_connection(&self, owner: &str, repo: &str) -> Result<()> {
        let url = self.url(&format!("/repos/{}/{}", owner, repo));
        self.get(&url)
            .send()
            .await
            .context("Failed to reach GitHub")?
            .error_for_status()
            .with_context(|| format!("Cannot access repository {}/{}", owner, repo))?;
        Ok(())
    }

    async fn get_pull_request(&self, owner: &str, repo: &str, id: u64) -> Result<PullRequestInfo> {
        let url = self.url(&format!("/repos/{}/{}/pulls/{}", owner, repo, id));
        let pr: GitHubPullRequest = self
            .get(&url)
            .send()
            .await
            .context("Failed to send pull request request to GitHub")?
            .error_for_status()
            .with_context(|| format!("Pull request #{} not found in {}/{}", id, owner, repo))?
            .json()
            .await
            .context("Failed to parse pull request response from GitHub")?;
        Ok(pr.into())
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestInfo>> {
        let url = self.url(&format!("/repos/{}/{}/pulls", owner, repo));
        let prs: Vec<GitHubPullRequest> = self.get_all_pages(&url, &[("state", "open")]).await?;
        Ok(prs.into_iter().map(PullRequestInfo::from).collect())
    }

    async fn list_pull_request_comments(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
    ) -> Result<Vec<CommentInfo>> {
        let url = self.url(&format!("/repos/{}/{}/issues/{}/comments", owner, repo, id));
        let comments: Vec<GitHubComment> = self.get_all_pages(&url, &[]).await?;
        Ok(comments
            .into_iter()
            .map(|c| CommentInfo {
                id: c.id,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn add_pull_request_comment(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
        body: &str,
    ) -> Result<()> {
        let url = self.url(&format!("/repos/{}/{}/issues/{}/comments", owner, repo, id));
        self.post(&url)
            .json(&NewComment { body })
            .send()
            .await
            .context("Failed to send comment to GitHub")?
            .error_for_status()
            .with_context(|| format!("GitHub rejected comment on pull request #{}", id))?;
        Ok(())
    }

    async fn get_latest_commit(&self, owner: &str, repo: &str, branch: &str) -> Result<String> {
        let url = self.url(&format!("/repos/{}/{}/branches/{}", owner, repo, branch));
        let branch_info: GitHubBranch = self
            .get(&url)
            .send()
            .await
            .context("Failed to send branch request to GitHub")?
            .error_for_status()
            .with_context(|| format!("Branch {} not found in {}/{}", branch, owner, repo))?
            .json()
            .await
            .context("Failed to parse branch response from GitHub")?;
        Ok(branch_info.commit.sha)
    }

    async fn set_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        let url = self.url(&format!("/repos/{}/{}/statuses/{}", owner, repo, sha));
        self.post(&url)
            .json(status)
            .send()
            .await
            .context("Failed to send commit status to GitHub")?
            .error_for_status()
            .with_context(|| format!("GitHub rejected commit status for {}", sha))?;
        Ok(())
    }

    fn clone_url(&self, owner: &str, repo: &str) -> String {
        format!(
            "{}/{}/{}.git",
            web_base_from_api(&self.api_endpoint),
            owner,
            repo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── has_github_token_prefix ──────────────────────────────────────

    #[test]
    fn test_personal_access_token_classic() {
        assert!(has_github_token_prefix("ghp_abc123def456"));
    }

    #[test]
    fn test_fine_grained_pat() {
        assert!(has_github_token_prefix("github_pat_abc123def456"));
    }

    #[test]
    fn test_server_to_server_token() {
        assert!(has_github_token_prefix("ghs_xyz789"));
    }

    #[test]
    fn test_empty_token_has_no_prefix() {
        assert!(!has_github_token_prefix(""));
    }

    #[test]
    fn test_legacy_hex_token_has_no_prefix() {
        assert!(!has_github_token_prefix(
            "0123456789abcdef0123456789abcdef01234567"
        ));
    }

    #[test]
    fn test_uppercase_prefix_is_not_recognised() {
        assert!(!has_github_token_prefix("GHP_abc123"));
    }

    // ── clone_url ────────────────────────────────────────────────────

    #[test]
    fn test_clone_url_public_github() {
        let client = GitHubClient::new(GITHUB_API_ENDPOINT, "ghp_x");
        assert_eq!(
            client.clone_url("jfrog", "frogbot"),
            "https://github.com/jfrog/frogbot.git"
        );
    }

    #[test]
    fn test_clone_url_enterprise() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", "ghp_x");
        assert_eq!(
            client.clone_url("team", "service"),
            "https://ghe.example.com/team/service.git"
        );
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = GitHubClient::new("https://api.github.com/", "ghp_x");
        assert_eq!(
            client.url("/repos/a/b"),
            "https://api.github.com/repos/a/b"
        );
    }

    // ── response deserialization ─────────────────────────────────────

    #[test]
    fn test_pull_request_deserialize_into_info() {
        let json = r#"{
            "number": 42,
            "title": "Bump lodash",
            "head": {"ref": "feature", "sha": "abc123", "repo": {"clone_url": "https://github.com/fork/repo.git"}},
            "base": {"ref": "main", "sha": "def456", "repo": {"clone_url": "https://github.com/owner/repo.git"}}
        }"#;
        let pr: GitHubPullRequest = serde_json::from_str(json).unwrap();
        let info: PullRequestInfo = pr.into();
        assert_eq!(info.id, 42);
        assert_eq!(info.source_branch, "feature");
        assert_eq!(info.target_branch, "main");
        assert_eq!(info.head_sha, "abc123");
        assert_eq!(
            info.source_clone_url.as_deref(),
            Some("https://github.com/fork/repo.git")
        );
    }

    #[test]
    fn test_pull_request_deleted_fork_has_no_clone_url() {
        let json = r#"{
            "number": 7,
            "title": "Old PR",
            "head": {"ref": "gone", "sha": "aaa", "repo": null},
            "base": {"ref": "main", "sha": "bbb", "repo": null}
        }"#;
        let pr: GitHubPullRequest = serde_json::from_str(json).unwrap();
        let info: PullRequestInfo = pr.into();
        assert!(info.source_clone_url.is_none());
    }

    #[test]
    fn test_comment_without_body_deserializes() {
        let json = r#"{"id": 1, "body": null, "created_at": "2024-01-02T03:04:05Z"}"#;
        let comment: GitHubComment = serde_json::from_str(json).unwrap();
        assert_eq!(comment.id, 1);
        assert!(comment.body.is_none());
    }
}
