//! Runtime details resolved before a command runs.
//!
//! `EnvDetailsResolver` reads the `JF_*` environment variables (after
//! `dotenvy` has loaded an optional `.env`) and, for
//! `scan-multiple-repositories`, the optional `frogbot-config.yml`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::commands::{SCAN_ALL_PULL_REQUESTS, SCAN_MULTIPLE_REPOSITORIES, SCAN_PULL_REQUEST};
use crate::errors::ConfigError;
use crate::frogbot_config::{DEFAULT_CONFIG_PATH, FrogbotConfigFile};
use crate::vcs::github::{GITHUB_API_ENDPOINT, has_github_token_prefix};
use crate::vcs::{GitHubClient, VcsClient};

pub const JF_URL: &str = "JF_URL";
pub const JF_ARTIFACTORY_URL: &str = "JF_ARTIFACTORY_URL";
pub const JF_XRAY_URL: &str = "JF_XRAY_URL";
pub const JF_ACCESS_TOKEN: &str = "JF_ACCESS_TOKEN";
pub const JF_USER: &str = "JF_USER";
pub const JF_PASSWORD: &str = "JF_PASSWORD";
pub const JF_GIT_PROVIDER: &str = "JF_GIT_PROVIDER";
pub const JF_GIT_OWNER: &str = "JF_GIT_OWNER";
pub const JF_GIT_REPO: &str = "JF_GIT_REPO";
pub const JF_GIT_TOKEN: &str = "JF_GIT_TOKEN";
pub const JF_GIT_API_ENDPOINT: &str = "JF_GIT_API_ENDPOINT";
pub const JF_GIT_BASE_BRANCH: &str = "JF_GIT_BASE_BRANCH";
pub const JF_GIT_PULL_REQUEST_ID: &str = "JF_GIT_PULL_REQUEST_ID";
pub const JF_FAIL: &str = "JF_FAIL";
pub const JF_INCLUDE_ALL_VULNERABILITIES: &str = "JF_INCLUDE_ALL_VULNERABILITIES";
pub const JF_WORKING_DIR: &str = "JF_WORKING_DIR";
pub const JF_RELEASES_REPO: &str = "JF_RELEASES_REPO";
pub const JF_FROGBOT_CONFIG: &str = "JF_FROGBOT_CONFIG";

/// Connection details of the JFrog platform.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetails {
    /// Platform URL, always ending with `/`; empty when only Xray/Artifactory URLs were given
    pub url: String,
    pub artifactory_url: String,
    pub xray_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ServerDetails {
    /// Base URL of the XSC service, derived from the platform URL.
    pub fn xsc_url(&self) -> Option<String> {
        if self.url.is_empty() {
            None
        } else {
            Some(format!("{}xsc/", self.url))
        }
    }
}

impl std::fmt::Debug for ServerDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDetails")
            .field("url", &self.url)
            .field("artifactory_url", &self.artifactory_url)
            .field("xray_url", &self.xray_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Supported VCS hosting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    #[default]
    GitHub,
}

impl std::str::FromStr for GitProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(GitProvider::GitHub),
            _ => Err(ConfigError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Git coordinates of one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct GitParams {
    pub provider: GitProvider,
    pub api_endpoint: String,
    pub owner: String,
    pub repo_name: String,
    pub token: String,
    pub branches: Vec<String>,
    pub pull_request_id: Option<u64>,
}

impl std::fmt::Debug for GitParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitParams")
            .field("provider", &self.provider)
            .field("api_endpoint", &self.api_endpoint)
            .field("owner", &self.owner)
            .field("repo_name", &self.repo_name)
            .field("token", &"***")
            .field("branches", &self.branches)
            .field("pull_request_id", &self.pull_request_id)
            .finish()
    }
}

/// How a repository is scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    /// Fail the command when vulnerabilities are found
    pub fail_on_security_issues: bool,
    /// Report every vulnerability, not only the ones a pull request introduces
    pub include_all_vulnerabilities: bool,
    /// Directory the scanner runs in, relative to the checkout root
    pub working_dir: PathBuf,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            fail_on_security_issues: true,
            include_all_vulnerabilities: false,
            working_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub git: GitParams,
    pub scan: ScanParams,
}

impl Repository {
    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.git.owner, self.git.repo_name)
    }
}

/// Ordered, read-only set of repositories a command operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoAggregator {
    repositories: Vec<Repository>,
}

impl RepoAggregator {
    pub fn new(repositories: Vec<Repository>) -> Self {
        Self { repositories }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Repository> {
        self.repositories.iter()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn first(&self) -> Option<&Repository> {
        self.repositories.first()
    }
}

impl<'a> IntoIterator for &'a RepoAggregator {
    type Item = &'a Repository;
    type IntoIter = std::slice::Iter<'a, Repository>;

    fn into_iter(self) -> Self::IntoIter {
        self.repositories.iter()
    }
}

/// Everything a command invocation needs from configuration.
pub struct FrogbotDetails {
    pub repositories: RepoAggregator,
    pub server_details: ServerDetails,
    pub git_client: Arc<dyn VcsClient>,
    /// Remote repository to download release artifacts through
    pub releases_repo: Option<String>,
}

impl std::fmt::Debug for FrogbotDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrogbotDetails")
            .field("repositories", &self.repositories)
            .field("server_details", &self.server_details)
            .field("releases_repo", &self.releases_repo)
            .finish_non_exhaustive()
    }
}

/// Resolves runtime details for a command.
#[async_trait]
pub trait DetailsResolver: Send + Sync {
    async fn resolve(&self, command_name: &str) -> Result<FrogbotDetails, ConfigError>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves details from `JF_*` environment variables.
pub struct EnvDetailsResolver {
    lookup: EnvLookup,
}

impl EnvDetailsResolver {
    /// Read from the process environment.
    pub fn from_process_env() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Read from a fixed set of variables instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self {
            lookup: Box::new(move |name| vars.get(name).cloned()),
        }
    }

    /// Trimmed value; empty counts as unset.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::MissingEnv { name })
    }

    fn get_bool(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::InvalidValue {
                name,
                message: format!("expected true or false, got '{}'", value),
            }),
        }
    }

    fn get_list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve_server(&self) -> Result<ServerDetails, ConfigError> {
        let url = self.get(JF_URL).map(|u| with_trailing_slash(&u));
        let artifactory_url = self
            .get(JF_ARTIFACTORY_URL)
            .map(|u| with_trailing_slash(&u))
            .or_else(|| url.as_ref().map(|u| format!("{}artifactory/", u)));
        let xray_url = self
            .get(JF_XRAY_URL)
            .map(|u| with_trailing_slash(&u))
            .or_else(|| url.as_ref().map(|u| format!("{}xray/", u)));

        let (Some(artifactory_url), Some(xray_url)) = (artifactory_url, xray_url) else {
            return Err(ConfigError::MissingEnv { name: JF_URL });
        };

        let access_token = self.get(JF_ACCESS_TOKEN);
        let user = self.get(JF_USER);
        let password = self.get(JF_PASSWORD);
        if access_token.is_none() && (user.is_none() || password.is_none()) {
            return Err(ConfigError::MissingEnv {
                name: JF_ACCESS_TOKEN,
            });
        }

        Ok(ServerDetails {
            url: url.unwrap_or_default(),
            artifactory_url,
            xray_url,
            access_token,
            user,
            password,
        })
    }

    fn resolve_scan_params(&self) -> Result<ScanParams, ConfigError> {
        Ok(ScanParams {
            fail_on_security_issues: self.get_bool(JF_FAIL, true)?,
            include_all_vulnerabilities: self.get_bool(JF_INCLUDE_ALL_VULNERABILITIES, false)?,
            working_dir: self
                .get(JF_WORKING_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    fn resolve_pull_request_id(&self, command_name: &str) -> Result<Option<u64>, ConfigError> {
        let Some(raw) = self.get(JF_GIT_PULL_REQUEST_ID) else {
            if command_name == SCAN_PULL_REQUEST {
                return Err(ConfigError::MissingEnv {
                    name: JF_GIT_PULL_REQUEST_ID,
                });
            }
            return Ok(None);
        };
        raw.parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: JF_GIT_PULL_REQUEST_ID,
                message: format!("expected a pull request number, got '{}'", raw),
            })
    }

    fn config_file_path(&self) -> PathBuf {
        self.get(JF_FROGBOT_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Commands that read a repository list or `frogbot-config.yml`.
    fn accepts_multiple_repositories(command_name: &str) -> bool {
        matches!(command_name, SCAN_MULTIPLE_REPOSITORIES | SCAN_ALL_PULL_REQUESTS)
    }

    fn resolve_repositories(&self, command_name: &str) -> Result<RepoAggregator, ConfigError> {
        let provider: GitProvider = self.require(JF_GIT_PROVIDER)?.parse()?;
        let owner = self.require(JF_GIT_OWNER)?;
        let token = self.require(JF_GIT_TOKEN)?;
        if !has_github_token_prefix(&token) {
            tracing::warn!("{} does not look like a GitHub token", JF_GIT_TOKEN);
        }
        let api_endpoint = self
            .get(JF_GIT_API_ENDPOINT)
            .unwrap_or_else(|| GITHUB_API_ENDPOINT.to_string());
        let branches = self.get_list(JF_GIT_BASE_BRANCH);
        let pull_request_id = self.resolve_pull_request_id(command_name)?;
        let scan = self.resolve_scan_params()?;

        let base_git = GitParams {
            provider,
            api_endpoint,
            owner,
            repo_name: String::new(),
            token,
            branches,
            pull_request_id,
        };

        let multiple = Self::accepts_multiple_repositories(command_name);
        let repositories: Vec<Repository> = if multiple {
            match FrogbotConfigFile::load_if_exists(&self.config_file_path())? {
                Some(file) => {
                    file.validate()?;
                    file.entries
                        .into_iter()
                        .map(|entry| {
                            let params = entry.params;
                            let mut git = base_git.clone();
                            git.repo_name = params.git.repo_name;
                            if !params.git.branches.is_empty() {
                                git.branches = params.git.branches;
                            }
                            let scan = ScanParams {
                                fail_on_security_issues: params
                                    .scan
                                    .fail_on_security_issues
                                    .unwrap_or(scan.fail_on_security_issues),
                                include_all_vulnerabilities: params
                                    .scan
                                    .include_all_vulnerabilities
                                    .unwrap_or(scan.include_all_vulnerabilities),
                                working_dir: params
                                    .scan
                                    .working_dir
                                    .unwrap_or_else(|| scan.working_dir.clone()),
                            };
                            Repository { git, scan }
                        })
                        .collect()
                }
                None => self.repositories_from_env(&base_git, &scan)?,
            }
        } else {
            self.repositories_from_env(&base_git, &scan)?
        };

        if repositories.is_empty() {
            return Err(ConfigError::NoRepositories {
                command: command_name.to_string(),
            });
        }
        if !multiple && repositories.len() > 1 {
            return Err(ConfigError::TooManyRepositories {
                command: command_name.to_string(),
                found: repositories.len(),
            });
        }
        Ok(RepoAggregator::new(repositories))
    }

    fn repositories_from_env(
        &self,
        base_git: &GitParams,
        scan: &ScanParams,
    ) -> Result<Vec<Repository>, ConfigError> {
        let names = self.get_list(JF_GIT_REPO);
        if names.is_empty() {
            return Err(ConfigError::MissingEnv { name: JF_GIT_REPO });
        }
        Ok(names
            .into_iter()
            .map(|name| {
                let mut git = base_git.clone();
                git.repo_name = name;
                Repository {
                    git,
                    scan: scan.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl DetailsResolver for EnvDetailsResolver {
    async fn resolve(&self, command_name: &str) -> Result<FrogbotDetails, ConfigError> {
        let server_details = self.resolve_server()?;
        let repositories = self.resolve_repositories(command_name)?;
        // Every repository shares the owner, endpoint and token.
        let git_client: Arc<dyn VcsClient> = match repositories.first() {
            Some(repo) => match repo.git.provider {
                GitProvider::GitHub => Arc::new(GitHubClient::new(
                    repo.git.api_endpoint.clone(),
                    repo.git.token.clone(),
                )),
            },
            None => {
                return Err(ConfigError::NoRepositories {
                    command: command_name.to_string(),
                });
            }
        };

        Ok(FrogbotDetails {
            repositories,
            server_details,
            git_client,
            releases_repo: self.get(JF_RELEASES_REPO),
        })
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
