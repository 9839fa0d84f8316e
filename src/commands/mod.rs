//! Frogbot commands and the registry the CLI is built from.
//!
//! | Module                   | Commands                                        |
//! |--------------------------|-------------------------------------------------|
//! | `scan_pull_request`      | `scan-pull-request`                             |
//! | `scan_all_pull_requests` | `scan-all-pull-requests`                        |
//! | `scan_repository`        | `scan-repository`, `scan-multiple-repositories` |
//! | `comment`                | markdown rendering shared by the PR scans       |
//!
//! A command only reads the repositories it is given and talks to the VCS
//! through the client it is handed. Process-wide environment state belongs to
//! the executor; commands never modify it.

pub mod comment;
pub mod scan_all_pull_requests;
pub mod scan_pull_request;
pub mod scan_repository;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{RepoAggregator, Repository};
use crate::connectivity::AccessCheckResult;
use crate::scanner::{JfrogCliScanner, Scanner};
use crate::vcs::VcsClient;

pub use scan_all_pull_requests::ScanAllPullRequestsCmd;
pub use scan_pull_request::ScanPullRequestCmd;
pub use scan_repository::{ScanMultipleRepositoriesCmd, ScanRepositoryCmd};

pub const SCAN_PULL_REQUEST: &str = "scan-pull-request";
pub const SCAN_REPOSITORY: &str = "scan-repository";
pub const SCAN_ALL_PULL_REQUESTS: &str = "scan-all-pull-requests";
pub const SCAN_MULTIPLE_REPOSITORIES: &str = "scan-multiple-repositories";

/// A unit of work the executor runs once configuration and the environment
/// are in place.
#[async_trait]
pub trait FrogbotCommand: Send + Sync {
    async fn run(
        &self,
        repositories: &RepoAggregator,
        client: &dyn VcsClient,
        frogbot_repo_connection: &AccessCheckResult,
    ) -> Result<()>;
}

/// One entry of the command table.
pub struct Registration {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub build: fn() -> Box<dyn FrogbotCommand>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

fn cli_scanner() -> Arc<dyn Scanner> {
    Arc::new(JfrogCliScanner::from_env())
}

pub static REGISTRY: &[Registration] = &[
    Registration {
        name: SCAN_PULL_REQUEST,
        aliases: &["spr"],
        usage: "Scans a pull request with JFrog Xray for security vulnerabilities.",
        build: || Box::new(ScanPullRequestCmd::new(cli_scanner())),
    },
    Registration {
        name: SCAN_REPOSITORY,
        aliases: &["cfpr", "create-fix-pull-requests"],
        usage: "Scan the current branch and create pull requests with fixes if needed",
        build: || Box::new(ScanRepositoryCmd::new(cli_scanner())),
    },
    Registration {
        name: SCAN_ALL_PULL_REQUESTS,
        aliases: &["sprs", "scan-pull-requests"],
        usage: "Scans all the open pull requests within a single or multiple repositories with JFrog Xray for security vulnerabilities",
        build: || Box::new(ScanAllPullRequestsCmd::new(cli_scanner())),
    },
    Registration {
        name: SCAN_MULTIPLE_REPOSITORIES,
        aliases: &["scan-and-fix-repos", "safr"],
        usage: "Scan single or multiple repositories and create pull requests with fixes if any security vulnerabilities are found",
        build: || Box::new(ScanMultipleRepositoriesCmd::new(cli_scanner())),
    },
];

/// Find a command by canonical name or alias.
pub fn lookup(name: &str) -> Option<&'static Registration> {
    REGISTRY
        .iter()
        .find(|r| r.name == name || r.aliases.contains(&name))
}

/// One clap subcommand per registered command, aliases included.
pub fn clap_subcommands() -> Vec<clap::Command> {
    REGISTRY
        .iter()
        .map(|r| {
            clap::Command::new(r.name)
                .about(r.usage)
                .visible_aliases(r.aliases.iter().copied())
        })
        .collect()
}

/// Directory the scanner runs in for `repo` checked out at `root`.
pub(crate) fn scan_dir(root: &Path, repo: &Repository) -> PathBuf {
    if repo.scan.working_dir.as_os_str().is_empty() || repo.scan.working_dir == Path::new(".") {
        root.to_path_buf()
    } else {
        root.join(&repo.scan.working_dir)
    }
}
