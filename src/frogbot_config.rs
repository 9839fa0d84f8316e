//! Optional multi-repository configuration file.
//!
//! `scan-multiple-repositories` reads `.frogbot/frogbot-config.yml` (or the
//! path in `JF_FROGBOT_CONFIG`) when it exists. Every entry names one
//! repository owned by `JF_GIT_OWNER`; scan settings fall back to the
//! environment values when an entry leaves them out.
//!
//! # Configuration File Format
//!
//! ```yaml
//! - params:
//!     git:
//!       repoName: storefront
//!       branches: ["main", "release"]
//!     scan:
//!       failOnSecurityIssues: false
//!       includeAllVulnerabilities: true
//!       workingDir: services/api
//! - params:
//!     git:
//!       repoName: billing
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = ".frogbot/frogbot-config.yml";

/// Git settings of one repository entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSection {
    pub repo_name: String,
    /// Branches to scan; empty means "use `JF_GIT_BASE_BRANCH`"
    #[serde(default)]
    pub branches: Vec<String>,
}

/// Scan settings of one repository entry. Unset fields inherit the
/// environment values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSection {
    #[serde(default)]
    pub fail_on_security_issues: Option<bool>,
    #[serde(default)]
    pub include_all_vulnerabilities: Option<bool>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryParams {
    pub git: GitSection,
    #[serde(default)]
    pub scan: ScanSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub params: EntryParams,
}

/// Parsed `frogbot-config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrogbotConfigFile {
    pub entries: Vec<ConfigEntry>,
}

impl FrogbotConfigFile {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigFileRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content).map_err(|source| ConfigError::ConfigFileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load the file if it exists, `None` otherwise.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, ConfigError> {
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.params.git.repo_name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "repoName",
                    message: format!("entry {} has an empty repository name", i + 1),
                });
            }
        }
        Ok(())
    }
}
