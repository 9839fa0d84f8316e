//! Process-wide environment state owned by the orchestrator.
//!
//! The `jf` CLI and other collaborators read `JFROG_CLI_HOME_DIR` and
//! `JFROG_CLI_RELEASES_REPO` straight from the process environment, so these
//! stay real environment variables. Every mutation happens while
//! [`ENV_LOCK`] is held, and every mutation records the previous value
//! (`None` for unset) so it can be put back exactly.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::TempDir;

use crate::cleanup::CleanupStack;
use crate::config::ServerDetails;
use crate::errors::CleanupError;

pub const JFROG_HOME_DIR_ENV: &str = "JFROG_CLI_HOME_DIR";
pub const RELEASES_REPO_ENV: &str = "JFROG_CLI_RELEASES_REPO";

/// Namespace prefixed to the configured releases repository.
pub const RELEASES_REPO_NAMESPACE: &str = "frogbot";

pub const SERVER_CONFIG_FILE: &str = "jfrog-cli.conf.v6";
const SERVER_CONFIG_VERSION: &str = "6";
const SERVER_ID: &str = "frogbot";

/// Serialises every mutation of the variables above.
///
/// Held by the orchestrator from the moment it redirects the home directory
/// until every restoration has run.
pub static ENV_LOCK: LazyLock<tokio::sync::Mutex<()>> =
    LazyLock::new(|| tokio::sync::Mutex::new(()));

/// Value the releases-repository variable is set to.
pub fn releases_repo_value(releases_repo: &str) -> String {
    format!("{}/{}", RELEASES_REPO_NAMESPACE, releases_repo)
}

fn validate_var(name: &str, value: &OsStr) -> std::result::Result<(), String> {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(format!("invalid variable name '{}'", name));
    }
    if value.to_string_lossy().contains('\0') {
        return Err("value contains a NUL byte".to_string());
    }
    Ok(())
}

/// Set or remove a variable. Caller must hold [`ENV_LOCK`].
fn write_var(name: &str, value: Option<&OsStr>) -> std::result::Result<(), String> {
    match value {
        Some(value) => {
            validate_var(name, value)?;
            // SAFETY: all writers go through this module while holding ENV_LOCK.
            unsafe { std::env::set_var(name, value) };
        }
        None => {
            validate_var(name, OsStr::new(""))?;
            // SAFETY: see above.
            unsafe { std::env::remove_var(name) };
        }
    }
    Ok(())
}

/// An environment variable overridden until [`ScopedVar::restore`] runs.
#[derive(Debug)]
#[must_use = "the previous value is lost unless restore() is called"]
pub struct ScopedVar {
    name: String,
    previous: Option<OsString>,
}

impl ScopedVar {
    /// Record the current value of `name`, then set it to `value`.
    pub fn set(name: &str, value: impl AsRef<OsStr>) -> Result<Self> {
        let previous = std::env::var_os(name);
        write_var(name, Some(value.as_ref()))
            .map_err(|reason| anyhow::anyhow!("Failed to set {}: {}", name, reason))?;
        Ok(Self {
            name: name.to_string(),
            previous,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value before [`ScopedVar::set`]; `None` when it was unset.
    pub fn previous(&self) -> Option<&OsStr> {
        self.previous.as_deref()
    }

    /// Put the previous value back, removing the variable if it was unset.
    pub fn restore(self) -> std::result::Result<(), CleanupError> {
        write_var(&self.name, self.previous.as_deref()).map_err(|reason| {
            CleanupError::RestoreVar {
                name: self.name.clone(),
                reason,
            }
        })
    }
}

/// One server entry of the JFrog CLI configuration file.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CliServerEntry<'a> {
    server_id: &'static str,
    url: &'a str,
    artifactory_url: &'a str,
    xray_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    is_default: bool,
}

#[derive(Debug, Serialize)]
struct CliConfigFile<'a> {
    servers: Vec<CliServerEntry<'a>>,
    version: &'static str,
}

/// Render the JFrog CLI configuration holding `server` as the default server.
pub fn render_server_config(server: &ServerDetails) -> Result<String> {
    let file = CliConfigFile {
        servers: vec![CliServerEntry {
            server_id: SERVER_ID,
            url: &server.url,
            artifactory_url: &server.artifactory_url,
            xray_url: &server.xray_url,
            access_token: server.access_token.as_deref(),
            user: server.user.as_deref(),
            password: server.password.as_deref(),
            is_default: true,
        }],
        version: SERVER_CONFIG_VERSION,
    };
    serde_json::to_string_pretty(&file).context("Failed to serialize JFrog CLI configuration")
}

/// A temporary JFrog home directory the home variable points at.
///
/// Created by [`JfrogHome::create`] and consumed by
/// [`JfrogHome::register_teardown`]; once the cleanup stack has run, the
/// directory is gone and the variable holds its original value again.
#[derive(Debug)]
#[must_use = "the temporary home is only removed through register_teardown()"]
pub struct JfrogHome {
    home_var: ScopedVar,
    dir: TempDir,
}

impl JfrogHome {
    /// Write the server configuration to a fresh temporary directory and
    /// point the home variable at it. Caller must hold [`ENV_LOCK`].
    pub fn create(server: &ServerDetails) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("frogbot-jfrog-home-")
            .tempdir()
            .context("Failed to create temporary JFrog home directory")?;
        let config_path = dir.path().join(SERVER_CONFIG_FILE);
        std::fs::write(&config_path, render_server_config(server)?).with_context(|| {
            format!(
                "Failed to write server configuration at {}",
                config_path.display()
            )
        })?;
        set_owner_only_permissions(&config_path)?;

        // If this fails, `dir` is dropped and removed; nothing else changed.
        let home_var = ScopedVar::set(JFROG_HOME_DIR_ENV, dir.path())?;
        tracing::debug!(home = %dir.path().display(), "Redirected JFrog home directory");

        Ok(Self { home_var, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Home variable value before [`JfrogHome::create`].
    pub fn original_home(&self) -> Option<&OsStr> {
        self.home_var.previous()
    }

    /// Register restoring the home variable, then removing the directory.
    ///
    /// Both run even when the other fails, and both outcomes are reported
    /// by [`CleanupStack::run_all`].
    pub fn register_teardown(self, cleanup: &mut CleanupStack) {
        let Self { home_var, dir } = self;
        let path: PathBuf = dir.path().to_path_buf();
        // Registered first so it runs after the variable is restored.
        cleanup.push("remove temporary JFrog home", move || {
            dir.close()
                .map_err(|source| CleanupError::RemoveTempDir { path, source }.into())
        });
        cleanup.push(format!("restore {}", JFROG_HOME_DIR_ENV), move || {
            home_var.restore().map_err(Into::into)
        });
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerDetails {
        ServerDetails {
            url: "https://acme.jfrog.io/".into(),
            artifactory_url: "https://acme.jfrog.io/artifactory/".into(),
            xray_url: "https://acme.jfrog.io/xray/".into(),
            access_token: Some("jfrog-token".into()),
            user: None,
            password: None,
        }
    }

    #[test]
    fn test_releases_repo_value() {
        assert_eq!(releases_repo_value("releases-X"), "frogbot/releases-X");
    }

    #[test]
    fn test_render_server_config() {
        let rendered = render_server_config(&server()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["version"], "6");
        let entry = &value["servers"][0];
        assert_eq!(entry["serverId"], "frogbot");
        assert_eq!(entry["xrayUrl"], "https://acme.jfrog.io/xray/");
        assert_eq!(entry["accessToken"], "jfrog-token");
        assert_eq!(entry["isDefault"], true);
        assert!(entry.get("password").is_none());
    }

    #[tokio::test]
    async fn test_scoped_var_restores_unset() {
        let _lock = ENV_LOCK.lock().await;
        let name = "FROGBOT_TEST_SCOPED_UNSET";
        unsafe { std::env::remove_var(name) };

        let scoped = ScopedVar::set(name, "value").unwrap();
        assert_eq!(std::env::var(name).unwrap(), "value");
        assert!(scoped.previous().is_none());

        scoped.restore().unwrap();
        assert!(std::env::var_os(name).is_none());
    }

    #[tokio::test]
    async fn test_scoped_var_restores_empty_string() {
        let _lock = ENV_LOCK.lock().await;
        let name = "FROGBOT_TEST_SCOPED_EMPTY";
        unsafe { std::env::set_var(name, "") };

        let scoped = ScopedVar::set(name, "value").unwrap();
        scoped.restore().unwrap();
        assert_eq!(std::env::var_os(name), Some(OsString::new()));

        unsafe { std::env::remove_var(name) };
    }

    #[tokio::test]
    async fn test_scoped_var_rejects_invalid_name() {
        let _lock = ENV_LOCK.lock().await;
        let err = ScopedVar::set("BAD=NAME", "value").unwrap_err();
        assert!(err.to_string().contains("invalid variable name"));
    }

    #[tokio::test]
    async fn test_jfrog_home_lifecycle() {
        let _lock = ENV_LOCK.lock().await;
        let original = std::env::var_os(JFROG_HOME_DIR_ENV);

        let home = JfrogHome::create(&server()).unwrap();
        let path = home.path().to_path_buf();
        assert!(path.join(SERVER_CONFIG_FILE).exists());
        assert_eq!(
            std::env::var_os(JFROG_HOME_DIR_ENV).as_deref(),
            Some(path.as_os_str())
        );
        assert_eq!(home.original_home(), original.as_deref());

        let mut cleanup = CleanupStack::new();
        home.register_teardown(&mut cleanup);
        assert_eq!(cleanup.len(), 2);
        assert!(cleanup.run_all().is_empty());
        assert!(!path.exists());
        assert_eq!(std::env::var_os(JFROG_HOME_DIR_ENV), original);
    }

    #[tokio::test]
    async fn test_jfrog_home_teardown_reports_missing_directory() {
        let _lock = ENV_LOCK.lock().await;
        let original = std::env::var_os(JFROG_HOME_DIR_ENV);

        let home = JfrogHome::create(&server()).unwrap();
        std::fs::remove_dir_all(home.path()).unwrap();

        let mut cleanup = CleanupStack::new();
        home.register_teardown(&mut cleanup);
        let failures = cleanup.run_all();
        assert_eq!(failures.len(), 1);
        let err = failures.iter().next().unwrap();
        assert!(matches!(
            err.downcast_ref::<CleanupError>(),
            Some(CleanupError::RemoveTempDir { .. })
        ));
        // The variable is restored even though removal failed.
        assert_eq!(std::env::var_os(JFROG_HOME_DIR_ENV), original);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let _lock = ENV_LOCK.lock().await;

        let home = JfrogHome::create(&server()).unwrap();
        let mode = std::fs::metadata(home.path().join(SERVER_CONFIG_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let mut cleanup = CleanupStack::new();
        home.register_teardown(&mut cleanup);
        assert!(cleanup.run_all().is_empty());
    }
}
