//! Typed error hierarchy for the frogbot orchestrator.
//!
//! Three enums cover the three failure sources the orchestrator distinguishes:
//! - `ConfigError` — resolving runtime configuration and credentials
//! - `CleanupError` — restoring process-wide state after a command ran
//! - `ExecError` — what `Executor::execute` finally returns
//!
//! `JoinedError` is the aggregate that carries a command failure together
//! with every cleanup failure observed in the same invocation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from resolving the frogbot runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {name}")]
    MissingEnv { name: &'static str },

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },

    #[error("Unsupported git provider '{0}'. Supported providers: github")]
    UnsupportedProvider(String),

    #[error("Failed to read config file at {path}: {source}")]
    ConfigFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ConfigFileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No repositories configured for command {command}")]
    NoRepositories { command: String },

    #[error("Command {command} expects exactly one repository, found {found}")]
    TooManyRepositories { command: String, found: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from restoring state the orchestrator mutated for a command.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Failed to restore environment variable {name}: {reason}")]
    RestoreVar { name: String, reason: String },

    #[error("Failed to remove temporary home directory {path}: {source}")]
    RemoveTempDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cleanup action '{label}' failed: {source}")]
    Action {
        label: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The error returned by one orchestrated command invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Configuration could not be resolved; nothing was mutated.
    #[error("Failed to resolve configuration for command {command}: {source}")]
    Configuration {
        command: String,
        #[source]
        source: ConfigError,
    },

    /// The temporary server configuration could not be prepared.
    #[error("Failed to prepare the JFrog server configuration: {0}")]
    Setup(#[source] anyhow::Error),

    /// The command and/or the cleanup that followed it failed.
    #[error(transparent)]
    Run(#[from] JoinedError),
}

/// Several failures from a single invocation, none of them dropped.
///
/// Joining an empty aggregate, or joining with `None`, never loses a
/// non-empty member. `Display` writes every member on its own line, with its
/// cause chain.
#[derive(Debug, Default)]
pub struct JoinedError {
    errors: Vec<anyhow::Error>,
}

impl JoinedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<anyhow::Error>) {
        self.errors.push(err.into());
    }

    /// Append an optional error, returning `self` for chaining.
    pub fn join(mut self, err: Option<anyhow::Error>) -> Self {
        if let Some(err) = err {
            self.errors.push(err);
        }
        self
    }

    /// Move every member of `other` into `self`.
    pub fn extend(&mut self, other: JoinedError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate.
    pub fn into_result(self) -> Result<(), JoinedError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:#}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {}

impl FromIterator<anyhow::Error> for JoinedError {
    fn from_iter<I: IntoIterator<Item = anyhow::Error>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}
