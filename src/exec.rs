//! Orchestrates one command invocation.
//!
//! The executor resolves configuration, prepares the JFrog environment the
//! `jf` CLI reads, starts usage reporting, runs the command, reports its
//! failure, and finally restores every piece of process state it touched.
//! Cleanup failures are joined with the command error, never dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::cleanup::CleanupStack;
use crate::commands::FrogbotCommand;
use crate::config::{DetailsResolver, EnvDetailsResolver};
use crate::connectivity::{ConnectivityChecker, FROGBOT_REPO_URL, HttpConnectivityChecker};
use crate::environment::{
    ENV_LOCK, JfrogHome, RELEASES_REPO_ENV, ScopedVar, releases_repo_value,
};
use crate::errors::{ExecError, JoinedError};
use crate::telemetry::{
    ERROR_REPORT_TIMEOUT, FROGBOT_VERSION, HttpTelemetryClient, TelemetryClient, report_error,
    report_usage_on_command, should_report_usage,
};

/// Runs commands against injected collaborators.
pub struct Executor {
    resolver: Arc<dyn DetailsResolver>,
    connectivity: Arc<dyn ConnectivityChecker>,
    telemetry: Arc<dyn TelemetryClient>,
    report_usage: bool,
    error_report_timeout: Duration,
}

impl Executor {
    /// Usage reporting starts enabled; see [`Executor::with_usage_reporting`].
    pub fn new(
        resolver: Arc<dyn DetailsResolver>,
        connectivity: Arc<dyn ConnectivityChecker>,
        telemetry: Arc<dyn TelemetryClient>,
    ) -> Self {
        Self {
            resolver,
            connectivity,
            telemetry,
            report_usage: true,
            error_report_timeout: ERROR_REPORT_TIMEOUT,
        }
    }

    /// Production collaborators, with reporting controlled by
    /// `JFROG_CLI_REPORT_USAGE`.
    pub fn from_env() -> Self {
        Self::new(
            Arc::new(EnvDetailsResolver::from_process_env()),
            Arc::new(HttpConnectivityChecker::new()),
            Arc::new(HttpTelemetryClient::new()),
        )
        .with_usage_reporting(should_report_usage())
    }

    pub fn with_usage_reporting(mut self, enabled: bool) -> Self {
        self.report_usage = enabled;
        self
    }

    /// Upper bound on submitting a command failure.
    pub fn with_error_report_timeout(mut self, limit: Duration) -> Self {
        self.error_report_timeout = limit;
        self
    }

    /// Run `command` registered as `command_name`.
    ///
    /// Configuration and setup failures return before the command runs.
    /// Once the environment is prepared, every cleanup action runs no matter
    /// how the command ends, and its failures are joined with the command's.
    /// Dropping the returned future mid-run still restores the environment.
    pub async fn execute(
        &self,
        command: &dyn FrogbotCommand,
        command_name: &str,
    ) -> Result<(), ExecError> {
        tracing::info!("Frogbot version: {}", FROGBOT_VERSION);

        let details = self
            .resolver
            .resolve(command_name)
            .await
            .map_err(|source| ExecError::Configuration {
                command: command_name.to_string(),
                source,
            })?;

        let connection = self.connectivity.check(FROGBOT_REPO_URL).await;

        let _env_guard = ENV_LOCK.lock().await;
        let home = JfrogHome::create(&details.server_details).map_err(ExecError::Setup)?;
        let mut cleanup = CleanupStack::new();
        home.register_teardown(&mut cleanup);

        if let Some(releases_repo) = &details.releases_repo {
            match ScopedVar::set(RELEASES_REPO_ENV, releases_repo_value(releases_repo)) {
                Ok(var) => {
                    cleanup.push(format!("restore {}", RELEASES_REPO_ENV), move || {
                        var.restore().map_err(Into::into)
                    });
                }
                Err(e) => {
                    let mut failures = JoinedError::new().join(Some(e));
                    failures.extend(cleanup.run_all());
                    return Err(ExecError::Run(failures));
                }
            }
        }

        let usage = report_usage_on_command(
            self.report_usage,
            self.telemetry.clone(),
            command_name,
            &details.server_details,
            &details.repositories,
        );

        tracing::info!("Running Frogbot {:?} command", command_name);
        // A panicking command must still reach error reporting and cleanup below.
        let outcome = AssertUnwindSafe(command.run(
            &details.repositories,
            details.git_client.as_ref(),
            &connection,
        ))
        .catch_unwind()
        .await;
        let command_error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(anyhow::anyhow!(
                "Frogbot {:?} command panicked: {}",
                command_name,
                panic_message(payload.as_ref())
            )),
        };

        usage.wait().await;

        match &command_error {
            Some(err) if self.report_usage => {
                report_error(
                    self.telemetry.as_ref(),
                    &details.server_details,
                    err,
                    self.error_report_timeout,
                )
                .await;
            }
            Some(_) => {}
            None => tracing::info!("Frogbot {:?} command finished successfully", command_name),
        }

        let mut failures = JoinedError::new().join(command_error);
        failures.extend(cleanup.run_all());
        failures.into_result().map_err(ExecError::Run)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `command` with collaborators built from the process environment.
pub async fn exec(command: &dyn FrogbotCommand, command_name: &str) -> Result<(), ExecError> {
    Executor::from_env().execute(command, command_name).await
}
