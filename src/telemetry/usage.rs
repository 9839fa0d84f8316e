//! Usage reporting at command start.
//!
//! [`report_usage_on_command`] spawns the report and returns immediately.
//! The orchestrator awaits the returned [`UsageHandle`] before deciding on
//! error reporting, so the process cannot exit with a report in flight.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{FROGBOT_VERSION, PRODUCT_ID, TelemetryClient, UsageEvent, UsageFeature};
use crate::config::{RepoAggregator, ServerDetails};

pub const USAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait handle for an in-flight usage report.
///
/// A handle for a report that never started waits for nothing.
#[derive(Debug)]
#[must_use = "the usage report must be awaited with wait()"]
pub struct UsageHandle {
    task: Option<JoinHandle<()>>,
}

impl UsageHandle {
    /// A handle that completes immediately.
    pub fn noop() -> Self {
        Self { task: None }
    }

    pub fn is_noop(&self) -> bool {
        self.task.is_none()
    }

    /// Wait for the report to settle. Never fails.
    pub async fn wait(self) {
        if let Some(task) = self.task
            && let Err(e) = task.await
        {
            tracing::debug!(error = %e, "Usage report task did not complete");
        }
    }
}

/// Hex SHA-256 of the repository owner, so raw names never leave the host.
fn client_id(repositories: &RepoAggregator) -> Option<String> {
    let owner = &repositories.first()?.git.owner;
    let digest = Sha256::digest(owner.as_bytes());
    Some(format!("{:x}", digest))
}

/// Build the usage event for one command run.
pub fn usage_event(command_name: &str, repositories: &RepoAggregator) -> UsageEvent {
    let mut attributes = BTreeMap::new();
    attributes.insert("repositories".to_string(), repositories.len().to_string());
    UsageEvent {
        product_id: format!("{}/{}", PRODUCT_ID, FROGBOT_VERSION),
        features: vec![UsageFeature {
            feature_id: command_name.to_string(),
            client_id: client_id(repositories),
            attributes,
        }],
    }
}

/// Start reporting that `command_name` ran.
///
/// Returns a no-op handle when reporting is disabled or no Artifactory URL
/// is configured. Otherwise the report runs on its own task, bounded by
/// [`USAGE_TIMEOUT`].
pub fn report_usage_on_command(
    enabled: bool,
    client: Arc<dyn TelemetryClient>,
    command_name: &str,
    server: &ServerDetails,
    repositories: &RepoAggregator,
) -> UsageHandle {
    if !enabled {
        tracing::debug!("Usage reporting is disabled");
        return UsageHandle::noop();
    }
    if server.artifactory_url.is_empty() {
        tracing::debug!("No Artifactory URL configured; skipping usage report");
        return UsageHandle::noop();
    }

    let event = usage_event(command_name, repositories);
    let server = server.clone();
    let task = tokio::spawn(async move {
        match timeout(USAGE_TIMEOUT, client.send_usage(&server, &event)).await {
            Ok(Ok(())) => tracing::debug!("Usage report sent"),
            Ok(Err(e)) => tracing::debug!(error = %format!("{:#}", e), "Failed to send usage report"),
            Err(_) => tracing::debug!("Usage report timed out"),
        }
    });
    UsageHandle { task: Some(task) }
}
