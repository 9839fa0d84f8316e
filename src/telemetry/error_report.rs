//! Error submission after a failed command.

use std::time::Duration;

use tokio::time::timeout;

use super::{ErrorReport, FROGBOT_VERSION, PRODUCT_ID, TelemetryClient};
use crate::config::ServerDetails;

/// Build the report for a command failure. The full context chain is kept.
pub fn error_report(error: &anyhow::Error) -> ErrorReport {
    ErrorReport {
        log_level: "error",
        source: PRODUCT_ID.to_string(),
        message: format!("{:#}", error),
        product_version: FROGBOT_VERSION,
    }
}

pub const ERROR_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Submit `error` to the platform, giving up after `limit`. Never fails; a
/// failed or timed-out submission is logged at `debug`.
pub async fn report_error(
    client: &dyn TelemetryClient,
    server: &ServerDetails,
    error: &anyhow::Error,
    limit: Duration,
) {
    let report = error_report(error);
    match timeout(limit, client.send_error(server, &report)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(error = %format!("{:#}", e), "Failed to report command error");
        }
        Err(_) => tracing::debug!(?limit, "Error report timed out"),
    }
}
