//! Best-effort telemetry: usage events and error reports.
//!
//! Neither subsystem may fail or block a command. Failures are logged at
//! `debug` and dropped.
//!
//! | Module         | Contents                                        |
//! |----------------|-------------------------------------------------|
//! | `usage`        | fire-and-forget usage event + `UsageHandle`     |
//! | `error_report` | error submission after a failed command         |

pub mod error_report;
pub mod usage;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::{ServerDetails, parse_bool};

pub use error_report::{ERROR_REPORT_TIMEOUT, report_error};
pub use usage::{UsageHandle, report_usage_on_command};

/// Environment variable that turns usage and error reporting off.
pub const REPORT_USAGE_ENV: &str = "JFROG_CLI_REPORT_USAGE";
pub const PRODUCT_ID: &str = "frogbot";
pub const FROGBOT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether usage (and error) reporting is enabled. Defaults to `true`;
/// an unparseable value also counts as `true`.
pub fn should_report_usage() -> bool {
    usage_enabled_from(std::env::var(REPORT_USAGE_ENV).ok().as_deref())
}

fn usage_enabled_from(value: Option<&str>) -> bool {
    value.and_then(parse_bool).unwrap_or(true)
}

/// One feature entry of an Artifactory usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageFeature {
    pub feature_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub attributes: std::collections::BTreeMap<String, String>,
}

/// Body of `POST api/system/usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub product_id: String,
    pub features: Vec<UsageFeature>,
}

/// Body of `POST xsc/api/v1/event/logMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub log_level: &'static str,
    pub source: String,
    pub message: String,
    pub product_version: &'static str,
}

/// Abstraction over the telemetry endpoints for testability.
/// Real implementation: `HttpTelemetryClient`.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    async fn send_usage(&self, server: &ServerDetails, event: &UsageEvent) -> Result<()>;

    async fn send_error(&self, server: &ServerDetails, report: &ErrorReport) -> Result<()>;
}

/// Per-request limit of the telemetry HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts telemetry to the JFrog platform.
pub struct HttpTelemetryClient {
    http: reqwest::Client,
}

impl HttpTelemetryClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Falling back to default telemetry HTTP client");
                reqwest::Client::new()
            });
        Self { http }
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        server: &ServerDetails,
    ) -> reqwest::RequestBuilder {
        match (&server.access_token, &server.user) {
            (Some(token), _) => builder.bearer_auth(token),
            (None, Some(user)) => builder.basic_auth(user, server.password.as_deref()),
            (None, None) => builder,
        }
    }
}

impl Default for HttpTelemetryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryClient for HttpTelemetryClient {
    async fn send_usage(&self, server: &ServerDetails, event: &UsageEvent) -> Result<()> {
        let url = format!("{}api/system/usage", server.artifactory_url);
        self.authorized(self.http.post(&url), server)
            .json(event)
            .send()
            .await
            .context("Failed to send usage report")?
            .error_for_status()
            .context("Usage endpoint returned error status")?;
        Ok(())
    }

    async fn send_error(&self, server: &ServerDetails, report: &ErrorReport) -> Result<()> {
        let base = server
            .xsc_url()
            .context("No platform URL configured; cannot reach XSC")?;
        let url = format!("{}api/v1/event/logMessage", base);
        self.authorized(self.http.post(&url), server)
            .json(report)
            .send()
            .await
            .context("Failed to send error report")?
            .error_for_status()
            .context("XSC log endpoint returned error status")?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_enabled_by_default() {
        assert!(usage_enabled_from(None));
    }

    #[test]
    fn test_usage_disabled_explicitly() {
        assert!(!usage_enabled_from(Some("false")));
        assert!(!usage_enabled_from(Some("FALSE")));
        assert!(!usage_enabled_from(Some("0")));
    }

    #[test]
    fn test_usage_invalid_value_keeps_default() {
        assert!(usage_enabled_from(Some("maybe")));
    }

    #[test]
    fn test_usage_event_serializes_camel_case() {
        let event = UsageEvent {
            product_id: "frogbot/2.0.0".to_string(),
            features: vec![UsageFeature {
                feature_id: "scan-pull-request".to_string(),
                client_id: None,
                attributes: Default::default(),
            }],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["productId"], "frogbot/2.0.0");
        assert_eq!(value["features"][0]["featureId"], "scan-pull-request");
        assert!(value["features"][0].get("clientId").is_none());
    }

    #[tokio::test]
    async fn test_send_error_without_platform_url_fails() {
        let client = HttpTelemetryClient::new();
        let report = ErrorReport {
            log_level: "error",
            source: PRODUCT_ID.to_string(),
            message: "boom".to_string(),
            product_version: FROGBOT_VERSION,
        };
        let err = client
            .send_error(&ServerDetails::default(), &report)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No platform URL"));
    }
}
