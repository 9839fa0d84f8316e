//! Reachability of the frogbot resources repository.
//!
//! Commands use the result to decide whether comments can embed images
//! hosted in the frogbot repository. A failed check never fails a command
//! on its own.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Base URL of the resources (banners, icons) referenced from comments.
pub const FROGBOT_REPO_URL: &str = "https://raw.githubusercontent.com/jfrog/frogbot/master/";

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one reachability check. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCheckResult {
    pub url: String,
    pub connected: bool,
    /// Why the check failed, when it did
    pub error: Option<String>,
}

impl AccessCheckResult {
    pub fn connected(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: true,
            error: None,
        }
    }

    pub fn unreachable(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: false,
            error: Some(error.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Abstraction over the reachability check for testability.
/// Real implementation: `HttpConnectivityChecker`.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn check(&self, url: &str) -> AccessCheckResult;
}

/// Checks reachability with a plain GET.
pub struct HttpConnectivityChecker {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpConnectivityChecker {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpConnectivityChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivityChecker for HttpConnectivityChecker {
    async fn check(&self, url: &str) -> AccessCheckResult {
        let result = self.http.get(url).timeout(self.timeout).send().await;
        let access = match result {
            Ok(resp) if resp.status().is_success() => AccessCheckResult::connected(url),
            Ok(resp) => AccessCheckResult::unreachable(url, format!("HTTP {}", resp.status())),
            Err(e) => AccessCheckResult::unreachable(url, e.to_string()),
        };
        if !access.connected {
            tracing::debug!(
                url = %url,
                error = access.error.as_deref().unwrap_or_default(),
                "Frogbot repository is not reachable; comments will use text banners"
            );
        }
        access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_result() {
        let result = AccessCheckResult::connected(FROGBOT_REPO_URL);
        assert!(result.is_connected());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_unreachable_result_keeps_diagnostic() {
        let result = AccessCheckResult::unreachable(FROGBOT_REPO_URL, "HTTP 404 Not Found");
        assert!(!result.is_connected());
        assert_eq!(result.error.as_deref(), Some("HTTP 404 Not Found"));
    }

    #[tokio::test]
    async fn test_http_checker_unroutable_url_is_unreachable() {
        let checker = HttpConnectivityChecker::new().with_timeout(Duration::from_millis(500));
        // Port 9 on localhost is the discard port; nothing listens there in CI.
        let result = checker.check("http://127.0.0.1:9/").await;
        assert!(!result.connected);
        assert!(result.error.is_some());
    }
}
