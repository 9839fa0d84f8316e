//! Security scanning collaborator.
//!
//! Vulnerability detection is delegated to the JFrog CLI (`jf audit`), which
//! reads its server configuration from `JFROG_CLI_HOME_DIR`. The commands
//! only see the [`Scanner`] trait.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

/// Environment variable overriding the JFrog CLI executable.
pub const JF_CLI_CMD_ENV: &str = "FROGBOT_JF_CMD";
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Position in severity order; `Unknown` ranks below `Low`.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Unknown => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "Critical"),
            Severity::High => write!(f, "High"),
            Severity::Medium => write!(f, "Medium"),
            Severity::Low => write!(f, "Low"),
            Severity::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cve {
    pub id: String,
}

/// One finding from `jf audit --format=simple-json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub severity: Severity,
    pub impacted_package_name: String,
    pub impacted_package_version: String,
    #[serde(default)]
    pub impacted_package_type: String,
    #[serde(default)]
    pub fixed_versions: Vec<String>,
    #[serde(default)]
    pub cves: Vec<Cve>,
    #[serde(default)]
    pub issue_id: String,
    #[serde(default)]
    pub summary: String,
}

impl Vulnerability {
    pub fn is_fixable(&self) -> bool {
        !self.fixed_versions.is_empty()
    }

    /// CVE ids joined with `, `, or the Xray issue id when there is none.
    pub fn display_id(&self) -> String {
        if self.cves.is_empty() {
            self.issue_id.clone()
        } else {
            self.cves
                .iter()
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResults {
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

impl ScanResults {
    pub fn is_empty(&self) -> bool {
        self.vulnerabilities.is_empty()
    }

    pub fn fixable_count(&self) -> usize {
        self.vulnerabilities.iter().filter(|v| v.is_fixable()).count()
    }

    /// Findings ordered from most to least severe.
    pub fn sorted_by_severity(&self) -> Vec<&Vulnerability> {
        let mut sorted: Vec<&Vulnerability> = self.vulnerabilities.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        sorted
    }

    /// Findings in `self` that `baseline` does not contain.
    pub fn new_since(&self, baseline: &ScanResults) -> ScanResults {
        let vulnerabilities = self
            .vulnerabilities
            .iter()
            .filter(|v| {
                !baseline.vulnerabilities.iter().any(|b| {
                    b.issue_id == v.issue_id
                        && b.impacted_package_name == v.impacted_package_name
                        && b.impacted_package_version == v.impacted_package_version
                })
            })
            .cloned()
            .collect();
        ScanResults { vulnerabilities }
    }
}

/// Slice out the outermost JSON object, skipping any log lines around it.
/// Braces inside JSON strings are ignored.
fn outermost_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `jf audit --format=simple-json` output.
pub fn parse_audit_output(output: &str) -> Result<ScanResults> {
    let json = outermost_json_object(output).context("Audit output contains no JSON object")?;
    serde_json::from_str(json).context("Failed to parse audit output")
}

/// Abstraction over vulnerability scanning for testability.
/// Real implementation: `JfrogCliScanner`.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn audit(&self, working_dir: &Path) -> Result<ScanResults>;
}

/// Runs `jf audit` as a subprocess.
pub struct JfrogCliScanner {
    jf_cmd: String,
    timeout: Duration,
}

impl JfrogCliScanner {
    pub fn new(jf_cmd: impl Into<String>) -> Self {
        Self {
            jf_cmd: jf_cmd.into(),
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    /// Use `FROGBOT_JF_CMD`, falling back to `jf` on the PATH.
    pub fn from_env() -> Self {
        let jf_cmd = std::env::var(JF_CLI_CMD_ENV).unwrap_or_else(|_| "jf".to_string());
        Self::new(jf_cmd)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Scanner for JfrogCliScanner {
    async fn audit(&self, working_dir: &Path) -> Result<ScanResults> {
        tracing::info!(dir = %working_dir.display(), "Running JFrog audit");

        let child = Command::new(&self.jf_cmd)
            .args(["audit", "--format=simple-json", "--fail=false"])
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.jf_cmd))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for audit command")?,
            Err(_) => anyhow::bail!("Audit timed out after {} seconds", self.timeout.as_secs()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Audit exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let results = parse_audit_output(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!(
            vulnerabilities = results.vulnerabilities.len(),
            fixable = results.fixable_count(),
            "Audit finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "vulnerabilities": [
            {
                "severity": "Medium",
                "impactedPackageName": "minimist",
                "impactedPackageVersion": "1.2.5",
                "impactedPackageType": "npm",
                "fixedVersions": [],
                "cves": [],
                "issueId": "XRAY-1"
            },
            {
                "severity": "Critical",
                "impactedPackageName": "lodash",
                "impactedPackageVersion": "4.17.0",
                "impactedPackageType": "npm",
                "fixedVersions": ["[4.17.21]"],
                "cves": [{"id": "CVE-2021-23337"}],
                "issueId": "XRAY-140575"
            }
        ],
        "securityViolations": null
    }"#;

    #[test]
    fn test_parse_audit_output() {
        let results = parse_audit_output(SAMPLE).unwrap();
        assert_eq!(results.vulnerabilities.len(), 2);
        assert_eq!(results.fixable_count(), 1);
        let sorted = results.sorted_by_severity();
        assert_eq!(sorted[0].impacted_package_name, "lodash");
        assert_eq!(sorted[0].display_id(), "CVE-2021-23337");
        assert_eq!(sorted[1].display_id(), "XRAY-1");
    }

    #[test]
    fn test_parse_audit_output_with_log_prefix() {
        let output = format!("[Info] Scanning...\n{}", SAMPLE);
        assert_eq!(parse_audit_output(&output).unwrap().vulnerabilities.len(), 2);
    }

    #[test]
    fn test_parse_audit_output_without_json() {
        assert!(parse_audit_output("[Error] no server configured").is_err());
    }

    #[test]
    fn test_outermost_json_object_ignores_braces_in_strings() {
        let text = r#"noise {"summary": "a } b \" {", "n": {"x": 1}} trailing"#;
        assert_eq!(
            outermost_json_object(text),
            Some(r#"{"summary": "a } b \" {", "n": {"x": 1}}"#)
        );
        assert_eq!(outermost_json_object(r#"{"open": 1"#), None);
    }

    #[test]
    fn test_unknown_severity_falls_back() {
        let json = r#"{"vulnerabilities":[{"severity":"Not Applicable","impactedPackageName":"a","impactedPackageVersion":"1"}]}"#;
        let results = parse_audit_output(json).unwrap();
        assert_eq!(results.vulnerabilities[0].severity, Severity::Unknown);
    }

    #[test]
    fn test_unknown_severity_sorts_last() {
        let json = r#"{"vulnerabilities":[
            {"severity":"Not Applicable","impactedPackageName":"a","impactedPackageVersion":"1"},
            {"severity":"Low","impactedPackageName":"b","impactedPackageVersion":"1"},
            {"severity":"Critical","impactedPackageName":"c","impactedPackageVersion":"1"}
        ]}"#;
        let results = parse_audit_output(json).unwrap();
        let order: Vec<&str> = results
            .sorted_by_severity()
            .iter()
            .map(|v| v.impacted_package_name.as_str())
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert!(Severity::Unknown < Severity::Low);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_new_since_baseline() {
        let current = parse_audit_output(SAMPLE).unwrap();
        let baseline = ScanResults {
            vulnerabilities: vec![current.vulnerabilities[0].clone()],
        };
        let introduced = current.new_since(&baseline);
        assert_eq!(introduced.vulnerabilities.len(), 1);
        assert_eq!(introduced.vulnerabilities[0].impacted_package_name, "lodash");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_scanner_reads_stdout() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-jf");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"vulnerabilities\":[{\"severity\":\"High\",\"impactedPackageName\":\"a\",\"impactedPackageVersion\":\"1\"}]}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scanner = JfrogCliScanner::new(script.to_str().unwrap());
        let results = scanner.audit(dir.path()).await.unwrap();
        assert_eq!(results.vulnerabilities.len(), 1);
        assert_eq!(results.vulnerabilities[0].severity, Severity::High);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_scanner_reports_failure_exit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-jf");
        std::fs::write(&script, "#!/bin/sh\necho 'server not configured' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scanner = JfrogCliScanner::new(script.to_str().unwrap());
        let err = scanner.audit(dir.path()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 3"));
        assert!(msg.contains("server not configured"));
    }

    #[tokio::test]
    async fn test_cli_scanner_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = JfrogCliScanner::new("/nonexistent/jf-binary");
        let err = scanner.audit(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
