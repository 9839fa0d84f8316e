//! Markdown comments posted on scanned pull requests.
//!
//! Every comment starts with [`FROGBOT_COMMENT_MARKER`], which is how
//! `scan-all-pull-requests` recognises pull requests it already handled.

use crate::connectivity::{AccessCheckResult, FROGBOT_REPO_URL};
use crate::scanner::ScanResults;
use crate::vcs::CommentInfo;

/// Hidden first line of every frogbot comment.
pub const FROGBOT_COMMENT_MARKER: &str = "<!-- frogbot-comment -->";

/// A comment with exactly this body asks frogbot to scan the pull request again.
pub const RESCAN_KEYWORD: &str = "rescan";

const NO_VULNERABILITIES_BANNER: &str = "resources/v2/noVulnerabilityBannerPR.png";
const VULNERABILITIES_BANNER: &str = "resources/v2/vulnerabilitiesBannerPR.png";

fn banner(results: &ScanResults, connection: &AccessCheckResult) -> String {
    match (results.is_empty(), connection.is_connected()) {
        (true, true) => format!(
            "[![👍 Frogbot scanned this pull request and found no new vulnerabilities]({}{})](https://docs.jfrog-applications.jfrog.io/jfrog-applications/frogbot)",
            FROGBOT_REPO_URL, NO_VULNERABILITIES_BANNER
        ),
        (false, true) => format!(
            "[![🚨 Frogbot scanned this pull request and found the issues below]({}{})](https://docs.jfrog-applications.jfrog.io/jfrog-applications/frogbot)",
            FROGBOT_REPO_URL, VULNERABILITIES_BANNER
        ),
        (true, false) => {
            "**👍 Frogbot scanned this pull request and found no new vulnerabilities.**".to_string()
        }
        (false, false) => {
            "**🚨 Frogbot scanned this pull request and found the issues below:**".to_string()
        }
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render the pull request comment for `results`.
///
/// Image banners are only used when the frogbot repository hosting them is
/// reachable; otherwise a bold text line takes their place.
pub fn render_pull_request_comment(
    results: &ScanResults,
    connection: &AccessCheckResult,
) -> String {
    let mut body = String::new();
    body.push_str(FROGBOT_COMMENT_MARKER);
    body.push('\n');
    body.push_str(&banner(results, connection));
    body.push_str("\n\n");

    if results.is_empty() {
        return body;
    }

    body.push_str("| Severity | Impacted Package | Version | Fixed Versions | CVE |\n");
    body.push_str("|:--------:|:----------------:|:-------:|:--------------:|:---:|\n");
    for vuln in results.sorted_by_severity() {
        let fixed = if vuln.is_fixable() {
            vuln.fixed_versions.join(", ")
        } else {
            "-".to_string()
        };
        body.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            vuln.severity,
            escape_cell(&vuln.impacted_package_name),
            escape_cell(&vuln.impacted_package_version),
            escape_cell(&fixed),
            escape_cell(&vuln.display_id()),
        ));
    }
    body
}

pub fn is_frogbot_comment(body: &str) -> bool {
    body.trim_start().starts_with(FROGBOT_COMMENT_MARKER)
}

/// Whether a pull request still needs a scan given its comment history.
///
/// Scan when there are no comments, when the latest comment is not ours, or
/// when someone asked for a rescan after our last comment.
pub fn needs_scan(comments: &[CommentInfo]) -> bool {
    let Some(latest) = comments.iter().max_by_key(|c| c.created_at) else {
        return true;
    };
    if latest.body.trim().eq_ignore_ascii_case(RESCAN_KEYWORD) {
        return true;
    }
    !is_frogbot_comment(&latest.body)
}
