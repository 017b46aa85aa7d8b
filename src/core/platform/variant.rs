//! URL shapes and payload parsing for the two Bitbucket flavours.

use serde_json::Value;

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::pull_request::PullRequest;

const CLOUD_API_BASE: &str = "https://api.bitbucket.org/2.0/repositories";
const SERVER_SSH_PORT: u16 = 7999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformVariant {
    /// Self-hosted Bitbucket Server / Data Center.
    Server { host: String, project: String },
    /// bitbucket.org.
    Cloud { workspace: String },
}

impl PlatformVariant {
    pub fn from_config(config: &DeployConfig) -> Self {
        if config.is_bitbucket_server {
            PlatformVariant::Server {
                host: config.bitbucket_host.clone(),
                project: config.bitbucket_project_or_workspace.clone(),
            }
        } else {
            PlatformVariant::Cloud {
                workspace: config.bitbucket_project_or_workspace.clone(),
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlatformVariant::Server { .. } => "Bitbucket Server",
            PlatformVariant::Cloud { .. } => "Bitbucket Cloud",
        }
    }

    pub fn requires_version(&self) -> bool {
        matches!(self, PlatformVariant::Server { .. })
    }

    fn pull_requests_base(&self, repo: &str) -> String {
        match self {
            PlatformVariant::Server { host, project } => format!(
                "https://{}/rest/api/1.0/projects/{}/repos/{}/pull-requests",
                host, project, repo
            ),
            PlatformVariant::Cloud { workspace } => {
                format!("{}/{}/{}/pullrequests", CLOUD_API_BASE, workspace, repo)
            }
        }
    }

    /// First page of open pull requests.
    pub fn list_url(&self, repo: &str) -> String {
        let query = match self {
            PlatformVariant::Server { .. } => "state=OPEN&at=refs/heads/master",
            PlatformVariant::Cloud { .. } => "state=OPEN&fields=%2Bvalues.participants",
        };
        format!("{}?{}", self.pull_requests_base(repo), query)
    }

    /// URL of the page after `page`, if any.
    pub fn next_page_url(&self, first_url: &str, page: &Value) -> Option<String> {
        match self {
            PlatformVariant::Server { .. } => {
                if page.get("isLastPage").and_then(Value::as_bool).unwrap_or(true) {
                    return None;
                }
                let start = page.get("nextPageStart").and_then(Value::as_u64)?;
                Some(format!("{}&start={}", first_url, start))
            }
            PlatformVariant::Cloud { .. } => page
                .get("next")
                .and_then(Value::as_str)
                .filter(|next| !next.is_empty())
                .map(str::to_string),
        }
    }

    pub fn clone_url(&self, repo: &str) -> String {
        match self {
            PlatformVariant::Server { host, project } => format!(
                "ssh://git@{}:{}/{}/{}.git",
                host,
                SERVER_SSH_PORT,
                project.to_lowercase(),
                repo
            ),
            PlatformVariant::Cloud { workspace } => {
                format!("git@bitbucket.org:{}/{}.git", workspace, repo)
            }
        }
    }

    pub fn parse_pull_request(&self, raw: &Value) -> Result<PullRequest> {
        let id = raw.get("id").and_then(Value::as_u64).ok_or_else(|| {
            Error::internal_json(
                "pull request record has no numeric id",
                Some(format!("parse {} pull request", self.name())),
            )
        })?;
        let title = raw
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let (approvers, branch_pointer, version) = match self {
            PlatformVariant::Server { .. } => (
                "reviewers",
                "/fromRef/displayId",
                raw.get("version").and_then(Value::as_i64),
            ),
            PlatformVariant::Cloud { .. } => ("participants", "/source/branch/name", None),
        };

        let approval_count = raw
            .get(approvers)
            .and_then(Value::as_array)
            .map(|people| {
                people
                    .iter()
                    .filter(|p| p.get("approved").and_then(Value::as_bool).unwrap_or(false))
                    .count()
            })
            .unwrap_or(0);

        Ok(PullRequest {
            id,
            title,
            source_branch: raw
                .pointer(branch_pointer)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            approval_count: u32::try_from(approval_count).unwrap_or(u32::MAX),
            version,
            raw: raw.clone(),
        })
    }

    pub fn merge_url(&self, repo: &str, pr: &PullRequest) -> Result<String> {
        let base = format!("{}/{}/merge", self.pull_requests_base(repo), pr.id);
        if !self.requires_version() {
            return Ok(base);
        }
        let version = pr.version.ok_or_else(|| {
            Error::validation_invalid_argument(
                "version",
                format!("PR #{} has no version; Bitbucket Server requires it to merge", pr.id),
                None,
            )
        })?;
        Ok(format!("{}?version={}", base, version))
    }

    pub fn merge_succeeded(&self, status: u16) -> bool {
        match self {
            PlatformVariant::Server { .. } => status == 200,
            PlatformVariant::Cloud { .. } => status == 200 || status == 201,
        }
    }

    /// Human-readable failure reason from an error body.
    pub fn error_message(&self, status: u16, body: &str) -> String {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed.as_ref().and_then(|data| match self {
            PlatformVariant::Server { .. } => {
                let joined = data
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .map(|e| {
                                e.get("message")
                                    .and_then(Value::as_str)
                                    .map(str::to_string)
                                    .unwrap_or_else(|| e.to_string())
                            })
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|joined| !joined.is_empty());
                joined.or_else(|| {
                    data.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
            }
            PlatformVariant::Cloud { .. } => data
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string),
        });

        message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}: {}", status, body.trim()))
    }

    /// Stale-version rejection: the PR changed since it was read.
    pub fn is_conflict(&self, status: u16, message: &str) -> bool {
        match self {
            PlatformVariant::Server { .. } => {
                let lower = message.to_lowercase();
                status == 409
                    || lower.contains("out-of-date")
                    || lower.contains("out of date")
                    || lower.contains("version")
            }
            PlatformVariant::Cloud { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> PlatformVariant {
        PlatformVariant::Server {
            host: "bitbucket.example.com".to_string(),
            project: "DWH".to_string(),
        }
    }

    fn cloud() -> PlatformVariant {
        PlatformVariant::Cloud {
            workspace: "acme".to_string(),
        }
    }

    #[test]
    fn urls_per_variant() {
        assert_eq!(
            server().list_url("etl_core"),
            "https://bitbucket.example.com/rest/api/1.0/projects/DWH/repos/etl_core/pull-requests?state=OPEN&at=refs/heads/master"
        );
        assert_eq!(
            server().clone_url("etl_core"),
            "ssh://git@bitbucket.example.com:7999/dwh/etl_core.git"
        );
        assert_eq!(
            cloud().list_url("etl_core"),
            "https://api.bitbucket.org/2.0/repositories/acme/etl_core/pullrequests?state=OPEN&fields=%2Bvalues.participants"
        );
        assert_eq!(cloud().clone_url("etl_core"), "git@bitbucket.org:acme/etl_core.git");
    }

    #[test]
    fn server_record_counts_reviewer_approvals() {
        let raw = json!({
            "id": 42,
            "title": "Add loader",
            "version": 3,
            "fromRef": { "displayId": "feature/loader" },
            "reviewers": [{ "approved": true }, { "approved": false }, { "approved": true }]
        });
        let pr = server().parse_pull_request(&raw).unwrap();
        assert_eq!(pr.id, 42);
        assert_eq!(pr.approval_count, 2);
        assert_eq!(pr.source_branch, "feature/loader");
        assert_eq!(pr.version, Some(3));
    }

    #[test]
    fn cloud_record_counts_participant_approvals_and_has_no_version() {
        let raw = json!({
            "id": 5,
            "title": "Fix",
            "version": 9,
            "source": { "branch": { "name": "bugfix/x" } },
            "participants": [{ "approved": true }, { "role": "REVIEWER" }]
        });
        let pr = cloud().parse_pull_request(&raw).unwrap();
        assert_eq!(pr.approval_count, 1);
        assert_eq!(pr.source_branch, "bugfix/x");
        assert_eq!(pr.version, None);
    }

    #[test]
    fn record_without_id_is_rejected() {
        assert!(server().parse_pull_request(&json!({ "title": "x" })).is_err());
    }

    #[test]
    fn server_merge_url_carries_version_and_requires_it() {
        let raw = json!({ "id": 7, "version": 4, "fromRef": { "displayId": "f" } });
        let mut pr = server().parse_pull_request(&raw).unwrap();
        assert_eq!(
            server().merge_url("etl_core", &pr).unwrap(),
            "https://bitbucket.example.com/rest/api/1.0/projects/DWH/repos/etl_core/pull-requests/7/merge?version=4"
        );

        pr.version = None;
        assert!(server().merge_url("etl_core", &pr).is_err());
        assert_eq!(
            cloud().merge_url("etl_core", &pr).unwrap(),
            "https://api.bitbucket.org/2.0/repositories/acme/etl_core/pullrequests/7/merge"
        );
    }

    #[test]
    fn pagination_follows_each_variant() {
        let first = server().list_url("r");
        let page = json!({ "isLastPage": false, "nextPageStart": 25, "values": [] });
        assert_eq!(
            server().next_page_url(&first, &page),
            Some(format!("{}&start=25", first))
        );
        assert_eq!(server().next_page_url(&first, &json!({ "isLastPage": true })), None);

        let page = json!({ "next": "https://api.bitbucket.org/2.0/next?page=2", "values": [] });
        assert_eq!(
            cloud().next_page_url("ignored", &page).as_deref(),
            Some("https://api.bitbucket.org/2.0/next?page=2")
        );
        assert_eq!(cloud().next_page_url("ignored", &json!({ "values": [] })), None);
    }

    #[test]
    fn error_messages_and_conflicts() {
        let body = json!({ "errors": [{ "message": "You are attempting to modify a pull request based on out-of-date information." }] }).to_string();
        let message = server().error_message(409, &body);
        assert!(message.contains("out-of-date"));
        assert!(server().is_conflict(409, &message));
        assert!(server().is_conflict(400, &message));
        assert!(!server().is_conflict(400, "Merge checks failed"));

        let body = json!({ "error": { "message": "Branch is protected" } }).to_string();
        assert_eq!(cloud().error_message(400, &body), "Branch is protected");
        assert!(!cloud().is_conflict(409, "anything"));
        assert_eq!(cloud().error_message(500, "oops"), "HTTP 500: oops");
    }
}
