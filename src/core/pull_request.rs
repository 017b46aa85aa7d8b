use serde::Serialize;
use serde_json::Value;

/// One open pull request, normalized across platform variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub source_branch: String,
    pub approval_count: u32,
    /// Optimistic-locking token; only the server variant has one and needs it to merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip)]
    pub raw: Value,
}

impl std::fmt::Display for PullRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PR #{}: {} ({})", self.id, self.title, self.source_branch)
    }
}

/// Keep pull requests with at least `threshold` approvals, in their original order.
pub fn qualify(prs: &[PullRequest], threshold: u32) -> Vec<PullRequest> {
    prs.iter()
        .filter(|pr| pr.approval_count >= threshold)
        .cloned()
        .collect()
}
