//! Pull-request hosting platform client (Bitbucket Server or Cloud).

pub mod http;
pub mod retry;
mod variant;

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::DeployConfig;
use crate::error::{Error, MergeConflictDetails, PlatformApiErrorDetails, Result};
use crate::pull_request::{self, PullRequest};

pub use http::{CannedTransport, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use retry::RetryPolicy;
pub use variant::PlatformVariant;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PAGES: usize = 1000;

pub struct PlatformClient {
    variant: PlatformVariant,
    repo: String,
    token: String,
    timeout: Duration,
    retry: RetryPolicy,
    transport: Box<dyn HttpTransport>,
}

impl PlatformClient {
    pub fn new(
        variant: PlatformVariant,
        repo: impl Into<String>,
        token: impl Into<String>,
        transport: Box<dyn HttpTransport>,
    ) -> Self {
        Self {
            variant,
            repo: repo.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            transport,
        }
    }

    pub fn from_config(config: &DeployConfig, repo: &str) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::new(
            PlatformVariant::from_config(config),
            repo,
            config.bitbucket_api_token.clone(),
            Box::new(transport),
        )
        .with_timeout(Duration::from_secs(config.http_timeout_secs)))
    }

    /// Client for `--mock` runs: two open pull requests, merges always succeed.
    pub fn mock(config: &DeployConfig, repo: &str) -> Self {
        let variant = PlatformVariant::from_config(config);
        let transport = CannedTransport::new();
        transport.on(
            HttpMethod::Get,
            &variant.list_url(repo),
            HttpResponse::json(200, &mock_pull_request_page()),
        );
        transport.on(HttpMethod::Post, "/merge", HttpResponse::json(200, &json!({})));

        Self::new(variant, repo, config.bitbucket_api_token.clone(), Box::new(transport))
            .with_retry_policy(RetryPolicy::immediate())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn variant(&self) -> &PlatformVariant {
        &self.variant
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn clone_url(&self) -> String {
        self.variant.clone_url(&self.repo)
    }

    /// Every open pull request targeting the repository, across all pages.
    pub fn fetch_open_pull_requests(&self, timeout: Duration) -> Result<Vec<PullRequest>> {
        let first_url = self.variant.list_url(&self.repo);
        let mut url = first_url.clone();
        let mut prs = Vec::new();

        for _ in 0..MAX_PAGES {
            let (response, attempts) = self.send(HttpMethod::Get, &url, None, timeout)?;
            if !response.is_success() {
                return Err(Error::platform_api_error(PlatformApiErrorDetails {
                    method: HttpMethod::Get.as_str().to_string(),
                    url,
                    status: response.status,
                    body: response.body,
                    attempts,
                }));
            }

            let page = response.parse_json()?;
            if let Some(values) = page.get("values").and_then(Value::as_array) {
                for raw in values {
                    prs.push(self.variant.parse_pull_request(raw)?);
                }
            }

            match self.variant.next_page_url(&first_url, &page) {
                Some(next) if next != url => url = next,
                _ => return Ok(prs),
            }
        }

        log_status!("platform", "Stopped paging after {} pages", MAX_PAGES);
        Ok(prs)
    }

    pub fn qualify(&self, prs: &[PullRequest], threshold: u32) -> Vec<PullRequest> {
        pull_request::qualify(prs, threshold)
    }

    /// Ask the platform to merge one pull request into its target branch.
    pub fn merge_remote(&self, pr: &PullRequest) -> Result<()> {
        let url = self.variant.merge_url(&self.repo, pr)?;
        let body = match self.variant {
            PlatformVariant::Cloud { .. } => Some(json!({})),
            PlatformVariant::Server { .. } => None,
        };

        let (response, attempts) = self.send(HttpMethod::Post, &url, body, self.timeout)?;
        if self.variant.merge_succeeded(response.status) {
            log_status!("platform", "Merged PR #{} on {}", pr.id, self.variant.name());
            return Ok(());
        }

        let message = self.variant.error_message(response.status, &response.body);
        if self.variant.is_conflict(response.status, &message) {
            return Err(Error::platform_merge_conflict(MergeConflictDetails {
                pr_id: pr.id,
                version: pr.version,
                message,
            }));
        }

        Err(Error::platform_api_error(PlatformApiErrorDetails {
            method: HttpMethod::Post.as_str().to_string(),
            url,
            status: response.status,
            body: message,
            attempts,
        }))
    }

    /// Merge in ascending id order, stopping at the first failure.
    pub fn merge_all(&self, prs: &[PullRequest]) -> Result<Vec<u64>> {
        let mut ordered: Vec<&PullRequest> = prs.iter().collect();
        ordered.sort_by_key(|pr| pr.id);

        let mut merged = Vec::with_capacity(ordered.len());
        for pr in ordered {
            self.merge_remote(pr)?;
            merged.push(pr.id);
        }
        Ok(merged)
    }

    fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<(HttpResponse, u32)> {
        let request = HttpRequest {
            method,
            url: url.to_string(),
            bearer_token: self.token.clone(),
            body,
            timeout,
        };
        let (response, attempts) = self.retry.send(self.transport.as_ref(), &request)?;
        if matches!(response.status, 401 | 403) {
            return Err(Error::platform_auth_failed(response.status, url));
        }
        Ok((response, attempts))
    }
}

fn mock_pull_request_page() -> Value {
    json!({
        "isLastPage": true,
        "values": [
            {
                "id": 101,
                "title": "Mock feature",
                "version": 0,
                "fromRef": { "displayId": "feature/mock-feature" },
                "reviewers": [{ "approved": true }, { "approved": true }]
            },
            {
                "id": 102,
                "title": "Mock bugfix",
                "version": 0,
                "fromRef": { "displayId": "bugfix/mock-bugfix" },
                "reviewers": [{ "approved": true }]
            }
        ]
    })
}
