//! Retry policy for transient platform responses.

use std::time::Duration;

use super::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Same attempts and statuses with no sleeping between them.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Send `request`, resending while the status is retryable and attempts remain.
    ///
    /// Returns the final response and the number of attempts made. Transport
    /// errors are returned immediately.
    pub fn send(
        &self,
        transport: &dyn HttpTransport,
        request: &HttpRequest,
    ) -> Result<(HttpResponse, u32)> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let response = transport.send(request)?;

            if !self.is_retryable(response.status) || attempt >= max_attempts {
                return Ok((response, attempt));
            }

            let delay = self.backoff(attempt);
            log_status!(
                "platform",
                "HTTP {} from {} (attempt {}/{}), retrying in {:?}",
                response.status,
                request.url,
                attempt,
                max_attempts,
                delay
            );
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::http::{CannedTransport, HttpMethod};

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "https://h/prs".to_string(),
            bearer_token: "t".to_string(),
            body: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn gateway_errors_are_retried_until_success() {
        let transport = CannedTransport::new();
        transport.on(HttpMethod::Get, "/prs", HttpResponse::new(502, ""));
        transport.on(HttpMethod::Get, "/prs", HttpResponse::new(200, "{}"));

        let (response, attempts) = RetryPolicy::immediate().send(&transport, &request()).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn attempts_are_bounded() {
        let transport = CannedTransport::new();
        transport.on(HttpMethod::Get, "/prs", HttpResponse::new(503, ""));

        let (response, attempts) = RetryPolicy::immediate().send(&transport, &request()).unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(attempts, 3);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn other_statuses_are_not_retried() {
        let transport = CannedTransport::new();
        transport.on(HttpMethod::Get, "/prs", HttpResponse::new(500, ""));
        transport.on(HttpMethod::Get, "/prs", HttpResponse::new(200, "{}"));

        let (response, attempts) = RetryPolicy::immediate().send(&transport, &request()).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(attempts, 1);
    }
}
