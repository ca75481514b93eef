//! Bounded retry with multiplicative backoff and jitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{HttpClient, HttpRequest, HttpResponse};
use crate::error::TransportError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Default multiplier applied to the delay after each retryable failure.
pub const DEFAULT_BACKOFF_BASE: f64 = 4.0;

/// Default upper bound of the random jitter added to the multiplier.
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.5;

/// How failed requests are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub backoff_base: f64,
    /// Upper bound of the random amount added to `backoff_base`.
    pub jitter: f64,
    /// HTTP statuses that are retried.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_initial_delay(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Creates the service policy with the given initial delay.
    ///
    /// Retries up to [`DEFAULT_MAX_RETRIES`] times on 500, 502, 503 and 504.
    pub fn with_initial_delay(initial_delay: Duration) -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay,
            backoff_base: DEFAULT_BACKOFF_BASE,
            jitter: DEFAULT_BACKOFF_JITTER,
            retry_statuses: vec![500, 502, 503, 504],
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns true if the status is retry-eligible.
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Maximum number of attempts, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff multiplier for a jitter sample in `0.0..1.0`.
    pub fn backoff_factor(&self, jitter_sample: f64) -> f64 {
        self.backoff_base + jitter_sample.clamp(0.0, 1.0) * self.jitter
    }

    /// Delay following `current` for the given jitter sample.
    pub fn next_delay(&self, current: Duration, jitter_sample: f64) -> Duration {
        current.mul_f64(self.backoff_factor(jitter_sample))
    }
}

/// Transport wrapper applying a [`RetryPolicy`].
///
/// Owns the lifetime of the underlying connection pool: [`close`](Self::close)
/// shuts the transport down and fails every later request.
pub struct RetryingClient {
    inner: Arc<dyn HttpClient>,
    policy: RetryPolicy,
    closed: AtomicBool,
}

impl RetryingClient {
    /// Wrap a transport.
    pub fn new(inner: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            closed: AtomicBool::new(false),
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Tear down the connection pool.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing connection pool");
            self.inner.shutdown();
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute a request, retrying retry-eligible statuses.
    ///
    /// Returns the response on any 2xx status, including an empty body.
    /// Non-retryable statuses fail immediately; retryable ones fail with
    /// [`TransportError::RetriesExhausted`] once the policy gives up.
    pub fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut delay = self.policy.initial_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.inner.execute(request)?;
            if response.is_success() {
                return Ok(response);
            }

            if !self.policy.is_retryable(response.status) {
                return Err(TransportError::Status {
                    url: request.url.clone(),
                    status: response.status,
                    body: response.body_excerpt(),
                });
            }

            if attempt >= self.policy.max_attempts() {
                return Err(TransportError::RetriesExhausted {
                    url: request.url.clone(),
                    status: response.status,
                    attempts: attempt,
                });
            }

            warn!(
                url = %request.url,
                status = response.status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                body = %response.body_excerpt(),
                "Retryable HTTP failure, retrying"
            );
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            delay = self.policy.next_delay(delay, rand::random::<f64>());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::tests::MockHttpClient;

    fn client(
        responses: Vec<Result<HttpResponse, TransportError>>,
    ) -> (Arc<MockHttpClient>, RetryingClient) {
        let mock = Arc::new(MockHttpClient::with_responses(responses));
        let retrying = RetryingClient::new(
            mock.clone(),
            RetryPolicy::with_initial_delay(Duration::ZERO),
        );
        (mock, retrying)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        for status in [500, 502, 503, 504] {
            assert!(policy.is_retryable(status));
        }
        assert!(!policy.is_retryable(501));
        assert!(!policy.is_retryable(404));
    }

    #[test]
    fn test_backoff_factor_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_factor(0.0), 4.0);
        assert_eq!(policy.backoff_factor(1.0), 4.5);
        let next = policy.next_delay(Duration::from_secs(1), 0.0);
        assert_eq!(next, Duration::from_secs(4));
    }

    #[test]
    fn test_success_first_try() {
        let (mock, c) = client(vec![Ok(HttpResponse::ok(None, "ok"))]);
        assert!(c.fetch(&HttpRequest::get("u")).is_ok());
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let (mock, c) = client(vec![
            Ok(HttpResponse::with_status(503, "busy")),
            Ok(HttpResponse::with_status(502, "bad gateway")),
            Ok(HttpResponse::ok(None, "ok")),
        ]);
        let resp = c.fetch(&HttpRequest::get("u")).unwrap();
        assert_eq!(resp.body.as_ref(), b"ok");
        assert_eq!(mock.request_count(), 3);
    }

    #[test]
    fn test_retries_exhausted_after_five_attempts() {
        let responses = (0..10)
            .map(|_| Ok(HttpResponse::with_status(500, "boom")))
            .collect();
        let (mock, c) = client(responses);
        let err = c.fetch(&HttpRequest::get("u")).unwrap_err();
        assert_eq!(
            err,
            TransportError::RetriesExhausted {
                url: "u".to_string(),
                status: 500,
                attempts: 5
            }
        );
        assert_eq!(mock.request_count(), 5);
    }

    #[test]
    fn test_non_retryable_status_fails_immediately() {
        let (mock, c) = client(vec![Ok(HttpResponse::with_status(404, "missing"))]);
        let err = c.fetch(&HttpRequest::get("u")).unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_empty_success_body_is_success() {
        let (_, c) = client(vec![Ok(HttpResponse::ok(None, Vec::new()))]);
        let resp = c.fetch(&HttpRequest::get("u")).unwrap();
        assert!(resp.body.is_empty());
    }

    #[test]
    fn test_network_error_is_not_retried() {
        let (mock, c) = client(vec![Err(TransportError::Network {
            url: "u".to_string(),
            reason: "refused".to_string(),
        })]);
        assert!(c.fetch(&HttpRequest::get("u")).is_err());
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_closed_client_rejects_requests() {
        let (mock, c) = client(vec![Ok(HttpResponse::ok(None, "ok"))]);
        c.close();
        assert!(c.is_closed());
        assert_eq!(
            c.fetch(&HttpRequest::get("u")).unwrap_err(),
            TransportError::Closed
        );
        assert_eq!(mock.request_count(), 0);
    }
}
