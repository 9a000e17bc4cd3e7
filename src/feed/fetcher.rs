use crate::util::{UrlPolicy, UrlValidationError};
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

/// Errors from one fetch-and-parse cycle of a single source.
///
/// All of these are transient from the aggregator's point of view: the
/// worker logs them and retries on its next cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was shorter than its Content-Length
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Source URL rejected by the URL policy
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
}

/// Limits applied to every feed request.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum accepted body size in bytes
    pub max_bytes: usize,
    /// Retries for 429, 5xx and truncated bodies within one fetch
    pub max_retries: u32,
    /// First retry delay; doubles on each further retry
    pub retry_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 10 * 1024 * 1024,
            max_retries: 3,
            retry_base: Duration::from_secs(2),
        }
    }
}

impl FetchError {
    /// Maps reqwest's own timeouts onto [`FetchError::Timeout`].
    pub(crate) fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    }
}

/// Maximum redirect hops followed per request.
const MAX_REDIRECTS: usize = 3;

/// Why a redirect was not followed.
#[derive(Debug, Error)]
pub enum RedirectRefused {
    #[error("too many redirects (max {MAX_REDIRECTS})")]
    TooMany,
    #[error("redirect loop detected")]
    Loop,
    #[error("redirect target rejected: {0}")]
    Target(#[from] UrlValidationError),
}

/// Redirect policy for feed requests: at most [`MAX_REDIRECTS`] hops, no
/// loops, and every hop must pass `url_policy`.
pub(crate) fn redirect_policy(url_policy: UrlPolicy) -> Policy {
    Policy::custom(move |attempt| {
        let verdict = check_redirect(url_policy, attempt.url(), attempt.previous());
        match verdict {
            Ok(()) => attempt.follow(),
            Err(refused) => attempt.error(refused),
        }
    })
}

fn check_redirect(
    url_policy: UrlPolicy,
    next: &url::Url,
    previous: &[url::Url],
) -> Result<(), RedirectRefused> {
    if previous.len() >= MAX_REDIRECTS {
        return Err(RedirectRefused::TooMany);
    }
    if previous.iter().any(|prev| prev == next) {
        return Err(RedirectRefused::Loop);
    }
    url_policy.validate(next.as_str())?;

    tracing::debug!(
        from = %previous.last().map(|u| u.as_str()).unwrap_or("initial"),
        to = %next,
        hop = previous.len() + 1,
        "Following redirect"
    );
    Ok(())
}

impl FetchSettings {
    fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Fetches the raw body of one feed URL.
///
/// # Behavior
///
/// - `timeout` bounds each attempt as a whole, headers and body, so a server
///   that stalls mid-body fails with [`FetchError::Timeout`]
/// - 429 and 5xx responses are retried with exponential backoff
///   (`retry_base`, doubled per attempt) up to `max_retries` times
/// - other non-2xx statuses fail immediately
/// - bodies over `max_bytes` fail with [`FetchError::ResponseTooLarge`]
/// - bodies shorter than their Content-Length are retried like 5xx
///
/// These retries live inside a single poll; the fixed-cadence retry of a
/// failing source is the worker's job.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<Vec<u8>, FetchError> {
    let mut retry_count = 0;

    loop {
        let attempt = tokio::time::timeout(settings.timeout, fetch_once(client, url, settings))
            .await
            .map_err(|_| FetchError::Timeout)?;

        match attempt {
            Ok(Attempt::Body(bytes)) => return Ok(bytes),
            Ok(Attempt::Refused(status)) => {
                if retry_count >= settings.max_retries {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(settings.max_retries)
                    });
                }

                let delay = settings.retry_delay(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Feed server refused request, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(FetchError::IncompleteResponse { expected, received })
                if retry_count < settings.max_retries =>
            {
                let delay = settings.retry_delay(retry_count);
                tracing::debug!(
                    feed = %url,
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    "Retrying incomplete download"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Result of one request that did not fail outright.
enum Attempt {
    Body(Vec<u8>),
    /// 429 or 5xx; worth retrying
    Refused(reqwest::StatusCode),
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<Attempt, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(FetchError::from_request)?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Ok(Attempt::Refused(status));
    }
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    read_limited_bytes(response, settings.max_bytes)
        .await
        .map(Attempt::Body)
}

/// Reads a response body, enforcing `limit` and checking Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_request)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
