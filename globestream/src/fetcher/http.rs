//! Reference transport backed by reqwest.
//!
//! Redirects are reported, never followed: the resource state machine owns
//! the redirect budget, so the client is built with redirects disabled and a
//! 3xx reply carries its `Location` target back to the caller.
//!
//! Timeouts and connection failures surface as the synthetic reply codes of
//! the fetcher contract; the transport never panics a task.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{FetchReply, FetchTask, Fetcher, CODE_INTERNAL_ERROR, CODE_TIMEOUT};
use crate::cache::{EXPIRES_REVALIDATE, EXPIRES_UNKNOWN};

/// Default transport timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct HttpFetcherOptions {
    /// Whole-request timeout in milliseconds; exceeded requests complete
    /// with [`CODE_TIMEOUT`].
    pub timeout_ms: u64,
}

impl Default for HttpFetcherOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// HTTP transport implementing the [`Fetcher`] contract.
///
/// Requests run on the supplied tokio runtime; `shutdown()` cancels all
/// in-flight requests, whose tasks then complete with a synthetic internal
/// error via the task drop guard.
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: Handle,
    shutdown: CancellationToken,
}

impl HttpFetcher {
    /// Build the transport on the given runtime handle.
    pub fn new(options: HttpFetcherOptions, handle: Handle) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            handle,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancel all in-flight requests and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, task: FetchTask) {
        let client = self.client.clone();
        let token = self.shutdown.clone();
        let url = task.url.clone();
        let headers = task.headers.clone();

        self.handle.spawn(async move {
            let reply = tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(url, "fetch cancelled by shutdown");
                    FetchReply::with_code(CODE_INTERNAL_ERROR)
                }
                reply = perform(&client, &url, &headers) => reply,
            };
            task.done(reply);
        });
    }
}

async fn perform(client: &reqwest::Client, url: &str, headers: &[(String, String)]) -> FetchReply {
    let mut request = client.get(url);
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            debug!(url, "fetch timed out");
            return FetchReply::with_code(CODE_TIMEOUT);
        }
        Err(e) => {
            debug!(url, error = %e, "fetch failed");
            return FetchReply::with_code(CODE_INTERNAL_ERROR);
        }
    };

    let code = response.status().as_u16() as u32;
    let content_type = header_str(&response, CONTENT_TYPE);
    let redirect_url = match response.headers().get(LOCATION) {
        Some(value) => value.to_str().ok().map(String::from),
        None => None,
    };
    let expires = expires_from_headers(&response);

    match response.bytes().await {
        Ok(content) => FetchReply {
            content,
            content_type,
            code,
            expires,
            redirect_url,
        },
        Err(e) if e.is_timeout() => {
            debug!(url, "fetch body timed out");
            FetchReply::with_code(CODE_TIMEOUT)
        }
        Err(e) => {
            debug!(url, error = %e, "fetch body failed");
            FetchReply::with_code(CODE_INTERNAL_ERROR)
        }
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Derive an absolute expiry from `Cache-Control: max-age`.
fn expires_from_headers(response: &reqwest::Response) -> i64 {
    let Some(value) = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
    else {
        return EXPIRES_UNKNOWN;
    };

    for directive in value.split(',') {
        let directive = directive.trim();
        if directive == "no-cache" || directive == "no-store" {
            return EXPIRES_REVALIDATE;
        }
        if let Some(age) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = age.parse::<i64>() {
                return unix_now() + secs;
            }
        }
    }
    EXPIRES_UNKNOWN
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
