//! Fetcher boundary: the asynchronous transport contract.
//!
//! The streaming core never talks to the network directly; it hands a
//! [`FetchTask`] to a [`Fetcher`] and consumes the [`FetchReply`] delivered to
//! the task's completion sink. The contract is deliberately narrow:
//!
//! - `fetch()` is fire-and-forget; the transport owns its own threads.
//! - Every task is completed **exactly once**, even if the transport drops it
//!   on abnormal teardown (the task's drop guard delivers a synthetic
//!   internal-error reply in that case).
//! - Reply codes reuse HTTP semantics plus three synthetic codes for
//!   conditions the transport detects itself (timeout, internal error,
//!   prohibited content).
//! - The completion sink runs on an arbitrary transport thread and must not
//!   touch shared state; the resource manager gives it a channel send and
//!   nothing else.
//!
//! Sharing one transport between several maps is expressed by `Arc`
//! ownership; there is no explicit initialize/finalize pairing to get wrong.
//!
//! # Example
//!
//! ```
//! use globestream::fetcher::{FetchReply, FetchTask, Fetcher};
//! use globestream::resources::ResourceType;
//!
//! struct NullFetcher;
//!
//! impl Fetcher for NullFetcher {
//!     fn fetch(&self, task: FetchTask) {
//!         task.done(FetchReply::not_found());
//!     }
//! }
//!
//! let task = FetchTask::new(
//!     "https://example.com/tile/0/0/0",
//!     ResourceType::Texture,
//!     |reply| assert_eq!(reply.code, 404),
//! );
//! NullFetcher.fetch(task);
//! ```

mod http;

pub use http::{HttpFetcher, HttpFetcherOptions};

use bytes::Bytes;

use crate::cache::EXPIRES_UNKNOWN;
use crate::resources::ResourceType;

// =============================================================================
// Synthetic reply codes
// =============================================================================

/// Synthetic reply code: the transport timed out.
pub const CODE_TIMEOUT: u32 = 543;

/// Synthetic reply code: the transport failed internally (connection refused,
/// TLS failure, task abandoned, ...).
pub const CODE_INTERNAL_ERROR: u32 = 544;

/// Synthetic reply code: the content is prohibited (robots/licensing rules
/// enforced by the transport).
pub const CODE_PROHIBITED: u32 = 545;

// =============================================================================
// Reply
// =============================================================================

/// The outcome of one fetch, delivered exactly once per task.
#[derive(Clone, Debug)]
pub struct FetchReply {
    /// Response body; empty on failures.
    pub content: Bytes,

    /// Content type reported by the origin, if any.
    pub content_type: String,

    /// HTTP status code, or one of the synthetic codes.
    pub code: u32,

    /// Expiry derived from response headers (unix seconds), or
    /// [`EXPIRES_UNKNOWN`].
    pub expires: i64,

    /// Redirect target for 3xx replies.
    pub redirect_url: Option<String>,
}

impl FetchReply {
    /// A reply carrying a successful payload.
    pub fn ok(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            content_type: String::new(),
            code: 200,
            expires: EXPIRES_UNKNOWN,
            redirect_url: None,
        }
    }

    /// An empty reply with the given code.
    pub fn with_code(code: u32) -> Self {
        Self {
            content: Bytes::new(),
            content_type: String::new(),
            code,
            expires: EXPIRES_UNKNOWN,
            redirect_url: None,
        }
    }

    /// A plain 404 reply.
    pub fn not_found() -> Self {
        Self::with_code(404)
    }

    /// A 3xx reply pointing at a new location.
    pub fn redirect(code: u32, target: impl Into<String>) -> Self {
        let mut reply = Self::with_code(code);
        reply.redirect_url = Some(target.into());
        reply
    }

    /// Set the derived expiry.
    pub fn with_expires(mut self, expires: i64) -> Self {
        self.expires = expires;
        self
    }

    /// Set the reported content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// True for 2xx codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// True for 3xx codes carrying a redirect target.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.code) && self.redirect_url.is_some()
    }
}

// =============================================================================
// Task
// =============================================================================

type CompletionSink = Box<dyn FnOnce(FetchReply) + Send>;

/// One fetch in flight.
///
/// The task owns its completion sink. Calling [`done`](Self::done) consumes
/// the task and invokes the sink; dropping an uncompleted task invokes the
/// sink with a synthetic [`CODE_INTERNAL_ERROR`] reply. Either way the sink
/// runs exactly once.
pub struct FetchTask {
    /// Url to fetch. After a redirect the manager re-dispatches a fresh task
    /// with the new url; the transport never follows redirects itself.
    pub url: String,

    /// Extra request headers (authentication, accept hints).
    pub headers: Vec<(String, String)>,

    /// What kind of resource this fetch serves. Transports may apply
    /// type-specific rules (e.g. prohibited-content checks for imagery).
    pub resource_type: ResourceType,

    completion: Option<CompletionSink>,
}

impl FetchTask {
    /// Create a task completing into the given sink.
    pub fn new(
        url: impl Into<String>,
        resource_type: ResourceType,
        completion: impl FnOnce(FetchReply) + Send + 'static,
    ) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            resource_type,
            completion: Some(Box::new(completion)),
        }
    }

    /// Attach request headers.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Complete the task. Consumes the task; the sink runs exactly once.
    pub fn done(mut self, reply: FetchReply) {
        if let Some(sink) = self.completion.take() {
            sink(reply);
        }
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        // Abandoned by the transport; deliver the synthetic failure so the
        // resource is never stuck in `Downloading`.
        if let Some(sink) = self.completion.take() {
            sink(FetchReply::with_code(CODE_INTERNAL_ERROR));
        }
    }
}

impl std::fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("url", &self.url)
            .field("resource_type", &self.resource_type)
            .field("completed", &self.completion.is_none())
            .finish()
    }
}

// =============================================================================
// Fetcher contract
// =============================================================================

/// Asynchronous transport invoked on cache miss.
///
/// Implementations own their threads and complete each task exactly once
/// (guaranteed by [`FetchTask`] even if the implementation drops the task).
pub trait Fetcher: Send + Sync {
    /// Start fetching; must not block the caller.
    fn fetch(&self, task: FetchTask);
}
