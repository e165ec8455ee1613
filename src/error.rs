//! Typed errors for each component seam.
//!
//! Library code returns these; `main` wraps them in `anyhow` at the process
//! boundary.

use thiserror::Error;

/// Record store failures. "Not found" is never an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, pool or query failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be turned back into a record
    #[error("corrupt row for {link}: {reason}")]
    CorruptRow { link: String, reason: String },
}

/// Listing or detail page fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure, including timeouts
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The page loaded but the expected element was not there
    #[error("expected content '{selector}' missing from {url}")]
    MissingContent { url: String, selector: String },

    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Building a custom extractor failed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid {field} pattern: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Mail delivery failures.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail API returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The listing page itself could not be fetched
    #[error("listing fetch failed: {0}")]
    Listing(#[source] FetchError),
}

/// A manual trigger could not start a run.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("a run is already in progress")]
    Busy,

    #[error(transparent)]
    Run(#[from] EngineError),

    /// The run task panicked or was cancelled
    #[error("run task aborted: {0}")]
    Aborted(String),
}
