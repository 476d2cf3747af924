//! Error taxonomy at the run boundary.
//!
//! Inside modules errors are plain `anyhow::Error` with context; they are
//! classified here only where the classification changes what happens next.

use thiserror::Error;

/// A failure that aborts the whole run and surfaces in the exit code.
#[derive(Debug, Error)]
pub enum RunError {
    /// The listing could not be fetched or parsed. Feeds are left unchanged.
    #[error("failed to fetch decision listing: {0:#}")]
    Fetch(anyhow::Error),
    /// A feed file could not be read, parsed or written.
    #[error("feed store failure: {0:#}")]
    Store(anyhow::Error),
}

/// A failure to summarize one decision. Scoped to that item.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("no opinion text could be extracted from {url}")]
    MissingText { url: String },
    #[error("model returned an empty summary")]
    EmptySummary,
    #[error("summary identifier {got} does not match decision {expected}")]
    IdentifierMismatch { expected: String, got: String },
    #[error("summarization request failed: {0:#}")]
    Request(anyhow::Error),
    #[error("no summarizer available: {0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for SummarizeError {
    fn from(err: anyhow::Error) -> Self {
        SummarizeError::Request(err)
    }
}
