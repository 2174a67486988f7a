//! Crate-wide error type.
//!
//! Tool handlers return these; the dispatch boundary in `server.rs` converts
//! every variant into an error content block so the stdio connection itself
//! never fails because a tool did.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery and (when enabled) launch both failed.
    #[error("{0}")]
    BrowserUnreachable(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    /// The page script threw. Not a protocol error; the structured
    /// exception text goes back to the caller.
    #[error("JavaScript exception: {0}")]
    Evaluation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Annotation limit reached ({0} max)")]
    QuotaExceeded(usize),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Browser protocol error: {0}")]
    Cdp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<chromiumoxide::error::CdpError> for BridgeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BridgeError::Cdp(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::BadRequest(format!("Invalid JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
