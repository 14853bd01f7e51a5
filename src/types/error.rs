//! Error types shared by the document and the replay buffer

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors that can occur while writing to or reading from a document
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The document was disposed before (or while) the operation ran
    #[error("document has been disposed")]
    Disposed,

    /// Another write is still active on this document
    #[error("a write is already in progress")]
    WriteAlreadyInProgress,

    /// The source driving a write reported an error
    #[error("upstream source failed: {0}")]
    UpstreamFailure(UpstreamError),

    /// The write was cancelled before its source completed
    #[error("write was cancelled")]
    WriteCancelled,

    /// `connect()` was called more than once on the same replay buffer
    #[error("replay buffer is already connected")]
    AlreadyConnected,

    /// `write()` was called outside a Tokio runtime
    #[error("no Tokio runtime to drive the write")]
    NoRuntime,

    /// The backing store failed
    #[error("store error: {0}")]
    Store(#[from] io::Error),
}

/// Error reported by an upstream source.
///
/// Cheap to clone so a single failure can be delivered to the writer and to
/// every reader joined to the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    message: Arc<str>,
}

impl UpstreamError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string().into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UpstreamError {}

impl From<UpstreamError> for DocumentError {
    fn from(e: UpstreamError) -> Self {
        DocumentError::UpstreamFailure(e)
    }
}
