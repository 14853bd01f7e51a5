//! Data types for the reactive document
//!
//! This module contains the error types and the values flowing out of a write.

mod error;
mod write;

pub use error::{DocumentError, DocumentResult, UpstreamError};
pub use write::{PersistedByte, WriteSummary};
