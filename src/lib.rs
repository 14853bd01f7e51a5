//! Reactive Document
//!
//! A byte document backed by a random-access store that supports one
//! streaming writer and any number of concurrent readers. A reader that
//! starts while a write is in flight sees the stored prefix followed by every
//! byte the writer still produces, with no gap and no duplicate.
//!
//! # Modules
//!
//! - `document`: the `Document`, its write handle and read stream
//! - `replay`: `ReplayBuffer`, a buffer-until-subscribed primitive for hot streams
//! - `store`: the `ByteStore` trait with in-memory and file implementations
//! - `types`: errors and write results
//!
//! # Example
//!
//! ```no_run
//! use futures::{stream, TryStreamExt};
//! use reactive_document::{Document, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let document = Document::new(MemoryStore::new());
//!
//!     let source = stream::iter((0u8..10).map(Ok::<u8, std::convert::Infallible>));
//!     let write = document.write(source)?;
//!
//!     // Joins the write if it is still running
//!     let bytes: Vec<u8> = document.read()?.try_collect().await?;
//!     write.await?;
//!     assert_eq!(bytes, (0u8..10).collect::<Vec<_>>());
//!     Ok(())
//! }
//! ```

pub mod document;
pub mod replay;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root
pub use document::{Document, DocumentConfig, ReadStream, WriteHandle};
pub use replay::{Connection, ReplayBuffer, Subscription, Termination};
pub use store::{ByteStore, FileStore, MemoryStore};
pub use types::{DocumentError, DocumentResult, PersistedByte, UpstreamError, WriteSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
