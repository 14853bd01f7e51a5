//! Document configuration

use std::env;

/// Environment variable overriding the historical read chunk size
pub const READ_CHUNK_SIZE_ENV: &str = "DOCUMENT_READ_CHUNK_SIZE";

/// Environment variable controlling whether the store outlives the document
pub const KEEP_ALIVE_ENV: &str = "DOCUMENT_KEEP_ALIVE";

/// Configuration for a Document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConfig {
    /// Bytes fetched from the store per lock acquisition when reading history
    pub read_chunk_size: usize,
    /// Leave the store open when the document is disposed
    pub keep_alive: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            keep_alive: false,
        }
    }
}

impl DocumentConfig {
    /// Create config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DOCUMENT_READ_CHUNK_SIZE` / `DOCUMENT_KEEP_ALIVE`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var(READ_CHUNK_SIZE_ENV) {
            if let Ok(size) = value.trim().parse::<usize>() {
                config = config.with_read_chunk_size(size);
            }
        }

        if let Ok(value) = env::var(KEEP_ALIVE_ENV) {
            config.keep_alive = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        config
    }

    /// Set the historical read chunk size (clamped to at least one byte)
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Set whether the store is left open on dispose
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}
