//! Reactive Document - Demo Entry Point
//!
//! Writes twenty bytes, one every 100ms, and starts a reader halfway through
//! the write. The reader prints every byte it sees; the write summary is
//! printed as JSON at the end.

use std::convert::Infallible;
use std::time::Duration;

use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use reactive_document::{Document, DocumentConfig, DocumentResult, MemoryStore};

const BYTE_COUNT: u8 = 20;
const BYTE_DELAY: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> DocumentResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reactive_document=info,document_demo=info")),
        )
        .init();

    let source = async_stream::stream! {
        for value in 0..BYTE_COUNT {
            tracing::info!(value, "source produced");
            yield Ok::<u8, Infallible>(value);
            tokio::time::sleep(BYTE_DELAY).await;
        }
    };

    let document = Document::with_config(MemoryStore::new(), DocumentConfig::from_env());
    let write = document.write(source)?;

    tokio::time::sleep(BYTE_DELAY * u32::from(BYTE_COUNT / 2)).await;

    let mut reader = document.read()?;
    let mut seen = 0usize;
    while let Some(byte) = reader.next().await {
        let value = byte?;
        tracing::info!(value, "reader received");
        seen += 1;
    }

    let summary = write.await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).unwrap_or_default()
    );
    println!("reader saw {} of {} bytes", seen, summary.bytes_written);

    document.dispose()
}
