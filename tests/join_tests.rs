//! Late-subscriber join tests: readers that start while a write is running

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt, TryStreamExt};

use reactive_document::{Document, DocumentConfig, DocumentError, MemoryStore, UpstreamError};

fn delayed(
    count: u8,
    delay: Duration,
) -> impl Stream<Item = Result<u8, Infallible>> + Send + 'static {
    async_stream::stream! {
        for i in 0..count {
            yield Ok(i);
            tokio::time::sleep(delay).await;
        }
    }
}

fn expected(count: u8) -> Vec<u8> {
    (0..count).collect()
}

#[tokio::test]
async fn test_read_mid_write_sees_every_byte_once() {
    const K: u8 = 20;
    let document = Document::new(MemoryStore::new());
    let write = document
        .write(delayed(K, Duration::from_millis(10)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(55)).await;
    assert!(document.is_writing());

    let read: Vec<u8> = document.read().unwrap().try_collect().await.unwrap();
    write.await.unwrap();

    assert_eq!(read, expected(K));
}

#[tokio::test]
async fn test_read_mid_write_with_tiny_chunks() {
    const K: u8 = 30;
    let config = DocumentConfig::new().with_read_chunk_size(1);
    let document = Document::with_config(MemoryStore::new(), config);
    let write = document
        .write(delayed(K, Duration::from_millis(5)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    let read: Vec<u8> = document.read().unwrap().try_collect().await.unwrap();
    write.await.unwrap();

    assert_eq!(read, expected(K));
}

#[tokio::test]
async fn test_concurrent_readers_each_see_everything() {
    const K: u8 = 25;
    let document = Arc::new(Document::new(MemoryStore::new()));
    let write = document
        .write(delayed(K, Duration::from_millis(8)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let first = document.read().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let second = document.read().unwrap();

    let first = tokio::spawn(first.try_collect::<Vec<u8>>());
    let second = tokio::spawn(second.try_collect::<Vec<u8>>());

    assert_eq!(first.await.unwrap().unwrap(), expected(K));
    assert_eq!(second.await.unwrap().unwrap(), expected(K));
    write.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_readers_under_multithreaded_runtime() {
    const K: u8 = 60;
    let document = Arc::new(Document::new(MemoryStore::new()));
    let write = document
        .write(delayed(K, Duration::from_millis(2)))
        .unwrap();

    let mut readers = Vec::new();
    for i in 0..8u64 {
        let document = document.clone();
        readers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(i * 12)).await;
            document.read()?.try_collect::<Vec<u8>>().await
        }));
    }

    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap(), expected(K));
    }
    write.await.unwrap();
}

#[tokio::test]
async fn test_reader_before_write_is_history_only() {
    let document = Document::new(MemoryStore::from_bytes(vec![7, 7]));
    let mut reader = document.read().unwrap();

    // Activate the reader while the document is idle
    assert_eq!(reader.next().await.unwrap().unwrap(), 7);

    let write = document
        .write(delayed(5, Duration::from_millis(5)))
        .unwrap();
    let rest: Vec<u8> = reader.try_collect().await.unwrap();
    write.await.unwrap();

    assert_eq!(rest, vec![7]);
}

#[tokio::test]
async fn test_dispose_mid_write_completes_joined_reader() {
    const K: u8 = 50;
    let document = Document::keep_alive(MemoryStore::new());
    let write = document
        .write(delayed(K, Duration::from_millis(10)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(35)).await;
    let reader = tokio::spawn(document.read().unwrap().try_collect::<Vec<u8>>());
    tokio::time::sleep(Duration::from_millis(40)).await;

    document.dispose().unwrap();
    assert!(matches!(write.await, Err(DocumentError::WriteCancelled)));

    // The reader ends instead of hanging, with a gap-free prefix
    let read = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("reader should finish after dispose")
        .unwrap()
        .unwrap();
    assert!(read.len() < K as usize);
    assert_eq!(read, expected(read.len() as u8));
}

#[tokio::test]
async fn test_upstream_error_reaches_joined_reader() {
    let source = async_stream::stream! {
        for i in 0u8..5 {
            yield Ok(i);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        yield Err(UpstreamError::new("feed lost"));
    };

    let document = Document::new(MemoryStore::new());
    let write = document.write(source).unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;

    let mut received = Vec::new();
    let mut reader = document.read().unwrap();
    let error = loop {
        match reader.next().await {
            Some(Ok(b)) => received.push(b),
            Some(Err(e)) => break e,
            None => panic!("reader ended without the upstream error"),
        }
    };

    assert_eq!(received, expected(5));
    assert!(matches!(error, DocumentError::UpstreamFailure(_)));
    assert!(matches!(
        write.await,
        Err(DocumentError::UpstreamFailure(_))
    ));
}
