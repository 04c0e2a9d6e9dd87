//! End-to-end tests for the event-log transport: writer, reader, and the
//! in-process server, exercised over real sockets.

use content_migrator::error::MigrateError;
use content_migrator::model::EntityKind;
use content_migrator::stream::server::spawn_local;
use content_migrator::stream::{EventLogReader, EventLogServer, EventLogWriter, MigrationEvent};
use std::time::Duration;
use tokio::time::timeout;

const TTL: u64 = 300;

fn sample_events(n: usize) -> Vec<MigrationEvent> {
    (0..n)
        .map(|i| MigrationEvent::success(EntityKind::Tag, i as i64, format!("T-{}", i)))
        .collect()
}

#[tokio::test]
async fn test_catch_up_reads_are_identical() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let writer = EventLogWriter::new(base_url.clone());
    let reader = EventLogReader::new(base_url);

    writer.create_stream("run-1", TTL).await.unwrap();
    for event in sample_events(5) {
        writer.append("run-1", &event).await.unwrap();
    }

    let first = reader.read_events("run-1", -1).await.unwrap();
    let second = reader.read_events("run-1", -1).await.unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    assert_eq!(first[0].0, 0);
    assert_eq!(first[4].0, 4);

    // Reading from a later offset returns exactly the suffix
    let suffix = reader.read_events("run-1", 3).await.unwrap();
    assert_eq!(suffix.len(), 2);
    assert_eq!(suffix[0], first[3]);
    assert_eq!(suffix[1], first[4]);

    cancel.cancel();
}

#[tokio::test]
async fn test_missing_stream_is_distinct_not_fatal() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let writer = EventLogWriter::new(base_url.clone());
    let reader = EventLogReader::new(base_url);

    assert!(!reader.stream_exists("nope").await.unwrap());
    match reader.read_events("nope", -1).await {
        Err(MigrateError::StreamNotFound(run_id)) => assert_eq!(run_id, "nope"),
        other => panic!("expected StreamNotFound, got {:?}", other.map(|v| v.len())),
    }

    // Bounded poll gives up with the terminal condition
    let err = reader
        .wait_for_stream("nope", 2, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::StreamNotFound(_)));

    writer.create_stream("nope", TTL).await.unwrap();
    assert!(reader.stream_exists("nope").await.unwrap());
    reader
        .wait_for_stream("nope", 2, Duration::from_millis(10))
        .await
        .unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn test_batch_append_preserves_order() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let writer = EventLogWriter::new(base_url.clone());
    let reader = EventLogReader::new(base_url);

    writer.create_stream("run-batch", TTL).await.unwrap();
    let events = sample_events(10);
    writer.append_batch("run-batch", &events).await.unwrap();

    let read = reader.read_events("run-batch", -1).await.unwrap();
    assert_eq!(read.len(), 10);
    for (i, (offset, event)) in read.iter().enumerate() {
        assert_eq!(*offset, i as u64);
        assert_eq!(event, &events[i]);
    }

    cancel.cancel();
}

#[tokio::test]
async fn test_tail_delivers_catch_up_then_live_without_gaps() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let writer = EventLogWriter::new(base_url.clone());
    let reader = EventLogReader::new(base_url);

    writer.create_stream("run-tail", TTL).await.unwrap();
    let events = sample_events(3);
    writer.append_batch("run-tail", &events).await.unwrap();

    let mut tail = reader.tail("run-tail", 0);
    let mut received = Vec::new();
    for _ in 0..3 {
        let (offset, event) = timeout(Duration::from_secs(5), tail.next())
            .await
            .expect("tail timed out")
            .expect("tail closed early");
        received.push((offset, event));
    }

    // Live appends arrive after the buffered catch-up
    writer
        .append("run-tail", &MigrationEvent::complete(EntityKind::Tag, 3, 0, 42))
        .await
        .unwrap();
    let (offset, event) = timeout(Duration::from_secs(5), tail.next())
        .await
        .expect("tail timed out")
        .expect("tail closed early");
    received.push((offset, event));

    let offsets: Vec<u64> = received.iter().map(|(o, _)| *o).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3]);
    assert!(matches!(received[3].1, MigrationEvent::Complete { .. }));

    tail.cancel();
    cancel.cancel();
}

#[tokio::test]
async fn test_tail_from_midstream_offset() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let writer = EventLogWriter::new(base_url.clone());
    let reader = EventLogReader::new(base_url);

    writer.create_stream("run-mid", TTL).await.unwrap();
    writer
        .append_batch("run-mid", &sample_events(5))
        .await
        .unwrap();

    // Resume as a reconnecting consumer would: from the last seen offset
    let mut tail = reader.tail("run-mid", 3);
    let (offset, _) = timeout(Duration::from_secs(5), tail.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offset, 3);
    let (offset, _) = timeout(Duration::from_secs(5), tail.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offset, 4);

    tail.cancel();
    cancel.cancel();
}

#[tokio::test]
async fn test_tail_recovers_from_connection_failure() {
    // Reserve a port, then leave it dead so the first connection attempts
    // are refused
    let placeholder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    let reader = EventLogReader::new(format!("http://{}", addr));
    let mut tail = reader.tail("run-recover", 0);

    // Let the tail fail at least once and enter its backoff loop
    tokio::time::sleep(Duration::from_millis(200)).await;

    let server = EventLogServer::bind(&addr.to_string()).await.unwrap();
    let cancel = server.cancellation_token();
    tokio::spawn(server.run());

    let writer = EventLogWriter::new(format!("http://{}", addr));
    writer.create_stream("run-recover", TTL).await.unwrap();
    writer
        .append_batch("run-recover", &sample_events(3))
        .await
        .unwrap();

    // Reconnect happens within the fixed backoff; no gaps, no duplicates
    let mut offsets = Vec::new();
    for _ in 0..3 {
        let (offset, _) = timeout(Duration::from_secs(10), tail.next())
            .await
            .expect("tail did not recover")
            .expect("tail closed early");
        offsets.push(offset);
    }
    assert_eq!(offsets, vec![0, 1, 2]);

    tail.cancel();
    cancel.cancel();
}

#[tokio::test]
async fn test_tail_on_unknown_stream_is_terminal() {
    let (base_url, cancel) = spawn_local().await.unwrap();
    let reader = EventLogReader::new(base_url);

    let mut tail = reader.tail("never-created", 0);
    // Channel closes without delivering anything
    assert!(timeout(Duration::from_secs(5), tail.next())
        .await
        .expect("tail timed out")
        .is_none());
    let err = tail.join().await.unwrap_err();
    assert!(matches!(err, MigrateError::StreamNotFound(_)));

    cancel.cancel();
}
