//! Integration tests for the pump-style command/response engine, driven
//! through the scripted mock transport.

use lablink::error::LinkError;
use lablink::protocol::{Codec, EngineState, PumpEngine};
use lablink::sequence::SequenceItem;
use lablink::sink::ExchangeLog;
use lablink::transport::MockTransport;
use std::sync::Arc;
use std::time::Duration;

/// Frame a device response the way the hardware does: payload followed by
/// the ETX+CR+LF marker triple and the filler byte.
fn frame(payload: &str) -> Vec<u8> {
    let mut bytes = payload.as_bytes().to_vec();
    bytes.extend_from_slice(b"\x03\r\n\xff");
    bytes
}

fn engine_with(mock: &MockTransport, log: ExchangeLog) -> PumpEngine {
    PumpEngine::new(Arc::new(mock.clone()), Codec::pump("/1"), log)
        .with_poll_interval(Duration::from_millis(1))
}

#[tokio::test]
async fn busy_poll_completes_after_two_busy_responses() {
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();
    let mock = MockTransport::new();

    // Initial ack, then two busy polls before the device reports ready.
    mock.queue_frame(&frame("/0`"));
    mock.queue_frame(&frame("/0@"));
    mock.queue_frame(&frame("/0@"));
    mock.queue_frame(&frame("/0`"));

    let mut engine = engine_with(&mock, log.clone());
    assert_eq!(engine.state(), EngineState::Idle);
    engine.connect().await.unwrap();
    engine.send_command("A2000R").await.unwrap();
    // Completed cycle returns the engine to idle.
    assert_eq!(engine.state(), EngineState::Idle);

    let writes = engine_writes(&mock);
    assert_eq!(writes[0], "/1A2000R\r");
    let polls = writes.iter().filter(|w| w.as_str() == "/1?\r").count();
    assert_eq!(polls, 3, "two busy iterations plus the final ready poll");

    // Exactly one entry for the command cycle; busy polls are never sunk.
    let contents = std::fs::read_to_string(log.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3); // header + port opened + command exchange
    assert!(lines[2].contains("/1A2000R"));
}

#[tokio::test]
async fn device_error_aborts_remaining_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();
    let mock = MockTransport::new();

    // Command 1: ack then immediately ready. Command 2: error frame.
    mock.queue_frame(&frame("/0`"));
    mock.queue_frame(&frame("/0`"));
    mock.queue_frame(&frame("/0i255"));

    let items = vec![
        SequenceItem::Command("A2000R".to_string()),
        SequenceItem::Command("o2R".to_string()),
        SequenceItem::Command("A8000R".to_string()),
    ];

    let mut engine = engine_with(&mock, log.clone());
    engine.connect().await.unwrap();
    let result = engine.run_sequence(&items, 1).await;

    match result {
        Err(LinkError::Device { command, response }) => {
            assert_eq!(command, "o2R");
            assert!(response.contains("/0i255"));
        }
        other => panic!("expected device error, got {:?}", other),
    }
    assert_eq!(engine.state(), EngineState::Fault);

    // Command 3 was never written.
    let writes = engine_writes(&mock);
    assert!(writes.contains(&"/1A2000R\r".to_string()));
    assert!(writes.contains(&"/1o2R\r".to_string()));
    assert!(!writes.contains(&"/1A8000R\r".to_string()));

    // Exactly one entry for command 1, one for the failed command 2.
    let contents = std::fs::read_to_string(log.path()).unwrap();
    let cmd1_entries = contents.lines().filter(|l| l.contains("/1A2000R")).count();
    assert_eq!(cmd1_entries, 1);
    assert_eq!(contents.lines().count(), 4); // header + open + 2 exchanges

    // Cleanup still runs and keeps the record symmetric.
    engine.shutdown().await.unwrap();
    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert!(contents.contains("Port closed"));
}

#[tokio::test]
async fn closed_port_degrades_to_noop_sends() {
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();
    let mock = MockTransport::new();
    mock.fail_next_open();

    let mut engine = engine_with(&mock, log.clone());
    engine.connect().await.unwrap();

    // Sends are skipped with a diagnostic, never an error or a sink entry.
    engine.send_command("A2000R").await.unwrap();
    assert!(mock.writes().is_empty());

    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(contents.lines().count(), 2); // header + failed open
    assert!(contents.contains("Failed to open port"));
}

#[tokio::test]
async fn bounded_ready_wait_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();
    let mock = MockTransport::new();

    mock.queue_frame(&frame("/0`")); // ack
    mock.queue_frame(&frame("/0@")); // busy forever after
    mock.queue_frame(&frame("/0@"));
    mock.queue_frame(&frame("/0@"));

    let mut engine = engine_with(&mock, log).with_poll_bound(3);
    engine.connect().await.unwrap();

    match engine.send_command("A2000R").await {
        Err(LinkError::Timeout { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected timeout, got {:?}", other),
    }
    // The exhausted wait leaves the engine in its last observed state.
    assert_eq!(engine.state(), EngineState::Busy);
}

#[tokio::test]
async fn sequence_replay_runs_every_pass() {
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();
    let mock = MockTransport::new();

    // Two passes, each needs an ack and a ready.
    for _ in 0..2 {
        mock.queue_frame(&frame("/0`"));
        mock.queue_frame(&frame("/0`"));
    }

    let items = vec![
        SequenceItem::Marker {
            block: "Prime".to_string(),
            step: "Fill".to_string(),
        },
        SequenceItem::Command("~V".to_string()),
    ];

    let mut engine = engine_with(&mock, log);
    engine.connect().await.unwrap();
    engine.run_sequence(&items, 2).await.unwrap();

    let sent = engine_writes(&mock)
        .iter()
        .filter(|w| w.as_str() == "/1~V\r")
        .count();
    assert_eq!(sent, 2);
}

fn engine_writes(mock: &MockTransport) -> Vec<String> {
    mock.written_strings()
}
