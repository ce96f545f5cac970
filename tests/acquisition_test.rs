//! Integration tests for the acquisition engine: concurrent telemetry
//! ingestion, control directives, and session finalize.

use lablink::protocol::{AcquisitionEngine, Codec};
use lablink::sink::ExchangeLog;
use lablink::transport::MockTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn sensor_engine(mock: &MockTransport) -> AcquisitionEngine {
    AcquisitionEngine::new(Arc::new(mock.clone()), Codec::sensor(5))
        .with_stop_grace(Duration::from_millis(20))
}

/// Wait until the scripted frames have all been consumed.
async fn drained(mock: &MockTransport) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while mock.pending_reads() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "acquisition loop did not drain the script"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn concurrent_acquisition_routes_frames_and_stops() {
    let mock = MockTransport::new();

    // 100 interleaved frames: telemetry, events, and malformed tuples.
    let mut telemetry_count = 0;
    let mut event_count = 0;
    for i in 0..100u32 {
        if i % 10 == 3 {
            mock.queue_frame(b"AZ:auto-zero done\r");
            event_count += 1;
        } else if i % 10 == 7 {
            mock.queue_frame(b"SIG:1.0,oops,0.0,25.0,99.0\r");
        } else {
            let line = format!("SIG:{}.5,80.0,0.0,25.0,{}\r", i, i * 100);
            mock.queue_frame(line.as_bytes());
            telemetry_count += 1;
        }
    }

    let mut engine = sensor_engine(&mock);
    engine.connect().await.unwrap();
    let series = engine.series();

    let (tx, rx) = mpsc::channel(8);
    tx.send("SIG_START".to_string()).await.unwrap();

    // Stop is requested from a concurrent task once the stream has been
    // fully received, so every well-formed frame lands before the flag.
    let stop_mock = mock.clone();
    let stop_tx = tx.clone();
    tokio::spawn(async move {
        drained(&stop_mock).await;
        stop_tx.send("STOP".to_string()).await.unwrap();
    });

    engine.run_control(rx).await.unwrap();

    assert_eq!(series.len(), telemetry_count);
    let events = engine.events();
    assert_eq!(events.len(), event_count);
    assert!(events.iter().all(|e| e.text.starts_with("AZ:")));

    // No partially visible record: every snapshot entry is fully formed.
    for record in series.snapshot() {
        assert_eq!(record.channels.len(), 4);
        assert_eq!(record.channels[1], 80.0);
    }

    // Both directives were forwarded to the device, unframed.
    let writes = mock.written_strings();
    assert!(writes.contains(&"SIG_START\r".to_string()));
    assert!(writes.contains(&"STOP\r".to_string()));
}

#[tokio::test]
async fn start_directive_is_idempotent() {
    let mock = MockTransport::new();
    for i in 0..10u32 {
        let line = format!("SIG:{}.0,2.0,0.0,25.0,{}\r", i, i);
        mock.queue_frame(line.as_bytes());
    }

    let mut engine = sensor_engine(&mock);
    engine.connect().await.unwrap();
    let series = engine.series();

    assert!(engine.start_acquisition());
    assert!(!engine.start_acquisition(), "second start must be ignored");
    assert!(engine.is_running());

    drained(&mock).await;
    engine.request_stop();

    let dir = tempfile::tempdir().unwrap();
    engine.finalize(dir.path()).await.unwrap();

    // A single loop consumed the stream exactly once.
    assert_eq!(series.len(), 10);
}

#[tokio::test]
async fn malformed_telemetry_never_enters_series() {
    let mock = MockTransport::new();
    mock.queue_frame(b"SIG:1.0,2.0\r"); // wrong arity
    mock.queue_frame(b"SIG:a,b,c,d,e\r"); // non-numeric
    mock.queue_frame(b"SIG:1.0,2.0,3.0,4.0,5.0\r"); // well-formed

    let mut engine = sensor_engine(&mock);
    engine.connect().await.unwrap();
    let series = engine.series();

    engine.start_acquisition();
    drained(&mock).await;
    engine.request_stop();

    let dir = tempfile::tempdir().unwrap();
    engine.finalize(dir.path()).await.unwrap();

    assert_eq!(series.len(), 1);
    assert_eq!(series.snapshot()[0].device_time, 5.0);
}

#[tokio::test]
async fn interrogation_responses_land_in_event_log() {
    let mock = MockTransport::new();
    mock.queue_frame(b"MIKRON31,FW2.1\r");
    mock.queue_frame(b"STATUS:idle\r");

    let mut engine = sensor_engine(&mock);
    engine.connect().await.unwrap();
    engine
        .interrogate(&["IDENTIFY?".to_string(), "STATUS?".to_string()])
        .await
        .unwrap();

    let events = engine.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].text, "MIKRON31,FW2.1");
    assert_eq!(events[1].text, "STATUS:idle");

    let writes = mock.written_strings();
    assert_eq!(writes, vec!["IDENTIFY?\r".to_string(), "STATUS?\r".to_string()]);
}

#[tokio::test]
async fn finalize_flushes_series_and_events() {
    let mock = MockTransport::new();
    for i in 0..5u32 {
        let line = format!("SIG:{}.0,2.0,0.0,25.0,{}\r", i, i * 10);
        mock.queue_frame(line.as_bytes());
    }
    mock.queue_frame(b"STOP:acknowledged\r");

    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();

    let mut engine = sensor_engine(&mock).with_exchange_log(log.clone());
    engine.connect().await.unwrap();
    engine.start_acquisition();
    drained(&mock).await;
    engine.request_stop();

    let (data_path, events_path) = engine.finalize(dir.path()).await.unwrap();

    let telemetry = std::fs::read_to_string(&data_path).unwrap();
    let mut lines = telemetry.lines();
    assert_eq!(
        lines.next().unwrap(),
        "Channel1,Channel2,Channel3,Temperature,TimeStamp"
    );
    assert_eq!(lines.count(), 5);

    let events = std::fs::read_to_string(&events_path).unwrap();
    assert_eq!(events.lines().count(), 1);
    assert!(events.contains("STOP:acknowledged"));

    // Transport close is sunk for session symmetry.
    let exchange = std::fs::read_to_string(log.path()).unwrap();
    assert!(exchange.contains("Port opened"));
    assert!(exchange.contains("Port closed"));
}

#[tokio::test]
async fn failed_open_degrades_whole_session_to_noop() {
    let mock = MockTransport::new();
    mock.fail_next_open();

    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();

    let mut engine = sensor_engine(&mock).with_exchange_log(log.clone());
    engine.connect().await.unwrap();

    // Initial queries are skipped, never an error.
    engine
        .interrogate(&["IDENTIFY?".to_string(), "STATUS?".to_string()])
        .await
        .unwrap();
    assert!(engine.events().is_empty());

    let (tx, rx) = mpsc::channel(8);
    tx.send("SIG_START".to_string()).await.unwrap();
    tx.send("STOP".to_string()).await.unwrap();
    engine.run_control(rx).await.unwrap();

    // Nothing reached the wire.
    assert!(mock.writes().is_empty());

    // Session still flushes its artifacts, with the full header.
    let (data_path, events_path) = engine.finalize(dir.path()).await.unwrap();
    let telemetry = std::fs::read_to_string(&data_path).unwrap();
    assert_eq!(
        telemetry.trim_end(),
        "Channel1,Channel2,Channel3,Temperature,TimeStamp"
    );
    assert!(std::fs::read_to_string(&events_path).unwrap().is_empty());

    // Only the failed open was sunk; no close entry for a port that never
    // opened.
    let exchange = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(exchange.lines().count(), 2);
    assert!(exchange.contains("Failed to open port"));
}

#[tokio::test]
async fn control_commands_are_forwarded_verbatim() {
    let mock = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let log = ExchangeLog::open(dir.path().join("log.csv")).unwrap();

    let mut engine = sensor_engine(&mock).with_exchange_log(log.clone());
    engine.connect().await.unwrap();

    let (tx, rx) = mpsc::channel(8);
    tx.send("MOD1_GAIN 4".to_string()).await.unwrap();
    tx.send("STOP".to_string()).await.unwrap();
    engine.run_control(rx).await.unwrap();

    let writes = mock.written_strings();
    // No address prefix, terminator only.
    assert_eq!(writes[0], "MOD1_GAIN 4\r");

    let exchange = std::fs::read_to_string(log.path()).unwrap();
    assert!(exchange.contains("MOD1_GAIN 4"));
}
