//! End-to-end tests for the ingestion pipeline.
//!
//! Each test drives raw messages through the gateway with real persistence
//! and broadcast workers behind it, then drains the workers before checking
//! what reached the sink and the subscribers.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use hydrowatch::broadcast::{ChannelSubscriber, Outbound};
use hydrowatch::collector::{IngestOutcome, RawMessage};
use hydrowatch::models::{BoundKind, Metrics, Reading, Severity, ThresholdConfig};

use common::{FailingSink, MemorySink, Pipeline, RejectingSink};

fn frame_type(outbound: Outbound) -> String {
    let frame = match outbound {
        Outbound::Frame(frame) => frame,
        other => panic!("expected a frame, got {other:?}"),
    };
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    value["type"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Test: low pH raises exactly one critical alert on the min bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn low_ph_raises_one_critical_alert() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::start(ThresholdConfig::empty().with("ph", 5.5, 7.0), sink.clone());
    let (subscriber, mut rx) = ChannelSubscriber::new(16);
    pipeline.hub.register(Arc::new(subscriber));

    let outcome = pipeline.gateway.handle(RawMessage::from_topic(
        "agronomia/devices/D1/data",
        r#"{"device_id":"D1","timestamp":1700000000000,"sensors":{"ph":4.8}}"#,
    ));

    let IngestOutcome::Accepted { device_id, alerts } = outcome else {
        panic!("expected the reading to be accepted");
    };
    assert_eq!(device_id, "D1");
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.metric_name, "ph");
    assert_eq!(alert.violated_bound, 5.5);
    assert_eq!(alert.bound_kind, BoundKind::Min);
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.timestamp, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());

    pipeline.drain().await;

    assert_eq!(sink.readings.lock().len(), 1);
    assert_eq!(sink.alerts.lock().len(), 1);
    assert_eq!(sink.alerts.lock()[0].id, alert.id);

    assert_eq!(frame_type(rx.try_recv().unwrap()), "alert");
    assert_eq!(frame_type(rx.try_recv().unwrap()), "reading");
    assert!(rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: in-band EC raises nothing and is cached as sent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn in_band_ec_raises_no_alert() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::start(
        ThresholdConfig::empty().with("ec", 1000.0, 2500.0),
        sink.clone(),
    );

    let outcome = pipeline
        .gateway
        .handle(RawMessage::from_body(r#"{"device_id":"D2","sensors":{"ec":1800}}"#));

    let IngestOutcome::Accepted { alerts, .. } = outcome else {
        panic!("expected the reading to be accepted");
    };
    assert!(alerts.is_empty());

    let state = pipeline.gateway.cache().get("D2").unwrap();
    assert_eq!(
        state.last_reading.metrics,
        Metrics {
            ec: Some(1800.0),
            ..Metrics::default()
        }
    );

    let gateway = Arc::clone(&pipeline.gateway);
    pipeline.drain().await;

    assert_eq!(sink.readings.lock().len(), 1);
    assert!(sink.alerts.lock().is_empty());
    assert_eq!(gateway.stats().alerts_raised, 0);
}

// ---------------------------------------------------------------------------
// Test: concurrent readings for one device leave one of them intact
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readings_leave_one_intact() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::start(ThresholdConfig::default(), sink.clone());

    let newer = r#"{"device_id":"D1","timestamp":1700000002000,"sensors":{"ph":6.1,"ec":1500}}"#;
    let older = r#"{"device_id":"D1","timestamp":1700000001000,"sensors":{"ph":5.9,"ec":1400}}"#;

    let handles: Vec<_> = [newer, older]
        .into_iter()
        .map(|body| {
            let gateway = Arc::clone(&pipeline.gateway);
            tokio::spawn(async move { gateway.handle(RawMessage::from_body(body)) })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_accepted());
    }

    let cached = pipeline.gateway.cache().get("D1").unwrap().last_reading;
    let candidates = [newer, older].map(|body| {
        Reading::decode(None, body.as_bytes(), Utc::now()).unwrap()
    });
    assert!(candidates.contains(&*cached));
    assert_eq!(pipeline.gateway.cache().len(), 1);

    pipeline.drain().await;
    assert_eq!(sink.readings.lock().len(), 2);
}

// ---------------------------------------------------------------------------
// Test: persistence failures do not stop caching or fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_sink_does_not_block_fan_out() {
    let sink = Arc::new(FailingSink::default());
    let pipeline = Pipeline::start(ThresholdConfig::empty().with("ph", 5.5, 7.0), sink.clone());
    let (subscriber, mut rx) = ChannelSubscriber::new(16);
    pipeline.hub.register(Arc::new(subscriber));

    let outcome = pipeline
        .gateway
        .handle(RawMessage::from_body(r#"{"device_id":"D1","sensors":{"ph":8.0}}"#));
    assert!(outcome.is_accepted());
    assert!(pipeline.gateway.cache().get("D1").is_some());

    pipeline.drain().await;

    // One batch write and one alert write.
    assert_eq!(sink.attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(frame_type(rx.try_recv().unwrap()), "alert");
    assert_eq!(frame_type(rx.try_recv().unwrap()), "reading");
}

// ---------------------------------------------------------------------------
// Test: rejected messages reach neither the sink nor subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_message_is_discarded() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::start(ThresholdConfig::default(), sink.clone());
    let (subscriber, mut rx) = ChannelSubscriber::new(16);
    pipeline.hub.register(Arc::new(subscriber));

    let outcome = pipeline
        .gateway
        .handle(RawMessage::from_body(r#"{"device_id":"  ","sensors":{"ph":6.0}}"#));
    assert!(matches!(outcome, IngestOutcome::Rejected(_)));

    let gateway = Arc::clone(&pipeline.gateway);
    pipeline.drain().await;

    assert!(sink.readings.lock().is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(gateway.stats().rejected, 1);
}

// ---------------------------------------------------------------------------
// Test: the persisted reading keeps every metric and the timestamp
// ---------------------------------------------------------------------------

#[tokio::test]
async fn persisted_reading_matches_inbound_message() {
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::start(ThresholdConfig::empty(), sink.clone());

    pipeline.gateway.handle(RawMessage::from_body(
        r#"{
            "device_id": "rack-3",
            "timestamp": "2024-05-01T12:30:00.250Z",
            "metrics": {"ph": 6.02, "water_temp_c": 21.5, "tds_ppm": 840, "co2_ppm": 612.5}
        }"#,
    ));
    pipeline.drain().await;

    let stored = sink.readings.lock()[0].clone();
    assert_eq!(stored.device_id, "rack-3");
    assert_eq!(stored.timestamp.to_rfc3339(), "2024-05-01T12:30:00.250+00:00");

    let pairs: Vec<(String, f64)> = stored
        .metrics
        .iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("ph".to_string(), 6.02),
            ("water_temp".to_string(), 21.5),
            ("tds".to_string(), 840.0),
            ("co2_ppm".to_string(), 612.5),
        ]
    );
}

// ---------------------------------------------------------------------------
// Test: a reading the store refuses does not cost the rest of its batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refused_reading_does_not_drop_its_batch() {
    let sink = Arc::new(RejectingSink::new("bad"));
    let pipeline = Pipeline::start(ThresholdConfig::empty(), sink.clone());

    for device in ["D1", "bad", "D2", "D3"] {
        let body = format!(r#"{{"device_id":"{device}","sensors":{{"ph":6.0}}}}"#);
        assert!(pipeline.gateway.handle(RawMessage::from_body(body)).is_accepted());
    }
    pipeline.drain().await;

    let stored: Vec<String> = sink
        .inner
        .readings
        .lock()
        .iter()
        .map(|reading| reading.device_id.clone())
        .collect();
    assert_eq!(stored, vec!["D1", "D2", "D3"]);
}
