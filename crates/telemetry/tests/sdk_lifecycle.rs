//! End-to-end tests for the telemetry core.
//!
//! These wire a full `Sdk` against a recording delivery client and a fake
//! frame source, then drive it through lifecycle, span and record events.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use vigil_config::SdkConfig;
use vigil_core::{
    AppState, DeliveryClient, DeliveryError, Envelope, FrameMetricsSource, LifecycleEvent,
    RecordKind, SubscriptionId, Timestamp,
};
use vigil_telemetry::enrichment::{
    MEASUREMENT_APP_START_COLD, MEASUREMENT_FRAMES_FROZEN, MEASUREMENT_FRAMES_SLOW,
    MEASUREMENT_FRAMES_TOTAL,
};
use vigil_telemetry::model::OP_APP_START_COLD;
use vigil_telemetry::{FrameSample, LogLevel, LogRecord, MetricPoint, Sdk, SessionPhase, Span, Trace};

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartSession,
    EndSession,
    Deliver(RecordKind, usize),
}

#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<Call>>,
}

impl RecordingClient {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn delivered(&self, kind: RecordKind) -> usize {
        self.calls
            .lock()
            .iter()
            .map(|c| match c {
                Call::Deliver(k, n) if *k == kind => *n,
                _ => 0,
            })
            .sum()
    }
}

#[async_trait::async_trait]
impl DeliveryClient for RecordingClient {
    fn start_session(&self) -> Result<(), DeliveryError> {
        self.calls.lock().push(Call::StartSession);
        Ok(())
    }

    fn end_session(&self) -> Result<(), DeliveryError> {
        self.calls.lock().push(Call::EndSession);
        Ok(())
    }

    async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.calls
            .lock()
            .push(Call::Deliver(envelope.kind, envelope.item_count));
        Ok(())
    }
}

#[derive(Default)]
struct FakeFrames {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FrameMetricsSource for FakeFrames {
    fn start_collection(&self) -> Option<SubscriptionId> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        Some(SubscriptionId(format!("frames-{n}")))
    }

    fn stop_collection(&self, _id: &SubscriptionId) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn ms(v: u64) -> Timestamp {
    Timestamp::from_millis(v)
}

fn frame(end_ms: u64, duration_ms: u64) -> FrameSample {
    FrameSample {
        frame_end: ms(end_ms),
        duration_nanos: duration_ms * 1_000_000,
        delay_nanos: duration_ms.saturating_sub(16) * 1_000_000,
        refresh_rate: 60.0,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn quick_app_switch_keeps_one_session() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client.clone(), None).unwrap();

    sdk.on_foreground(ms(0));
    sdk.on_background(ms(100));
    tokio::time::sleep(Duration::from_millis(9_900)).await;
    sdk.on_foreground(ms(10_000));

    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;

    assert_eq!(client.count(&Call::StartSession), 1);
    assert_eq!(client.count(&Call::EndSession), 0);
    assert_eq!(sdk.session_phase(), Some(SessionPhase::Active));
    sdk.close().await;
}

#[tokio::test(start_paused = true)]
async fn long_background_ends_then_restarts_session() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client.clone(), None).unwrap();
    let mut events = sdk.events().subscribe();

    sdk.on_foreground(ms(0));
    sdk.on_background(ms(100));
    tokio::time::sleep(Duration::from_millis(30_001)).await;
    settle().await;
    assert_eq!(sdk.session_phase(), Some(SessionPhase::Ended));

    sdk.on_foreground(ms(60_000));
    let sessions: Vec<_> = client
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, Call::Deliver(..)))
        .collect();
    assert_eq!(
        sessions,
        vec![Call::StartSession, Call::EndSession, Call::StartSession]
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e.as_ref(), LifecycleEvent::SessionEnded { .. })));
    assert!(seen.iter().any(|e| matches!(
        e.as_ref(),
        LifecycleEvent::ForegroundChanged {
            state: AppState::Background,
            ..
        }
    )));
    sdk.close().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_foreground_signals_do_not_restart() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client.clone(), None).unwrap();

    sdk.on_foreground(ms(0));
    // Not a transition, so listeners are not notified.
    sdk.on_foreground(ms(90_000));
    assert_eq!(client.count(&Call::StartSession), 1);
    sdk.close().await;
}

// ── Batching ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn background_flushes_buffered_logs_and_metrics() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client.clone(), None).unwrap();

    sdk.on_foreground(ms(0));
    for i in 0..3 {
        sdk.log(LogRecord::new(LogLevel::Info, format!("line {i}")).with_attribute("i", i));
    }
    sdk.metric(MetricPoint::counter("screen.view", 1.0).with_unit("none"));

    sdk.on_background(ms(500));
    for _ in 0..200 {
        if client.delivered(RecordKind::Log) == 3 && client.delivered(RecordKind::Metric) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(client.count(&Call::Deliver(RecordKind::Log, 3)), 1);
    assert_eq!(client.count(&Call::Deliver(RecordKind::Metric, 1)), 1);
    assert!(sdk.logs().is_empty());
    assert!(sdk.metrics().is_empty());
    sdk.close().await;
}

#[tokio::test]
async fn overflow_drops_oldest_and_reports_it() {
    let mut config = SdkConfig::default();
    config.metrics.max_batch_size = 2;
    config.metrics.enabled = true;
    config.logs.enabled = false;
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(config, client.clone(), None).unwrap();

    sdk.log(LogRecord::new(LogLevel::Debug, "dropped silently"));
    assert!(!sdk.logs().is_enabled());

    for i in 0..5 {
        sdk.metric(MetricPoint::counter(format!("m{i}"), 1.0));
        assert!(sdk.metrics().len() <= 2);
    }
    sdk.close().await;

    assert_eq!(client.delivered(RecordKind::Log), 0);
    let delivered = client.delivered(RecordKind::Metric) as u64;
    assert_eq!(delivered + sdk.metrics().dropped_count() + sdk.metrics().len() as u64, 5);
}

#[tokio::test]
async fn close_delivers_what_is_left() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client.clone(), None).unwrap();
    sdk.log(LogRecord::new(LogLevel::Error, "crash handler armed"));

    sdk.close().await;
    assert_eq!(client.delivered(RecordKind::Log), 1);

    sdk.log(LogRecord::new(LogLevel::Error, "after close"));
    assert!(sdk.logs().is_empty());
}

// ── Enrichment ───────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_start_trace_gets_app_start_and_frames() {
    let client = Arc::new(RecordingClient::default());
    let source = Arc::new(FakeFrames::default());
    let sdk = Sdk::start(SdkConfig::default(), client, Some(source.clone())).unwrap();

    sdk.on_app_start(ms(0), true);
    let mut root = Span::new("ui.load", ms(0)).with_description("MainActivity");
    let mut app_start = Span::new(OP_APP_START_COLD, ms(0)).with_parent(root.id.clone());
    sdk.span_started(&root);
    sdk.span_started(&app_start);

    sdk.on_frame_sample(frame(10, 8));
    sdk.on_frame_sample(frame(50, 40));
    sdk.on_frame_sample(frame(900, 800));
    sdk.on_first_frame_drawn(ms(950));
    sdk.on_first_frame_drawn(ms(2_000));

    app_start.end(ms(950));
    sdk.span_ended(&app_start);
    sdk.on_frame_sample(frame(1_000, 40));
    root.end(ms(1_100));
    sdk.span_ended(&root);

    let mut trace = Trace::new("MainActivity", root);
    trace.add_span(app_start);
    let trace = sdk.finish_trace(trace);

    let app_start_ms = trace.measurements[MEASUREMENT_APP_START_COLD].value;
    assert!((app_start_ms - 950.0).abs() < 1e-6);
    // 4 rendered frames (888ms) plus 212ms of idle time at 60 Hz.
    assert_eq!(trace.measurements[MEASUREMENT_FRAMES_TOTAL].value, 16.0);
    assert_eq!(trace.measurements[MEASUREMENT_FRAMES_SLOW].value, 2.0);
    assert_eq!(trace.measurements[MEASUREMENT_FRAMES_FROZEN].value, 1.0);

    let child = &trace.spans[1];
    // 3 rendered frames (848ms) plus 102ms of idle time.
    assert_eq!(child.measurements[MEASUREMENT_FRAMES_TOTAL].value, 9.0);

    assert_eq!(source.starts.load(Ordering::SeqCst), 1);
    assert_eq!(source.stops.load(Ordering::SeqCst), 1);

    // The interval is handed out once.
    let root = Span::new("ui.load", ms(3_000));
    let mut again = Trace::new("Second", root.clone());
    again.add_span(Span::new(OP_APP_START_COLD, ms(3_000)).with_parent(root.id));
    let again = sdk.finish_trace(again);
    assert!(!again.measurements.contains_key(MEASUREMENT_APP_START_COLD));

    sdk.close().await;
}

#[tokio::test]
async fn no_frame_source_means_no_frame_measurements() {
    let client = Arc::new(RecordingClient::default());
    let sdk = Sdk::start(SdkConfig::default(), client, None).unwrap();

    let root = Span::new("ui.load", ms(0));
    sdk.span_started(&root);
    sdk.on_frame_sample(frame(10, 40));
    let trace = sdk.finish_trace(Trace::new("Plain", root));

    assert!(trace.measurements.is_empty());
    assert!(trace.spans[0].measurements.is_empty());
    sdk.close().await;
}
