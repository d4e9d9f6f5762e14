//! The root object that owns and wires every telemetry component.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use vigil_config::SdkConfig;
use vigil_core::{
    AppState, DeliveryClient, EventBus, ExecutorError, ForegroundState, FrameMetricsSource,
    ListenerId, Timestamp,
};

use crate::app_start::AppStartClock;
use crate::batch::TelemetryBatchCoordinator;
use crate::enrichment::{PerformanceEnrichmentProcessor, TraceProcessor};
use crate::frames::{FrameSample, SpanFrameCorrelator};
use crate::model::{LogRecord, MetricPoint, Span, Trace};
use crate::session::{SessionLifecycleTracker, SessionPhase};

/// A running telemetry core.
///
/// Platform callbacks call the `on_*` and `span_*` methods from whatever
/// thread they fire on; none of them block on I/O or return errors.
pub struct Sdk {
    config: SdkConfig,
    events: Arc<EventBus>,
    foreground: Arc<ForegroundState>,
    app_start: Arc<AppStartClock>,
    frames: Arc<SpanFrameCorrelator>,
    sessions: Option<(Arc<SessionLifecycleTracker>, Mutex<Option<ListenerId>>)>,
    logs: TelemetryBatchCoordinator<LogRecord>,
    metrics: TelemetryBatchCoordinator<MetricPoint>,
    processor: PerformanceEnrichmentProcessor,
    closed: AtomicBool,
}

impl Sdk {
    /// Validate `config` and start every enabled component.
    ///
    /// Must be called from inside a tokio runtime: session timers, periodic
    /// flushes and flush executors are spawned on the current one.
    pub fn start(
        config: SdkConfig,
        delivery: Arc<dyn DeliveryClient>,
        frame_source: Option<Arc<dyn FrameMetricsSource>>,
    ) -> vigil_core::Result<Self> {
        config.validate()?;
        let runtime =
            Handle::try_current().map_err(|e| ExecutorError::NoRuntime(format!("sdk: {e}")))?;

        let events = Arc::new(EventBus::default());
        let foreground = Arc::new(ForegroundState::new().with_event_bus(events.clone()));
        let app_start = Arc::new(AppStartClock::new(config.app_start.max_duration()));
        let frames = Arc::new(SpanFrameCorrelator::new(frame_source, &config.frames));

        let sessions = if config.session.enabled {
            let tracker = Arc::new(SessionLifecycleTracker::new(
                config.session.session_interval(),
                delivery.clone(),
                events.clone(),
                runtime.clone(),
            ));
            let id = foreground.subscribe(tracker.clone());
            Some((tracker, Mutex::new(Some(id))))
        } else {
            tracing::info!("Session tracking disabled");
            None
        };

        let logs = TelemetryBatchCoordinator::new(
            config.logs.clone(),
            delivery.clone(),
            events.clone(),
            &runtime,
        );
        logs.register(&foreground);
        let metrics =
            TelemetryBatchCoordinator::new(config.metrics.clone(), delivery, events.clone(), &runtime);
        metrics.register(&foreground);

        let processor = PerformanceEnrichmentProcessor::new(app_start.clone(), frames.clone());

        tracing::info!(
            sessions = sessions.is_some(),
            logs = logs.is_enabled(),
            metrics = metrics.is_enabled(),
            frames = frames.is_enabled(),
            "Telemetry core started"
        );

        Ok(Self {
            config,
            events,
            foreground,
            app_start,
            frames,
            sessions,
            logs,
            metrics,
            processor,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn foreground(&self) -> &Arc<ForegroundState> {
        &self.foreground
    }

    pub fn app_state(&self) -> AppState {
        self.foreground.current()
    }

    /// `None` when session tracking is disabled.
    pub fn session_phase(&self) -> Option<SessionPhase> {
        self.sessions.as_ref().map(|(tracker, _)| tracker.phase())
    }

    pub fn logs(&self) -> &TelemetryBatchCoordinator<LogRecord> {
        &self.logs
    }

    pub fn metrics(&self) -> &TelemetryBatchCoordinator<MetricPoint> {
        &self.metrics
    }

    pub fn frames(&self) -> &SpanFrameCorrelator {
        &self.frames
    }

    pub fn app_start(&self) -> &AppStartClock {
        &self.app_start
    }

    // ── Lifecycle callbacks ──────────────────────────────────────────────

    pub fn on_foreground(&self, now: Timestamp) {
        self.foreground.move_to_foreground(now);
    }

    pub fn on_background(&self, now: Timestamp) {
        self.foreground.move_to_background(now);
    }

    pub fn on_app_start(&self, at: Timestamp, is_cold: bool) {
        self.app_start.record_start(at, is_cold);
    }

    pub fn on_first_frame_drawn(&self, at: Timestamp) {
        self.app_start.record_end(at);
    }

    pub fn on_frame_sample(&self, sample: FrameSample) {
        self.frames.on_frame_sample(sample);
    }

    // ── Spans and traces ─────────────────────────────────────────────────

    pub fn span_started(&self, span: &Span) {
        self.frames.on_span_start(span.id.clone(), span.started_at);
    }

    /// Call once the span has an end time; spans without one are ignored.
    pub fn span_ended(&self, span: &Span) {
        if let Some(ended_at) = span.ended_at {
            self.frames.on_span_end(&span.id, ended_at);
        }
    }

    /// Attach pending app start and frame measurements to a finished trace.
    pub fn finish_trace(&self, trace: Trace) -> Trace {
        self.processor.process(trace)
    }

    // ── Records ──────────────────────────────────────────────────────────

    pub fn log(&self, record: LogRecord) {
        self.logs.append(record);
    }

    pub fn metric(&self, point: MetricPoint) {
        self.metrics.append(point);
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush both coordinators within their close grace, then detach and
    /// reset shared state so a new `Sdk` starts from scratch.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Closing telemetry core");

        if let Some((tracker, registration)) = &self.sessions {
            if let Some(id) = registration.lock().take() {
                self.foreground.unsubscribe(id);
            }
            tracker.shutdown();
        }

        tokio::join!(
            self.logs.close(self.config.logs.close_grace()),
            self.metrics.close(self.config.metrics.close_grace()),
        );

        self.frames.clear();
        self.app_start.reset();
        self.foreground.reset();
        tracing::info!("Telemetry core closed");
    }
}
