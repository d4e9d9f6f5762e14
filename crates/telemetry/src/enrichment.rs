//! Trace-finish hook that stamps app start and frame measurements.

use std::sync::Arc;

use crate::app_start::AppStartClock;
use crate::frames::{SpanFrameAggregate, SpanFrameCorrelator};
use crate::model::{Measurement, Span, Trace};

pub const MEASUREMENT_APP_START_COLD: &str = "app_start_cold";
pub const MEASUREMENT_APP_START_WARM: &str = "app_start_warm";
pub const MEASUREMENT_FRAMES_TOTAL: &str = "frames_total";
pub const MEASUREMENT_FRAMES_SLOW: &str = "frames_slow";
pub const MEASUREMENT_FRAMES_FROZEN: &str = "frames_frozen";
pub const MEASUREMENT_FRAMES_DELAY: &str = "frames_delay";

/// Something that may rewrite a finished trace before it leaves the core.
pub trait TraceProcessor: Send + Sync {
    fn process(&self, trace: Trace) -> Trace;
}

/// Consumes pending app start and frame data and attaches it to traces.
///
/// Safe to run for several traces at once on different threads: the clock
/// and the correlator are the only shared state, and both hand each datum
/// out exactly once.
pub struct PerformanceEnrichmentProcessor {
    app_start: Arc<AppStartClock>,
    frames: Arc<SpanFrameCorrelator>,
}

impl PerformanceEnrichmentProcessor {
    pub fn new(app_start: Arc<AppStartClock>, frames: Arc<SpanFrameCorrelator>) -> Self {
        Self { app_start, frames }
    }

    fn attach_app_start(&self, trace: &mut Trace) {
        if !trace.has_app_start_span() {
            return;
        }
        let Some(interval) = self.app_start.take_interval() else {
            return;
        };
        let name = if interval.is_cold {
            MEASUREMENT_APP_START_COLD
        } else {
            MEASUREMENT_APP_START_WARM
        };
        tracing::debug!(trace_id = %trace.id, measurement = name, "Attached app start");
        trace.set_measurement(name, Measurement::millis(interval.duration));
    }
}

fn attach_frames(span: &mut Span, aggregate: &SpanFrameAggregate) {
    for (name, measurement) in frame_measurements(aggregate) {
        span.set_measurement(name, measurement);
    }
}

fn frame_measurements(aggregate: &SpanFrameAggregate) -> [(&'static str, Measurement); 4] {
    [
        (MEASUREMENT_FRAMES_TOTAL, Measurement::count(aggregate.total_frame_count)),
        (MEASUREMENT_FRAMES_SLOW, Measurement::count(aggregate.slow_frame_count)),
        (MEASUREMENT_FRAMES_FROZEN, Measurement::count(aggregate.frozen_frame_count)),
        (MEASUREMENT_FRAMES_DELAY, Measurement::seconds(aggregate.delay().as_secs_f64())),
    ]
}

impl TraceProcessor for PerformanceEnrichmentProcessor {
    fn process(&self, mut trace: Trace) -> Trace {
        self.attach_app_start(&mut trace);

        let mut root_frames = None;
        for span in &mut trace.spans {
            let Some(aggregate) = self.frames.on_span_finish(&span.id) else {
                continue;
            };
            attach_frames(span, &aggregate);
            if span.parent_id.is_none() {
                root_frames = Some(aggregate);
            }
        }
        if let Some(aggregate) = root_frames {
            for (name, measurement) in frame_measurements(&aggregate) {
                trace.set_measurement(name, measurement);
            }
        }

        trace
    }
}
