//! Attribution of platform frame samples to open spans.
//!
//! Every span opened while frame tracking is enabled gets an aggregate of
//! total, slow and frozen frames. The platform delivers samples through one
//! global subscription, which is started with the first open span and
//! stopped when the last aggregate has been handed off.
//!
//! The platform only reports frames it actually rendered, so an idle screen
//! produces few samples. When a finished span saw at least one frame, the
//! part of its duration not covered by rendered frames is filled in at the
//! last known frame budget.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use vigil_config::FramesConfig;
use vigil_core::{FrameMetricsSource, SubscriptionId, Timestamp};

use crate::model::SpanId;

const ONE_SECOND_NANOS: f64 = 1_000_000_000.0;

/// Frame budget at 60 Hz, used until the platform reports a refresh rate.
const DEFAULT_FRAME_BUDGET_NANOS: u64 = 16_666_666;

/// One rendered frame as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub frame_end: Timestamp,
    pub duration_nanos: u64,
    pub delay_nanos: u64,
    pub refresh_rate: f32,
}

/// Frame counts collected for one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanFrameAggregate {
    pub span_id: SpanId,
    /// Rendered frames reported by the platform.
    pub frame_count: u64,
    /// Rendered frames plus the frames interpolated over unrendered time.
    pub total_frame_count: u64,
    /// Slow but not frozen frames.
    pub slow_frame_count: u64,
    pub frozen_frame_count: u64,
    /// Summed delay of slow and frozen frames.
    pub delay_nanos: u64,
    /// Summed duration of the rendered frames.
    pub rendered_nanos: u64,
}

impl SpanFrameAggregate {
    fn empty(span_id: SpanId) -> Self {
        Self {
            span_id,
            frame_count: 0,
            total_frame_count: 0,
            slow_frame_count: 0,
            frozen_frame_count: 0,
            delay_nanos: 0,
            rendered_nanos: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.delay_nanos)
    }
}

#[derive(Debug)]
struct OpenSpan {
    started_at: Timestamp,
    ended_at: Option<Timestamp>,
    /// Budget of the last frame attributed to this span.
    frame_budget_nanos: u64,
    aggregate: SpanFrameAggregate,
}

impl OpenSpan {
    fn covers(&self, at: Timestamp) -> bool {
        self.started_at <= at && self.ended_at.is_none_or(|end| at < end)
    }

    fn into_aggregate(self) -> SpanFrameAggregate {
        let mut aggregate = self.aggregate;
        aggregate.total_frame_count = aggregate.frame_count;
        if aggregate.frame_count == 0 || self.frame_budget_nanos == 0 {
            return aggregate;
        }
        let Some(ended_at) = self.ended_at else {
            return aggregate;
        };
        let span_nanos = ended_at.saturating_duration_since(self.started_at).as_nanos() as u64;
        let unrendered = span_nanos.saturating_sub(aggregate.rendered_nanos);
        aggregate.total_frame_count += unrendered / self.frame_budget_nanos;
        aggregate
    }
}

/// Attributes frame samples to whichever spans are open when they render.
pub struct SpanFrameCorrelator {
    spans: DashMap<SpanId, OpenSpan>,
    /// Guards subscription start/stop together with span insert/remove.
    subscription: Mutex<Option<SubscriptionId>>,
    source: Option<Arc<dyn FrameMetricsSource>>,
    slow_multiplier: f64,
    frozen_threshold_nanos: u64,
    last_budget_nanos: AtomicU64,
}

impl SpanFrameCorrelator {
    /// Without a `source` the correlator is disabled and every span yields `None`.
    pub fn new(source: Option<Arc<dyn FrameMetricsSource>>, config: &FramesConfig) -> Self {
        let source = if config.enabled { source } else { None };
        Self {
            spans: DashMap::new(),
            subscription: Mutex::new(None),
            source,
            slow_multiplier: config.slow_frame_multiplier,
            frozen_threshold_nanos: config.frozen_frame_threshold_ms.saturating_mul(1_000_000),
            last_budget_nanos: AtomicU64::new(DEFAULT_FRAME_BUDGET_NANOS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_collecting(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn open_span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn on_span_start(&self, span_id: impl Into<SpanId>, now: Timestamp) {
        let Some(source) = &self.source else {
            return;
        };
        let span_id = span_id.into();

        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            *subscription = source.start_collection();
            match &*subscription {
                Some(id) => tracing::debug!(subscription = %id, "Started frame collection"),
                None => {
                    tracing::debug!(span_id = %span_id, "Frame metrics unavailable, span not tracked");
                    return;
                }
            }
        }
        self.spans
            .entry(span_id.clone())
            .or_insert_with(|| OpenSpan {
                started_at: now,
                ended_at: None,
                frame_budget_nanos: 0,
                aggregate: SpanFrameAggregate::empty(span_id),
            });
    }

    /// Stop attributing samples rendered at or after `at` to the span.
    pub fn on_span_end(&self, span_id: &str, at: Timestamp) {
        if let Some(mut span) = self.spans.get_mut(span_id) {
            span.ended_at.get_or_insert(at);
        }
    }

    pub fn on_frame_sample(&self, sample: FrameSample) {
        let budget_nanos = if sample.refresh_rate.is_finite() && sample.refresh_rate > 0.0 {
            let budget = (ONE_SECOND_NANOS / f64::from(sample.refresh_rate)) as u64;
            self.last_budget_nanos.store(budget, Ordering::Relaxed);
            budget
        } else {
            self.last_budget_nanos.load(Ordering::Relaxed)
        };

        let is_frozen = sample.duration_nanos > self.frozen_threshold_nanos;
        let is_slow = !is_frozen && sample.duration_nanos as f64 > budget_nanos as f64 * self.slow_multiplier;

        for mut span in self.spans.iter_mut() {
            if !span.covers(sample.frame_end) {
                continue;
            }
            span.frame_budget_nanos = budget_nanos;
            let aggregate = &mut span.aggregate;
            aggregate.frame_count += 1;
            aggregate.rendered_nanos += sample.duration_nanos;
            if is_frozen {
                aggregate.frozen_frame_count += 1;
            } else if is_slow {
                aggregate.slow_frame_count += 1;
            }
            if is_frozen || is_slow {
                aggregate.delay_nanos += sample.delay_nanos;
            }
        }
    }

    /// Remove and return the span's aggregate; stops collection when none remain.
    pub fn on_span_finish(&self, span_id: &str) -> Option<SpanFrameAggregate> {
        let mut subscription = self.subscription.lock();
        let removed = self.spans.remove(span_id).map(|(_, span)| span.into_aggregate());
        if self.spans.is_empty() {
            self.stop_locked(&mut subscription);
        }
        removed
    }

    /// Drop all open spans and stop collecting.
    pub fn clear(&self) {
        let mut subscription = self.subscription.lock();
        self.spans.clear();
        self.stop_locked(&mut subscription);
    }

    fn stop_locked(&self, subscription: &mut Option<SubscriptionId>) {
        if let (Some(id), Some(source)) = (subscription.take(), &self.source) {
            source.stop_collection(&id);
            tracing::debug!(subscription = %id, "Stopped frame collection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSource {
        starts: AtomicU64,
        stops: AtomicU64,
        unavailable: bool,
    }

    impl FrameMetricsSource for FakeSource {
        fn start_collection(&self) -> Option<SubscriptionId> {
            if self.unavailable {
                return None;
            }
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            Some(SubscriptionId(format!("sub-{n}")))
        }

        fn stop_collection(&self, _id: &SubscriptionId) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn correlator(source: Arc<FakeSource>) -> SpanFrameCorrelator {
        SpanFrameCorrelator::new(Some(source), &FramesConfig::default())
    }

    fn sample(end_ms: u64, duration_ms: u64) -> FrameSample {
        FrameSample {
            frame_end: Timestamp::from_millis(end_ms),
            duration_nanos: duration_ms * 1_000_000,
            delay_nanos: duration_ms.saturating_sub(16) * 1_000_000,
            refresh_rate: 60.0,
        }
    }

    #[test]
    fn start_then_finish_yields_zero_counts() {
        let source = Arc::new(FakeSource::default());
        let frames = correlator(source);
        frames.on_span_start("a", Timestamp::ZERO);

        let aggregate = frames.on_span_finish("a").unwrap();
        assert_eq!(aggregate, SpanFrameAggregate::empty("a".into()));
    }

    #[test]
    fn sample_counts_for_every_open_span() {
        let source = Arc::new(FakeSource::default());
        let frames = correlator(source);
        frames.on_span_start("a", Timestamp::from_millis(0));
        frames.on_span_start("b", Timestamp::from_millis(5));

        frames.on_frame_sample(sample(10, 10));

        assert_eq!(frames.on_span_finish("a").unwrap().frame_count, 1);
        assert_eq!(frames.on_span_finish("b").unwrap().frame_count, 1);
    }

    #[test]
    fn samples_before_span_start_are_ignored() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("a", Timestamp::from_millis(0));
        frames.on_span_start("late", Timestamp::from_millis(50));

        frames.on_frame_sample(sample(20, 10));

        assert_eq!(frames.on_span_finish("a").unwrap().frame_count, 1);
        assert_eq!(frames.on_span_finish("late").unwrap().frame_count, 0);
    }

    #[test]
    fn slow_and_frozen_are_classified() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("a", Timestamp::ZERO);

        frames.on_frame_sample(sample(10, 10)); // normal
        frames.on_frame_sample(sample(50, 40)); // slow
        frames.on_frame_sample(sample(900, 800)); // frozen

        let aggregate = frames.on_span_finish("a").unwrap();
        assert_eq!(aggregate.frame_count, 3);
        assert_eq!(aggregate.slow_frame_count, 1);
        assert_eq!(aggregate.frozen_frame_count, 1);
        assert_eq!(aggregate.delay(), Duration::from_millis(24 + 784));
    }

    #[test]
    fn unknown_refresh_rate_uses_last_budget() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("a", Timestamp::ZERO);

        // 120 Hz budget is ~8.3ms, so 10ms is slow
        frames.on_frame_sample(FrameSample { refresh_rate: 120.0, ..sample(10, 10) });
        frames.on_frame_sample(FrameSample { refresh_rate: 0.0, ..sample(20, 10) });
        frames.on_frame_sample(FrameSample { refresh_rate: f32::NAN, ..sample(30, 10) });

        assert_eq!(frames.on_span_finish("a").unwrap().slow_frame_count, 3);
    }

    #[test]
    fn ended_span_stops_counting() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("a", Timestamp::ZERO);
        frames.on_frame_sample(sample(10, 10));
        frames.on_span_end("a", Timestamp::from_millis(15));
        frames.on_frame_sample(sample(20, 10));

        assert_eq!(frames.on_span_finish("a").unwrap().frame_count, 1);
    }

    #[test]
    fn unrendered_time_is_filled_at_the_last_budget() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("idle", Timestamp::ZERO);
        frames.on_frame_sample(sample(100, 10));
        frames.on_span_end("idle", Timestamp::from_millis(1_000));

        let aggregate = frames.on_span_finish("idle").unwrap();
        assert_eq!(aggregate.frame_count, 1);
        assert_eq!(aggregate.rendered_nanos, 10_000_000);
        // (1000ms - 10ms) / 16.666666ms
        assert_eq!(aggregate.total_frame_count, 1 + 59);
    }

    #[test]
    fn interpolation_needs_a_rendered_frame_and_an_end() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("empty", Timestamp::ZERO);
        frames.on_span_end("empty", Timestamp::from_millis(1_000));
        assert_eq!(frames.on_span_finish("empty").unwrap().total_frame_count, 0);

        frames.on_span_start("open", Timestamp::ZERO);
        frames.on_frame_sample(sample(100, 10));
        assert_eq!(frames.on_span_finish("open").unwrap().total_frame_count, 1);
    }

    #[test]
    fn fully_rendered_span_adds_nothing() {
        let frames = correlator(Arc::new(FakeSource::default()));
        frames.on_span_start("busy", Timestamp::ZERO);
        frames.on_frame_sample(sample(40, 40));
        frames.on_frame_sample(sample(80, 40));
        frames.on_span_end("busy", Timestamp::from_millis(80));

        let aggregate = frames.on_span_finish("busy").unwrap();
        assert_eq!(aggregate.total_frame_count, 2);
    }

    #[test]
    fn subscription_is_shared_and_stopped_at_zero() {
        let source = Arc::new(FakeSource::default());
        let frames = correlator(source.clone());

        frames.on_span_start("a", Timestamp::ZERO);
        frames.on_span_start("b", Timestamp::ZERO);
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert!(frames.is_collecting());

        frames.on_span_finish("a");
        assert!(frames.is_collecting());
        frames.on_span_finish("b");
        assert!(!frames.is_collecting());
        assert_eq!(source.stops.load(Ordering::SeqCst), 1);

        frames.on_span_start("c", Timestamp::ZERO);
        assert_eq!(source.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_span_finish_is_absent() {
        let frames = correlator(Arc::new(FakeSource::default()));
        assert!(frames.on_span_finish("never-started").is_none());
    }

    #[test]
    fn missing_source_disables_tracking() {
        let frames = SpanFrameCorrelator::new(None, &FramesConfig::default());
        frames.on_span_start("a", Timestamp::ZERO);
        frames.on_frame_sample(sample(10, 10));
        assert!(!frames.is_enabled());
        assert!(frames.on_span_finish("a").is_none());

        let unavailable = Arc::new(FakeSource {
            unavailable: true,
            ..Default::default()
        });
        let frames = correlator(unavailable);
        frames.on_span_start("a", Timestamp::ZERO);
        assert!(frames.on_span_finish("a").is_none());
    }

    #[test]
    fn concurrent_spans_and_samples() {
        let source = Arc::new(FakeSource::default());
        let frames = Arc::new(correlator(source.clone()));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let frames = frames.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("span-{worker}-{i}");
                        frames.on_span_start(id.clone(), Timestamp::ZERO);
                        frames.on_frame_sample(sample(1, 5));
                        assert!(frames.on_span_finish(&id).unwrap().frame_count >= 1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(frames.open_span_count(), 0);
        assert!(!frames.is_collecting());
        assert_eq!(
            source.starts.load(Ordering::SeqCst),
            source.stops.load(Ordering::SeqCst)
        );
    }
}
