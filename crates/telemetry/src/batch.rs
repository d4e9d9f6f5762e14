//! Buffering and flushing of outgoing telemetry records.
//!
//! One coordinator per record kind. Records are flushed when the buffer
//! reaches capacity, on a fixed interval, and when the app goes to the
//! background. At most one flush runs at a time per coordinator, and flush
//! work always runs on the coordinator's own background executor.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use vigil_config::BatchConfig;
use vigil_core::{
    AppStateListener, DeliveryClient, Envelope, EventBus, ForegroundState, LifecycleEvent,
    ListenerId, Timestamp,
};

use crate::TelemetryError;
use crate::executor::FlushExecutor;
use crate::model::TelemetryRecord;

/// How often `close` re-checks while another flush is still running.
const CLOSE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// What a single flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was already in flight.
    Skipped,
    /// Nothing was buffered.
    Empty,
    /// This many records were handed to the delivery client.
    Delivered(usize),
    /// Delivery failed or missed its deadline; records stay buffered.
    Failed,
}

struct Sequenced<R> {
    seq: u64,
    record: R,
}

struct Buffer<R> {
    records: VecDeque<Sequenced<R>>,
    next_seq: u64,
    flush_pending: bool,
    flush_in_flight: bool,
    /// Last sequence number in the snapshot of the running flush.
    in_flight_through: Option<u64>,
    dropped: u64,
}

impl<R> Buffer<R> {
    /// Number of leading records already handed to the running flush.
    fn in_flight_len(&self) -> usize {
        match self.in_flight_through {
            Some(through) => self.records.partition_point(|r| r.seq <= through),
            None => 0,
        }
    }
}

struct Shared<R: TelemetryRecord> {
    buffer: Mutex<Buffer<R>>,
    config: BatchConfig,
    delivery: Arc<dyn DeliveryClient>,
    events: Arc<EventBus>,
    executor: FlushExecutor,
}

/// Clears the in-flight flag however the flush future ends, including being dropped.
struct InFlight<'a, R: TelemetryRecord>(&'a Shared<R>);

impl<R: TelemetryRecord> Drop for InFlight<'_, R> {
    fn drop(&mut self) {
        let mut buffer = self.0.buffer.lock();
        buffer.flush_in_flight = false;
        buffer.in_flight_through = None;
    }
}

impl<R: TelemetryRecord> Shared<R> {
    async fn flush(&self, deadline: Duration) -> FlushOutcome {
        let (payload, count, last_seq) = {
            let mut buffer = self.buffer.lock();
            buffer.flush_pending = false;
            if buffer.flush_in_flight {
                return FlushOutcome::Skipped;
            }
            let Some(last) = buffer.records.back() else {
                return FlushOutcome::Empty;
            };
            let last_seq = last.seq;
            let items: Vec<&R> = buffer.records.iter().map(|s| &s.record).collect();
            let payload = serde_json::to_vec(&items);
            let count = items.len();
            buffer.flush_in_flight = true;
            buffer.in_flight_through = Some(last_seq);
            (payload, count, last_seq)
        };
        let _in_flight = InFlight(self);

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                let e = TelemetryError::from(e);
                tracing::error!(kind = %R::KIND, count, error = %e, "Discarding unserializable batch");
                self.discard_through(last_seq, count as u64);
                return FlushOutcome::Failed;
            }
        };

        let envelope = Envelope {
            kind: R::KIND,
            item_count: count,
            payload,
        };
        match self.deliver(envelope, deadline).await {
            Ok(()) => {
                let mut buffer = self.buffer.lock();
                while buffer.records.front().is_some_and(|r| r.seq <= last_seq) {
                    buffer.records.pop_front();
                }
                drop(buffer);

                tracing::debug!(kind = %R::KIND, count, "Flushed batch");
                self.events.publish(LifecycleEvent::BatchFlushed {
                    kind: R::KIND,
                    count,
                    timestamp: Utc::now(),
                });
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                tracing::warn!(kind = %R::KIND, count, error = %e, "Flush failed, keeping records");
                FlushOutcome::Failed
            }
        }
    }

    async fn deliver(&self, envelope: Envelope, deadline: Duration) -> Result<(), TelemetryError> {
        match tokio::time::timeout(deadline, self.delivery.deliver(envelope)).await {
            Ok(result) => result.map_err(TelemetryError::from),
            Err(_) => Err(TelemetryError::DeadlineExceeded {
                kind: R::KIND,
                deadline_ms: deadline.as_millis() as u64,
            }),
        }
    }

    fn discard_through(&self, last_seq: u64, count: u64) {
        let mut buffer = self.buffer.lock();
        while buffer.records.front().is_some_and(|r| r.seq <= last_seq) {
            buffer.records.pop_front();
        }
        buffer.dropped += count;
    }

    /// Queue a flush on the executor unless one is already queued or running.
    fn schedule_flush(self: &Arc<Self>, deadline: Duration, reason: &'static str) -> bool {
        {
            let mut buffer = self.buffer.lock();
            if buffer.flush_pending || buffer.flush_in_flight {
                return false;
            }
            buffer.flush_pending = true;
        }

        let shared = Arc::clone(self);
        let submitted = self.executor.submit(async move {
            shared.flush(deadline).await;
        });
        match submitted {
            Ok(()) => {
                tracing::trace!(kind = %R::KIND, reason, "Flush scheduled");
                true
            }
            Err(e) => {
                self.buffer.lock().flush_pending = false;
                let e = TelemetryError::from(e);
                tracing::error!(kind = %R::KIND, reason, error = %e, "Failed to submit flush");
                false
            }
        }
    }
}

/// Foreground registry hook: backgrounding submits a short-deadline flush.
struct BackgroundFlush<R: TelemetryRecord>(Weak<Shared<R>>);

impl<R: TelemetryRecord> AppStateListener for BackgroundFlush<R> {
    fn on_foreground(&self, _now: Timestamp) {}

    fn on_background(&self, _now: Timestamp) {
        if let Some(shared) = self.0.upgrade() {
            let deadline = shared.config.background_flush_timeout();
            shared.schedule_flush(deadline, "background");
        }
    }
}

/// Buffers records of one kind and flushes them to the delivery client.
pub struct TelemetryBatchCoordinator<R: TelemetryRecord> {
    shared: Option<Arc<Shared<R>>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    registration: Mutex<Option<(Arc<ForegroundState>, ListenerId)>>,
    closed: AtomicBool,
}

impl<R: TelemetryRecord> TelemetryBatchCoordinator<R> {
    /// Build the coordinator and start its executor and periodic flush on `runtime`.
    ///
    /// A disabled config yields a coordinator that silently drops every record.
    pub fn new(
        config: BatchConfig,
        delivery: Arc<dyn DeliveryClient>,
        events: Arc<EventBus>,
        runtime: &Handle,
    ) -> Self {
        if !config.enabled {
            tracing::debug!(kind = %R::KIND, "Telemetry kind disabled");
            return Self {
                shared: None,
                periodic: Mutex::new(None),
                registration: Mutex::new(None),
                closed: AtomicBool::new(false),
            };
        }

        let executor = FlushExecutor::spawn(
            format!("{}-flush", R::KIND),
            config.executor_queue_capacity,
            runtime,
        );
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer {
                records: VecDeque::with_capacity(config.max_batch_size),
                next_seq: 0,
                flush_pending: false,
                flush_in_flight: false,
                in_flight_through: None,
                dropped: 0,
            }),
            config,
            delivery,
            events,
            executor,
        });

        let periodic = runtime.spawn(periodic_flush(Arc::downgrade(&shared)));

        Self {
            shared: Some(shared),
            periodic: Mutex::new(Some(periodic)),
            registration: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    /// Flush whenever the app moves to the background.
    pub fn register(&self, foreground: &Arc<ForegroundState>) {
        let Some(shared) = &self.shared else {
            return;
        };
        let id = foreground.subscribe(Arc::new(BackgroundFlush(Arc::downgrade(shared))));
        if let Some((previous, old_id)) = self.registration.lock().replace((Arc::clone(foreground), id)) {
            previous.unsubscribe(old_id);
        }
    }

    pub fn append(&self, record: R) {
        let Some(shared) = &self.shared else {
            return;
        };
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(kind = %R::KIND, "Coordinator closed, record ignored");
            return;
        }

        let max_size = shared.config.max_batch_size;
        let (full, dropped_now) = {
            let mut buffer = shared.buffer.lock();
            let seq = buffer.next_seq;
            buffer.next_seq += 1;
            buffer.records.push_back(Sequenced { seq, record });

            // Records in the running flush's snapshot are not counted or dropped.
            let in_flight = buffer.in_flight_len();
            let mut dropped_now = 0u64;
            while buffer.records.len() - in_flight > max_size {
                buffer.records.remove(in_flight);
                dropped_now += 1;
            }
            buffer.dropped += dropped_now;
            (buffer.records.len() - in_flight >= max_size, dropped_now)
        };

        if dropped_now > 0 {
            tracing::warn!(kind = %R::KIND, dropped = dropped_now, "Buffer full, dropped oldest records");
            shared.events.publish(LifecycleEvent::RecordsDropped {
                kind: R::KIND,
                count: dropped_now,
                timestamp: Utc::now(),
            });
        }
        if full {
            shared.schedule_flush(shared.config.flush_timeout(), "size");
        }
    }

    /// Submit a short-deadline flush to the background executor.
    ///
    /// Returns whether a new flush task was submitted.
    pub fn on_background(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match &self.shared {
            Some(shared) => {
                shared.schedule_flush(shared.config.background_flush_timeout(), "background")
            }
            None => false,
        }
    }

    /// Flush now on the calling task.
    pub async fn flush(&self, deadline: Duration) -> FlushOutcome {
        match &self.shared {
            Some(shared) => shared.flush(deadline).await,
            None => FlushOutcome::Empty,
        }
    }

    /// Final flush bounded by `grace`, then release the executor and unsubscribe.
    pub async fn close(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((foreground, id)) = self.registration.lock().take() {
            foreground.unsubscribe(id);
        }
        if let Some(periodic) = self.periodic.lock().take() {
            periodic.abort();
        }
        let Some(shared) = &self.shared else {
            return;
        };

        let deadline = shared.config.flush_timeout().min(grace);
        let final_flush = async {
            loop {
                match shared.flush(deadline).await {
                    FlushOutcome::Skipped => tokio::time::sleep(CLOSE_RETRY_INTERVAL).await,
                    outcome => break outcome,
                }
            }
        };
        match tokio::time::timeout(grace, final_flush).await {
            Ok(outcome) => tracing::debug!(kind = %R::KIND, ?outcome, "Final flush done"),
            Err(_) => tracing::warn!(
                kind = %R::KIND,
                pending = self.len(),
                "Close grace period elapsed, abandoning buffered records"
            ),
        }
        shared.executor.shutdown();
    }

    pub fn len(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |s| s.buffer.lock().records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.as_ref().map_or(0, |s| s.buffer.lock().dropped)
    }

    pub fn is_flush_in_flight(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.buffer.lock().flush_in_flight)
    }
}

async fn periodic_flush<R: TelemetryRecord>(shared: Weak<Shared<R>>) {
    let period = match shared.upgrade() {
        Some(s) => s.config.flush_interval(),
        None => return,
    };
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let deadline = shared.config.flush_timeout();
        shared.schedule_flush(deadline, "interval");
    }
}
