//! Debounced session tracking from foreground/background transitions.
//!
//! A session starts on the first foreground and whenever the app returns
//! after at least one session interval. Going to the background schedules a
//! session end one interval later; coming back before it fires cancels it,
//! so rotation and quick app switches collapse into one session.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use vigil_core::{AppStateListener, DeliveryClient, EventBus, LifecycleEvent, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No foreground seen yet.
    Idle,
    /// A session is open and the app is in the foreground.
    Active,
    /// The app is in the background and the end timer is armed.
    PendingEnd,
    /// The end timer fired.
    Ended,
}

struct PendingEnd {
    generation: u64,
    timer: JoinHandle<()>,
}

struct SessionState {
    phase: SessionPhase,
    last_started_at: Option<Timestamp>,
    pending_end: Option<PendingEnd>,
    generation: u64,
}

struct Inner {
    state: Mutex<SessionState>,
    interval: Duration,
    delivery: Arc<dyn DeliveryClient>,
    events: Arc<EventBus>,
}

impl Inner {
    /// Timer callback; a no-op if the timer was cancelled or replaced meanwhile.
    fn fire_end(&self, generation: u64) {
        let mut state = self.state.lock();
        match &state.pending_end {
            Some(pending) if pending.generation == generation => {}
            _ => return,
        }
        state.pending_end = None;
        state.phase = SessionPhase::Ended;
        self.emit_end();
    }

    // Session calls are made under the state lock so they reach the client
    // in the same order as the phase changes.

    fn emit_start(&self, now: Timestamp) {
        match self.delivery.start_session() {
            Ok(()) => tracing::info!(%now, "Session started"),
            Err(e) => tracing::error!(error = %e, "Failed to start session"),
        }
        self.events.publish(LifecycleEvent::SessionStarted {
            timestamp: Utc::now(),
        });
    }

    fn emit_end(&self) {
        match self.delivery.end_session() {
            Ok(()) => tracing::info!("Session ended"),
            Err(e) => tracing::error!(error = %e, "Failed to end session"),
        }
        self.events.publish(LifecycleEvent::SessionEnded {
            timestamp: Utc::now(),
        });
    }
}

/// Turns foreground/background transitions into session start/end calls.
pub struct SessionLifecycleTracker {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl SessionLifecycleTracker {
    /// End timers are spawned on `runtime`; transitions may arrive from any thread.
    pub fn new(
        interval: Duration,
        delivery: Arc<dyn DeliveryClient>,
        events: Arc<EventBus>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Idle,
                    last_started_at: None,
                    pending_end: None,
                    generation: 0,
                }),
                interval,
                delivery,
                events,
            }),
            runtime,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn last_started_at(&self) -> Option<Timestamp> {
        self.inner.state.lock().last_started_at
    }

    pub fn has_pending_end(&self) -> bool {
        self.inner.state.lock().pending_end.is_some()
    }

    pub fn on_foreground(&self, now: Timestamp) {
        let mut state = self.inner.state.lock();
        if let Some(pending) = state.pending_end.take() {
            pending.timer.abort();
            tracing::debug!(%now, "Cancelled pending session end");
        }

        let gap_elapsed = state
            .last_started_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.inner.interval);
        let start = gap_elapsed || state.phase == SessionPhase::Ended;
        state.last_started_at = Some(now);
        state.phase = SessionPhase::Active;

        if start {
            self.inner.emit_start(now);
        }
    }

    pub fn on_background(&self, now: Timestamp) {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, SessionPhase::Idle | SessionPhase::Ended) {
            tracing::debug!(%now, phase = ?state.phase, "No open session to end");
            return;
        }
        if let Some(previous) = state.pending_end.take() {
            previous.timer.abort();
        }

        state.generation += 1;
        let generation = state.generation;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.interval;
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire_end(generation);
            }
        });

        state.pending_end = Some(PendingEnd { generation, timer });
        state.phase = SessionPhase::PendingEnd;
        tracing::debug!(%now, interval_ms = interval.as_millis() as u64, "Scheduled session end");
    }

    /// Cancel any pending end without emitting it.
    pub fn shutdown(&self) {
        if let Some(pending) = self.inner.state.lock().pending_end.take() {
            pending.timer.abort();
        }
    }
}

impl AppStateListener for SessionLifecycleTracker {
    fn on_foreground(&self, now: Timestamp) {
        SessionLifecycleTracker::on_foreground(self, now);
    }

    fn on_background(&self, now: Timestamp) {
        SessionLifecycleTracker::on_background(self, now);
    }
}
