//! Foreground/background state and its observer registry.
//!
//! Reads are lock-free (a single atomic); transitions and registry changes go
//! through one mutex. Listeners are notified outside the lock, over a snapshot
//! of the registry, so a listener may subscribe or unsubscribe re-entrantly.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

use crate::event::{EventBus, LifecycleEvent};
use crate::time::Timestamp;

/// Whether the host application is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Unknown,
    Foreground,
    Background,
}

impl AppState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Foreground => 1,
            Self::Background => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Foreground,
            2 => Self::Background,
            _ => Self::Unknown,
        }
    }
}

/// Something that reacts to foreground/background transitions.
///
/// Called on the platform UI thread: implementations must only do cheap state
/// mutation or hand work off to a background context.
pub trait AppStateListener: Send + Sync {
    fn on_foreground(&self, now: Timestamp);
    fn on_background(&self, now: Timestamp);
}

/// Registration handle returned by [`ForegroundState::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// The app's foreground state plus everyone who wants to hear about changes.
pub struct ForegroundState {
    state: AtomicU8,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn AppStateListener>)>>,
    events: Option<Arc<EventBus>>,
}

impl ForegroundState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(AppState::Unknown.to_u8()),
            listeners: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// Also publish every transition on the given bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state, without taking the lock.
    pub fn current(&self) -> AppState {
        AppState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_in_background(&self) -> bool {
        self.current() == AppState::Background
    }

    pub fn move_to_foreground(&self, now: Timestamp) {
        if let Some(listeners) = self.transition(AppState::Foreground) {
            for listener in listeners {
                listener.on_foreground(now);
            }
        }
    }

    pub fn move_to_background(&self, now: Timestamp) {
        if let Some(listeners) = self.transition(AppState::Background) {
            for listener in listeners {
                listener.on_background(now);
            }
        }
    }

    /// Store the new state and snapshot the registry, or `None` if nothing changed.
    fn transition(&self, to: AppState) -> Option<Vec<Arc<dyn AppStateListener>>> {
        let listeners = self.listeners.lock();
        let from = AppState::from_u8(self.state.swap(to.to_u8(), Ordering::AcqRel));
        if from == to {
            return None;
        }
        tracing::debug!(?from, ?to, "App state transition");
        let snapshot = listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        drop(listeners);

        if let Some(events) = &self.events {
            events.publish(LifecycleEvent::ForegroundChanged {
                state: to,
                timestamp: Utc::now(),
            });
        }
        Some(snapshot)
    }

    pub fn subscribe(&self, listener: Arc<dyn AppStateListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() < before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Back to `Unknown` with an empty registry.
    pub fn reset(&self) {
        let mut listeners = self.listeners.lock();
        listeners.clear();
        self.state.store(AppState::Unknown.to_u8(), Ordering::Release);
    }
}

impl Default for ForegroundState {
    fn default() -> Self {
        Self::new()
    }
}
