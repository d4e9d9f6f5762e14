//! Lifecycle event bus: breadcrumbs for the host application.
//!
//! Events are published when the core starts or ends a session, flushes or
//! drops telemetry, or observes a foreground transition. Hosts subscribe to
//! turn them into breadcrumbs or debug output without coupling to the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::delivery::RecordKind;
use crate::foreground::AppState;

/// All lifecycle events emitted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The app moved between foreground and background.
    ForegroundChanged {
        state: AppState,
        timestamp: DateTime<Utc>,
    },

    /// A session start was sent to the delivery client.
    SessionStarted { timestamp: DateTime<Utc> },

    /// A session end was sent to the delivery client.
    SessionEnded { timestamp: DateTime<Utc> },

    /// A batch of buffered records was handed to the delivery client.
    BatchFlushed {
        kind: RecordKind,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Records were discarded because a buffer was full.
    RecordsDropped {
        kind: RecordKind,
        count: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for lifecycle events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose old events; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<LifecycleEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LifecycleEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
