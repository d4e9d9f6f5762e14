//! Delivery client trait: the boundary towards envelope serialization and
//! network transport.
//!
//! Session calls are synchronous and cheap (they are made from lifecycle
//! callbacks); batch delivery is async and only ever driven from a
//! background flush executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// The kind of telemetry a batch carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Log,
    Metric,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Log => write!(f, "log"),
            Self::Metric => write!(f, "metric"),
        }
    }
}

/// A serialized snapshot of buffered records, ready for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// What kind of records the payload holds.
    pub kind: RecordKind,
    /// Number of records in the payload.
    pub item_count: usize,
    /// JSON array of the records, in append order.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Decode the payload back into JSON values (used by tests and tooling).
    pub fn items(&self) -> Result<Vec<serde_json::Value>, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// The transport-facing client the core reports to.
///
/// Session calls arrive while the session tracker holds its lock, so they
/// must return promptly and must not call back into the tracker.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Open a new session. Implementations end any session still open.
    fn start_session(&self) -> Result<(), DeliveryError>;

    /// Close the current session.
    fn end_session(&self) -> Result<(), DeliveryError>;

    /// Hand a flushed batch to the transport.
    async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError>;
}
