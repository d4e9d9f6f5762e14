//! Frame metrics source: the platform's single global frame callback channel.
//!
//! The platform exposes one subscription for the whole process, not one per
//! span. The bridge that owns the subscription forwards every sample to the
//! span frame correlator.

use serde::{Deserialize, Serialize};

/// Handle returned by the platform when a frame subscription starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Starts and stops delivery of platform frame samples.
pub trait FrameMetricsSource: Send + Sync {
    /// Begin delivering samples. `None` if the platform cannot provide them.
    fn start_collection(&self) -> Option<SubscriptionId>;

    /// Stop a subscription previously returned by `start_collection`.
    fn stop_collection(&self, id: &SubscriptionId);
}
