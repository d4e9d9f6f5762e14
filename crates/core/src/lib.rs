//! # Vigil Core
//!
//! Domain types, collaborator traits, and error definitions for the Vigil
//! client-side telemetry core. This crate holds no scheduling logic of its
//! own. It defines the boundary that the telemetry crate and the host
//! platform bridge implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`DeliveryClient`] receives session start/end calls and flushed batches
//! - [`FrameMetricsSource`] is the platform's single global frame callback channel
//! - [`AppStateListener`] observes foreground/background transitions
//!
//! Process-wide state (foreground flag, current screen) is modelled as owned
//! service instances instead of statics, so tests can build independent copies.

pub mod delivery;
pub mod error;
pub mod event;
pub mod foreground;
pub mod frames;
pub mod screen;
pub mod time;

// Re-export key types at crate root for ergonomics
pub use delivery::{DeliveryClient, Envelope, RecordKind};
pub use error::{DeliveryError, Error, ExecutorError, Result};
pub use event::{EventBus, LifecycleEvent};
pub use foreground::{AppState, AppStateListener, ForegroundState, ListenerId};
pub use frames::{FrameMetricsSource, SubscriptionId};
pub use screen::CurrentScreen;
pub use time::Timestamp;
