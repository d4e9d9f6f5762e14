//! Session tracking, frame attribution, app start timing and telemetry
//! batching for Vigil.
//!
//! The components here sit between platform lifecycle callbacks and the
//! delivery client: they turn foreground/background transitions into
//! session boundaries, attach frame and app start measurements to finished
//! traces, and buffer logs and metrics until they can be flushed. [`Sdk`]
//! wires them together.

pub mod app_start;
pub mod batch;
pub mod enrichment;
pub mod executor;
pub mod frames;
pub mod model;
pub mod sdk;
pub mod session;

pub use app_start::{AppStartClock, AppStartInterval};
pub use batch::{FlushOutcome, TelemetryBatchCoordinator};
pub use enrichment::{PerformanceEnrichmentProcessor, TraceProcessor};
pub use executor::FlushExecutor;
pub use frames::{FrameSample, SpanFrameAggregate, SpanFrameCorrelator};
pub use model::{
    LogLevel, LogRecord, Measurement, MeasurementUnit, MetricPoint, MetricType, Span, SpanId,
    TelemetryRecord, Trace,
};
pub use sdk::Sdk;
pub use session::{SessionLifecycleTracker, SessionPhase};

use vigil_core::{DeliveryError, ExecutorError, RecordKind};

/// Errors from the telemetry subsystem.
///
/// These never cross the lifecycle entry points; they are logged where they
/// occur.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("{kind} flush exceeded its {deadline_ms}ms deadline")]
    DeadlineExceeded { kind: RecordKind, deadline_ms: u64 },
}
