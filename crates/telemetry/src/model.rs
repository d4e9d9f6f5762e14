//! Data model for traces, spans, measurements, and batched telemetry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;
use vigil_core::{RecordKind, Timestamp};

/// Span identifier, unique within the process.
pub type SpanId = String;

/// Operation name of the span that marks a cold app start.
pub const OP_APP_START_COLD: &str = "app.start.cold";
/// Operation name of the span that marks a warm app start.
pub const OP_APP_START_WARM: &str = "app.start.warm";

// ── Measurements ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    Millisecond,
    Second,
    /// A plain count.
    None,
}

/// A named numeric value attached to a span or a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: MeasurementUnit,
}

impl Measurement {
    pub fn count(value: u64) -> Self {
        Self {
            value: value as f64,
            unit: MeasurementUnit::None,
        }
    }

    pub fn millis(duration: Duration) -> Self {
        Self {
            value: duration.as_secs_f64() * 1_000.0,
            unit: MeasurementUnit::Millisecond,
        }
    }

    pub fn seconds(value: f64) -> Self {
        Self {
            value,
            unit: MeasurementUnit::Second,
        }
    }
}

// ── Span ──────────────────────────────────────────────────────────────────

/// A single timed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: SpanId,
    /// Parent span id (None for the trace's root span).
    pub parent_id: Option<SpanId>,
    /// Operation, e.g. `ui.load` or `app.start.cold`.
    pub op: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic start time.
    pub started_at: Timestamp,
    /// Monotonic end time (None if still running).
    pub ended_at: Option<Timestamp>,
    /// Named measurements attached during processing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, Measurement>,
}

impl Span {
    /// Create a new span for `op`, started at `started_at`.
    pub fn new(op: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            parent_id: None,
            op: op.into(),
            description: None,
            started_at,
            ended_at: None,
            measurements: BTreeMap::new(),
        }
    }

    /// Set the parent span.
    pub fn with_parent(mut self, parent_id: impl Into<SpanId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn end(&mut self, at: Timestamp) {
        self.ended_at = Some(at);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|end| end.checked_duration_since(self.started_at))
    }

    pub fn set_measurement(&mut self, name: impl Into<String>, measurement: Measurement) {
        self.measurements.insert(name.into(), measurement);
    }

    pub fn is_app_start(&self) -> bool {
        self.op == OP_APP_START_COLD || self.op == OP_APP_START_WARM
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// A finished trace on its way out of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id.
    pub id: String,
    /// Transaction name.
    pub name: String,
    /// All spans; the root span has no parent.
    pub spans: Vec<Span>,
    /// Trace-level measurements.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, Measurement>,
}

impl Trace {
    pub fn new(name: impl Into<String>, root: Span) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            name: name.into(),
            spans: vec![root],
            measurements: BTreeMap::new(),
        }
    }

    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.parent_id.is_none())
    }

    pub fn has_app_start_span(&self) -> bool {
        self.spans.iter().any(Span::is_app_start)
    }

    pub fn set_measurement(&mut self, name: impl Into<String>, measurement: Measurement) {
        self.measurements.insert(name.into(), measurement);
    }
}

// ── Batched records ───────────────────────────────────────────────────────

/// Anything a batch coordinator can buffer and flush.
pub trait TelemetryRecord: Serialize + Send + Sync + 'static {
    const KIND: RecordKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// A structured log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub body: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    pub fn new(level: LogLevel, body: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            body: body.into(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl TelemetryRecord for LogRecord {
    const KIND: RecordKind = RecordKind::Log;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Distribution,
}

/// A single metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            metric_type,
            value,
            unit: None,
        }
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricType::Counter, value)
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

impl TelemetryRecord for MetricPoint {
    const KIND: RecordKind = RecordKind::Metric;
}
