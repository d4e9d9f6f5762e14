//! `vigil replay`: drive a scripted lifecycle scenario through the core.
//!
//! Scenarios are TOML files with an optional `[config]` table and a list of
//! `[[event]]` entries, each with an `at_ms` offset and a `type`. Time runs
//! on a paused tokio clock, so session timers and periodic flushes fire at
//! their virtual deadlines without the replay actually waiting.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vigil_config::SdkConfig;
use vigil_core::{
    CurrentScreen, DeliveryClient, DeliveryError, Envelope, FrameMetricsSource, SubscriptionId,
    Timestamp,
};
use vigil_telemetry::{
    FrameSample, LogLevel, LogRecord, MetricPoint, Sdk, SessionPhase, Span, Trace,
};

fn default_true() -> bool {
    true
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: SdkConfig,

    /// Whether the simulated platform offers frame metrics.
    #[serde(default = "default_true")]
    pub frame_metrics: bool,

    /// Keep the clock running this long after the last event.
    #[serde(default)]
    pub settle_ms: u64,

    #[serde(default, rename = "event")]
    pub events: Vec<ScenarioEvent>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Foreground,
    Background,
    AppStart {
        #[serde(default = "default_true")]
        cold: bool,
    },
    FirstFrame,
    Screen {
        name: String,
    },
    ScreenDestroyed {
        name: String,
    },
    SpanStart {
        id: String,
        op: String,
        #[serde(default)]
        parent: Option<String>,
    },
    SpanEnd {
        id: String,
    },
    Frame {
        duration_ms: u64,
        #[serde(default)]
        refresh_rate: Option<f32>,
    },
    FinishTrace {
        root: String,
        /// Defaults to the current screen's name.
        #[serde(default)]
        name: Option<String>,
    },
    Log {
        #[serde(default = "default_level")]
        level: LogLevel,
        body: String,
    },
    Metric {
        name: String,
        value: f64,
    },
}

impl Scenario {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let scenario: Self = toml::from_str(content).context("Invalid scenario")?;
        if scenario.events.windows(2).any(|w| w[1].at_ms < w[0].at_ms) {
            anyhow::bail!("Scenario events must be ordered by at_ms");
        }
        Ok(scenario)
    }
}

/// What a replay produced besides the delivery calls.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub traces: Vec<Trace>,
    pub final_phase: Option<SessionPhase>,
    pub logs_dropped: u64,
    pub metrics_dropped: u64,
}

/// Frame source that is always available; samples come from the scenario.
struct ScriptedFrames;

impl FrameMetricsSource for ScriptedFrames {
    fn start_collection(&self) -> Option<SubscriptionId> {
        Some(SubscriptionId("replay".into()))
    }

    fn stop_collection(&self, _id: &SubscriptionId) {}
}

/// Prints every delivery call with the virtual time it happened at.
struct PrintingClient {
    origin: Instant,
}

impl PrintingClient {
    fn stamp(&self) -> String {
        format!("[{:>8}ms]", self.origin.elapsed().as_millis())
    }
}

#[async_trait::async_trait]
impl DeliveryClient for PrintingClient {
    fn start_session(&self) -> Result<(), DeliveryError> {
        println!("{} session start", self.stamp());
        Ok(())
    }

    fn end_session(&self) -> Result<(), DeliveryError> {
        println!("{} session end", self.stamp());
        Ok(())
    }

    async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        println!(
            "{} deliver {} x{}",
            self.stamp(),
            envelope.kind,
            envelope.item_count
        );
        Ok(())
    }
}

pub fn run(path: &Path, compact: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    let scenario = Scenario::parse(&content)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()?;

    let report = runtime.block_on(async {
        let client = Arc::new(PrintingClient {
            origin: Instant::now(),
        });
        replay(scenario, client).await
    })?;

    for trace in &report.traces {
        let json = if compact {
            serde_json::to_string(trace)?
        } else {
            serde_json::to_string_pretty(trace)?
        };
        println!("{json}");
    }
    println!();
    println!("Final session phase: {:?}", report.final_phase);
    println!("Dropped records:     logs {}, metrics {}", report.logs_dropped, report.metrics_dropped);
    Ok(())
}

/// Feed the scenario into a fresh [`Sdk`] and close it at the end.
///
/// Must run on a runtime with a paused clock for the timings to be exact.
pub async fn replay(
    scenario: Scenario,
    client: Arc<dyn DeliveryClient>,
) -> anyhow::Result<ReplayReport> {
    let frames: Option<Arc<dyn FrameMetricsSource>> = if scenario.frame_metrics {
        Some(Arc::new(ScriptedFrames))
    } else {
        None
    };
    let sdk = Sdk::start(scenario.config, client, frames)?;
    let origin = Instant::now();

    let screen: CurrentScreen<String> = CurrentScreen::new();
    let mut screens: Vec<Arc<String>> = Vec::new();
    // Scenario span ids in start order, so finished traces keep that order.
    let mut open_spans: Vec<(String, Span)> = Vec::new();
    let mut report = ReplayReport::default();

    let mut last_at = 0;
    for event in scenario.events {
        tokio::time::sleep_until(origin + Duration::from_millis(event.at_ms)).await;
        let now = Timestamp::from_millis(event.at_ms);
        last_at = event.at_ms;

        match event.action {
            Action::Foreground => sdk.on_foreground(now),
            Action::Background => sdk.on_background(now),
            Action::AppStart { cold } => sdk.on_app_start(now, cold),
            Action::FirstFrame => sdk.on_first_frame_drawn(now),
            Action::Screen { name } => {
                let current = Arc::new(name);
                screen.set(&current);
                screens.push(current);
            }
            Action::ScreenDestroyed { name } => {
                if let Some(pos) = screens.iter().position(|s| **s == name) {
                    let destroyed = screens.remove(pos);
                    screen.clear_if(&destroyed);
                }
            }
            Action::SpanStart { id, op, parent } => {
                let mut span = Span::new(op, now);
                if let Some(parent) = parent {
                    let parent_span = open_spans
                        .iter()
                        .find(|(sid, _)| *sid == parent)
                        .with_context(|| format!("Unknown parent span '{parent}'"))?;
                    span = span.with_parent(parent_span.1.id.clone());
                }
                sdk.span_started(&span);
                open_spans.push((id, span));
            }
            Action::SpanEnd { id } => {
                let (_, span) = open_spans
                    .iter_mut()
                    .find(|(sid, _)| *sid == id)
                    .with_context(|| format!("Unknown span '{id}'"))?;
                span.end(now);
                sdk.span_ended(span);
            }
            Action::Frame {
                duration_ms,
                refresh_rate,
            } => {
                let refresh_rate = refresh_rate.unwrap_or(60.0);
                let budget_ms = 1_000.0 / f64::from(refresh_rate);
                let delay_ms = (duration_ms as f64 - budget_ms).max(0.0);
                sdk.on_frame_sample(FrameSample {
                    frame_end: now,
                    duration_nanos: duration_ms * 1_000_000,
                    delay_nanos: (delay_ms * 1_000_000.0) as u64,
                    refresh_rate,
                });
            }
            Action::FinishTrace { root, name } => {
                let name = name
                    .or_else(|| screen.get().map(|s| s.as_str().to_owned()))
                    .unwrap_or_else(|| "unnamed".into());
                let trace = take_trace(&mut open_spans, &root, name)?;
                report.traces.push(sdk.finish_trace(trace));
            }
            Action::Log { level, body } => sdk.log(LogRecord::new(level, body)),
            Action::Metric { name, value } => sdk.metric(MetricPoint::counter(name, value)),
        }
    }

    tokio::time::sleep_until(origin + Duration::from_millis(last_at + scenario.settle_ms)).await;
    report.final_phase = sdk.session_phase();
    report.logs_dropped = sdk.logs().dropped_count();
    report.metrics_dropped = sdk.metrics().dropped_count();
    sdk.close().await;
    Ok(report)
}

/// Remove `root` and all its open descendants and assemble them into a trace.
fn take_trace(spans: &mut Vec<(String, Span)>, root: &str, name: String) -> anyhow::Result<Trace> {
    let pos = spans
        .iter()
        .position(|(sid, _)| sid == root)
        .with_context(|| format!("Unknown root span '{root}'"))?;
    let (_, mut root_span) = spans.remove(pos);
    root_span.parent_id = None;

    let mut members: HashSet<String> = HashSet::from([root_span.id.clone()]);
    let mut trace = Trace::new(name, root_span);
    let mut remaining = Vec::with_capacity(spans.len());
    for (sid, span) in spans.drain(..) {
        let belongs = span.parent_id.as_ref().is_some_and(|p| members.contains(p));
        if belongs {
            members.insert(span.id.clone());
            trace.add_span(span);
        } else {
            remaining.push((sid, span));
        }
    }
    *spans = remaining;
    Ok(trace)
}
