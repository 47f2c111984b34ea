//! Metric event contract.
//!
//! Producers build a [`MetricEvent`] and hand it to an injected
//! [`MetricsSink`]. How the event reaches a collector is the sink's business.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How a metric value should be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A sampled measurement such as a latency.
    Value,
    /// A monotonically increasing count.
    Count,
    /// A point-in-time level such as pool availability.
    Gauge,
}

/// Outcome tag attached to some events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricResult {
    /// The measured operation succeeded.
    Success,
    /// The measured operation failed.
    Failure,
}

impl MetricResult {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// A structured metric event: `{name, value | count, route?, result?, status?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    /// Metric name.
    pub name: String,
    /// Aggregation kind.
    pub kind: MetricKind,
    /// Measured value; durations are in milliseconds.
    pub value: f64,
    /// Route or view the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Outcome of the measured operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MetricResult>,
    /// HTTP status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl MetricEvent {
    fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            route: None,
            result: None,
            status: None,
        }
    }

    /// A sampled value.
    #[must_use]
    pub fn value(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Value, value)
    }

    /// A duration, recorded in milliseconds.
    #[must_use]
    pub fn duration(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, MetricKind::Value, duration.as_secs_f64() * 1000.0)
    }

    /// A count increment.
    #[must_use]
    pub fn count(name: impl Into<String>, count: u64) -> Self {
        Self::new(name, MetricKind::Count, count as f64)
    }

    /// A gauge level.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    /// Tags the event with a route, if one is known.
    #[must_use]
    pub fn with_route(mut self, route: Option<impl Into<String>>) -> Self {
        self.route = route.map(Into::into);
        self
    }

    /// Tags the event with an outcome.
    #[must_use]
    pub fn with_result(mut self, result: MetricResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Tags the event with a status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Receives metric events.
pub trait MetricsSink: Send + Sync + 'static {
    /// Emits one event. Must not block and must not fail.
    fn emit(&self, event: MetricEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn emit(&self, _event: MetricEvent) {}
}

/// Sink that keeps every event in memory.
///
/// Clones share the same buffer.
///
/// # Example
///
/// ```
/// use strata_core::{MetricEvent, MetricsSink, RecordingSink};
///
/// let sink = RecordingSink::new();
/// sink.emit(MetricEvent::count("query", 1));
/// assert_eq!(sink.named("query").len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events with the given name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }

    /// Discards all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MetricsSink for RecordingSink {
    fn emit(&self, event: MetricEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = MetricEvent::duration("latency", Duration::from_millis(250))
            .with_route(Some("home"))
            .with_status(200);
        assert_eq!(event.kind, MetricKind::Value);
        assert!((event.value - 250.0).abs() < f64::EPSILON);
        assert_eq!(event.route.as_deref(), Some("home"));
        assert_eq!(event.status, Some(200));

        let count = MetricEvent::count("query", 1).with_route(None::<String>);
        assert_eq!(count.kind, MetricKind::Count);
        assert!(count.route.is_none());
    }

    #[test]
    fn test_event_serialization_skips_missing_tags() {
        let event = MetricEvent::value("body.size", 12.0).with_result(MetricResult::Failure);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["result"], "failure");
        assert!(json.get("route").is_none());
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_recording_sink_shares_buffer() {
        let sink = RecordingSink::new();
        let clone = sink.clone();
        clone.emit(MetricEvent::gauge("pool-available", 3.0));
        sink.emit(MetricEvent::count("query", 1));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(clone.named("query").len(), 1);

        sink.clear();
        assert!(clone.events().is_empty());
    }
}
