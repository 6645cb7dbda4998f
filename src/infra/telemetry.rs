//! Scoped telemetry activities.
//!
//! A `TelemetryActivity` measures one operation. Named intervals inside it
//! (for example time spent querying the trust store) accumulate separately.
//! When the activity is dropped its timings are written into the event and
//! the event is handed to the installed sink.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";
pub const DURATION: &str = "duration";

/// Named bag of properties emitted when an activity completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub properties: BTreeMap<String, Value>,
}

impl TelemetryEvent {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.properties {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Receiver of completed telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Writes events to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetrySink;

impl TelemetrySink for LogTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        log::debug!("telemetry: {event}");
    }
}

/// Keeps emitted events in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetrySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Random 128-bit operation id, hex encoded.
#[must_use]
pub fn new_operation_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Measures one operation and emits its event on drop.
pub struct TelemetryActivity {
    sink: Option<Arc<dyn TelemetrySink>>,
    event: Option<TelemetryEvent>,
    operation_id: String,
    parent: Option<(String, String)>,
    started_at: SystemTime,
    clock: Instant,
    open_intervals: BTreeMap<String, Instant>,
    intervals: BTreeMap<String, Duration>,
}

impl TelemetryActivity {
    /// Start an activity that will emit `event` to `sink`.
    #[must_use]
    pub fn start(sink: Option<Arc<dyn TelemetrySink>>, event: Option<TelemetryEvent>) -> Self {
        Self {
            sink,
            event,
            operation_id: new_operation_id(),
            parent: None,
            started_at: SystemTime::now(),
            clock: Instant::now(),
            open_intervals: BTreeMap::new(),
            intervals: BTreeMap::new(),
        }
    }

    /// Record the id of the operation this activity belongs to under `key`.
    #[must_use]
    pub fn with_parent(mut self, key: impl Into<String>, parent_id: impl Into<String>) -> Self {
        self.parent = Some((key.into(), parent_id.into()));
        self
    }

    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn event_mut(&mut self) -> Option<&mut TelemetryEvent> {
        self.event.as_mut()
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn start_interval(&mut self, name: &str) {
        self.open_intervals.insert(name.to_string(), Instant::now());
    }

    /// Close `name`; the time is added to any earlier runs of the same interval.
    pub fn end_interval(&mut self, name: &str) {
        if let Some(started) = self.open_intervals.remove(name) {
            *self.intervals.entry(name.to_string()).or_default() += started.elapsed();
        }
    }

    /// Accumulated time for `name` so far.
    #[must_use]
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.intervals.get(name).copied()
    }

    fn finish(&mut self) {
        let duration = self.clock.elapsed();
        let open: Vec<String> = self.open_intervals.keys().cloned().collect();
        for name in open {
            self.end_interval(&name);
        }

        let Some(mut event) = self.event.take() else {
            return;
        };
        let start = self
            .started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        event.set(START_TIME, start.as_secs_f64());
        event.set(END_TIME, (start + duration).as_secs_f64());
        event.set(DURATION, duration.as_secs_f64());
        event.set("operation_id", self.operation_id.clone());
        if let Some((key, id)) = &self.parent {
            event.set(key.clone(), id.clone());
        }
        for (name, elapsed) in &self.intervals {
            event.set(name.clone(), elapsed.as_secs_f64());
        }

        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }
}

impl Drop for TelemetryActivity {
    fn drop(&mut self) {
        self.finish();
    }
}
