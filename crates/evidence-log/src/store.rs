//! Append-only store for session events.
//!
//! Events live in memory for the duration of one inspection session and are
//! mirrored line-by-line into an ndjson file when a sink path is configured,
//! so the audit trail survives independently of the final report. Writes
//! happen only during the live browsing phase, reads only afterwards; that
//! non-overlapping discipline is the concurrency model, the locks here just
//! make the handoff safe.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::LogError;
use crate::model::{Event, EventKind, LogLevel};

/// Read-back order for [`LogStore::events`]. The inspector asks for
/// newest-first; correctness never depends on it (matching is by attribute
/// equality), only provenance tie-breaks and display do.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Order {
    #[default]
    Desc,
    Asc,
}

/// Builds one ndjson audit line mirroring the in-memory event. Empty and
/// absent fields are left out of the record entirely.
fn audit_record(event: &Event) -> Value {
    let mut record = Map::new();
    record.insert(
        "level".into(),
        serde_json::to_value(event.level).unwrap_or(Value::Null),
    );
    record.insert("message".into(), Value::String(event.message.clone()));
    record.insert(
        "timestamp".into(),
        Value::String(event.timestamp.to_rfc3339()),
    );
    record.insert("type".into(), Value::String(event.type_name().to_string()));
    if !event.stack.is_empty() {
        record.insert(
            "stack".into(),
            serde_json::to_value(&event.stack).unwrap_or(Value::Null),
        );
    }
    if let Some(origin) = &event.origin {
        record.insert("origin".into(), Value::String(origin.clone()));
    }
    if let Some(location) = &event.location {
        record.insert("location".into(), Value::String(location.clone()));
    }
    if let Some(raw) = &event.raw {
        record.insert("raw".into(), raw.clone());
    }
    record.insert("data".into(), event.kind.payload_value());
    Value::Object(record)
}

struct Sink {
    writer: BufWriter<File>,
    path: PathBuf,
}

pub struct LogStore {
    events: RwLock<Vec<Event>>,
    sink: Option<Mutex<Sink>>,
    sink_error: RwLock<Option<String>>,
}

impl LogStore {
    /// In-memory store without an on-disk mirror.
    pub fn in_memory() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            sink: None,
            sink_error: RwLock::new(None),
        }
    }

    /// Store mirroring every appended event into `path` as ndjson.
    pub fn with_file(path: &Path) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| LogError::SinkUnavailable(err.to_string()))?;
        Ok(Self {
            events: RwLock::new(Vec::new()),
            sink: Some(Mutex::new(Sink {
                writer: BufWriter::new(file),
                path: path.to_path_buf(),
            })),
            sink_error: RwLock::new(None),
        })
    }

    pub fn sink_path(&self) -> Option<PathBuf> {
        self.sink.as_ref().map(|sink| sink.lock().path.clone())
    }

    /// Appends one event. A failing on-disk mirror does not lose the
    /// in-memory event but is remembered and surfaced on read-back: an
    /// audit artifact that silently diverged from memory must not pass as
    /// complete evidence.
    pub fn append(&self, event: Event) {
        if let Some(sink) = &self.sink {
            let record = audit_record(&event);
            let mut guard = sink.lock();
            let result = serde_json::to_writer(&mut guard.writer, &record)
                .map_err(|err| err.to_string())
                .and_then(|_| guard.writer.write_all(b"\n").map_err(|err| err.to_string()));
            if let Err(err) = result {
                warn!(target: "evidence-log", %err, "audit sink write failed");
                *self.sink_error.write() = Some(err);
            }
        }
        self.events.write().push(event);
    }

    /// Convenience for browser-level notices ("Browser", "Browser.Console",
    /// "WebSocket", ...): non-fatal anomalies are part of the evidence.
    pub fn notice(&self, level: LogLevel, label: &str, message: impl Into<String>) {
        let mut event = Event::new(EventKind::Other {
            label: label.to_string(),
            payload: Value::Null,
        });
        event.level = level;
        event.message = message.into();
        self.append(event);
    }

    /// Returns all events carrying a non-empty type, in insertion order
    /// (`Asc`) or reversed (`Desc`).
    ///
    /// Errs when the audit sink previously failed: an inspector reading a
    /// knowingly incomplete record would produce false "no provenance"
    /// attributions, so the failure is explicit rather than an empty or
    /// partial result.
    pub fn events(&self, order: Order) -> Result<Vec<Event>, LogError> {
        if let Some(err) = self.sink_error.read().as_ref() {
            return Err(LogError::SinkWrite(err.clone()));
        }
        let guard = self.events.read();
        let mut out: Vec<Event> = guard
            .iter()
            .filter(|event| !event.type_name().is_empty())
            .cloned()
            .collect();
        if order == Order::Desc {
            out.reverse();
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn flush(&self) -> Result<(), LogError> {
        if let Some(sink) = &self.sink {
            sink.lock()
                .writer
                .flush()
                .map_err(|err| LogError::SinkWrite(err.to_string()))?;
        }
        Ok(())
    }
}
