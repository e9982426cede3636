use crate::errors::RecorderError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

/// Where the engine sends its structured events. Emitting never fails the
/// caller; sinks swallow their own I/O errors.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &LogEvent<'_>);

    fn info(&self, event_type: &str, payload: Value) {
        self.emit(&LogEvent {
            level: "info",
            event_type,
            payload,
        });
    }

    fn warn(&self, event_type: &str, payload: Value) {
        self.emit(&LogEvent {
            level: "warn",
            event_type,
            payload,
        });
    }

    fn error(&self, event_type: &str, payload: Value) {
        self.emit(&LogEvent {
            level: "error",
            event_type,
            payload,
        });
    }

    fn debug(&self, event_type: &str, payload: Value) {
        self.emit(&LogEvent {
            level: "debug",
            event_type,
            payload,
        });
    }
}

#[derive(Debug)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    write_lock: Mutex<()>,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RecorderError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RecorderError::Io(e.to_string()))?;
            }
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RecorderError::Io(e.to_string()))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RecorderError::Io("log write lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RecorderError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| RecorderError::Io(e.to_string()))
    }
}

impl LogSink for JsonlLogger {
    fn emit(&self, event: &LogEvent<'_>) {
        let _ = self.append(event);
    }
}

/// Plain `key=value` lines on stderr for runs without a log file.
#[derive(Debug, Default)]
pub struct StderrLogSink {
    pub include_debug: bool,
}

impl LogSink for StderrLogSink {
    fn emit(&self, event: &LogEvent<'_>) {
        if event.level == "debug" && !self.include_debug {
            return;
        }
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();
        eprintln!(
            "{}",
            structured_fallback_line(event.level, event.event_type, &payload)
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub level: String,
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, event: &LogEvent<'_>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                level: event.level.to_string(),
                event_type: event.event_type.to_string(),
                payload: event.payload.clone(),
            });
        }
    }
}

pub fn structured_fallback_line(level: &str, event_type: &str, message: &str) -> String {
    format!(
        "level={level} event={event_type} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, JsonlLogger, LogEvent, LogSink, MemoryLogSink};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/run.jsonl");
        let logger = JsonlLogger::new(&path).with_max_payload_bytes(20);

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "encoder_stderr",
                payload: json!({"line": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");
        logger.info("run_finished", json!({"ok": true}));

        let text = std::fs::read_to_string(&path).expect("read");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event_type\":\"encoder_stderr\""));
        assert!(lines[0].contains("..."));
        assert!(lines[1].contains("\"ok\":true"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let logger = JsonlLogger::new(&path).with_max_payload_bytes(9);
        logger.warn("console", json!("ééééééééé"));
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("..."));
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("info", "state", "hello\nworld");
        assert_eq!(line, "level=info event=state message=hello\\nworld ");
    }

    #[test]
    fn memory_sink_filters_by_event_type() {
        let sink = MemoryLogSink::new();
        sink.info("state", json!({"to": "recording"}));
        sink.debug("capture_miss", json!({"tick": 1}));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_of("capture_miss")[0].level, "debug");
    }
}
