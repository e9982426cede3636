use crate::errors::RecorderError;
use crate::runtime::FileSystem;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A decoded session trace. The event records are kept verbatim; only the
/// player inside the surface interprets them.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    source: PathBuf,
    events: Value,
}

impl Trace {
    pub fn from_value(source: impl Into<PathBuf>, events: Value) -> Self {
        Self {
            source: source.into(),
            events,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn events(&self) -> &Value {
        &self.events
    }

    /// Number of records when the trace is an array. Informational only.
    pub fn event_count(&self) -> Option<usize> {
        self.events.as_array().map(Vec::len)
    }
}

pub fn load_trace(fs: &dyn FileSystem, path: &Path) -> Result<Trace, RecorderError> {
    let text = fs.read_to_string(path).map_err(|e| {
        RecorderError::Setup(format!("trace {} unreadable: {}", path.display(), e.message()))
    })?;
    let events: Value = serde_json::from_str(&text).map_err(|e| {
        RecorderError::Setup(format!("trace {} is not valid JSON: {e}", path.display()))
    })?;
    Ok(Trace::from_value(path, events))
}
