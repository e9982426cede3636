use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Recording,
    Closed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSignal {
    Started,
    Finished,
}

impl PlaybackSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Info,
    Log,
    Warning,
    Error,
}

impl ConsoleLevel {
    pub fn parse(value: &str) -> Self {
        match value {
            "error" | "assert" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "info" => Self::Info,
            "debug" | "verbose" => Self::Debug,
            _ => Self::Log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
}

/// Completion signals of the encoder subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderSignal {
    ClosedNormally,
    ProcessError(String),
    StreamError(String),
}

impl EncoderSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClosedNormally => "closed_normally",
            Self::ProcessError(_) => "process_error",
            Self::StreamError(_) => "stream_error",
        }
    }
}

/// Everything the orchestrator's control loop consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A named binding was invoked from inside the page.
    Binding { name: String, payload: String },
    Console(ConsoleMessage),
    Encoder(EncoderSignal),
}
