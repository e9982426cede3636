use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("setup error: {0}")]
    Setup(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("capture miss: {0}")]
    Capture(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Discriminant of [`RecorderError`] so callers can branch without parsing
/// the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SetupError,
    RenderError,
    CaptureMiss,
    ProcessError,
    StreamError,
    Timeout,
    LifecycleError,
    Config,
    Io,
    Cli,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Setup(_) => ErrorKind::SetupError,
            Self::Render(_) => ErrorKind::RenderError,
            Self::Capture(_) => ErrorKind::CaptureMiss,
            Self::Process(_) => ErrorKind::ProcessError,
            Self::Stream(_) => ErrorKind::StreamError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Lifecycle(_) => ErrorKind::LifecycleError,
            Self::ConfigParse(_) | Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Cli(_) => ErrorKind::Cli,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Setup(message)
            | Self::Render(message)
            | Self::Capture(message)
            | Self::Process(message)
            | Self::Stream(message)
            | Self::Timeout(message)
            | Self::Lifecycle(message)
            | Self::ConfigParse(message)
            | Self::InvalidConfig(message)
            | Self::Io(message)
            | Self::Cli(message) => message,
        }
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetupError => "setup",
            Self::RenderError => "render",
            Self::CaptureMiss => "capture_miss",
            Self::ProcessError => "process",
            Self::StreamError => "stream",
            Self::Timeout => "timeout",
            Self::LifecycleError => "lifecycle",
            Self::Config => "config",
            Self::Io => "io",
            Self::Cli => "cli",
        }
    }
}
