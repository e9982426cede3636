use crate::bridge::PageEventSink;
use crate::errors::RecorderError;
use crate::logging::LogSink;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

pub mod fake;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError>;
    fn current_dir(&self) -> Result<PathBuf, RecorderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub headless: bool,
    pub viewport: Option<Viewport>,
    pub load_timeout: Duration,
}

/// Launches rendering surfaces. Page-originated events (binding calls and
/// console output) are pushed into `events` for the surface's lifetime.
#[async_trait]
pub trait RenderHost: Send + Sync {
    async fn open(
        &self,
        options: SurfaceOptions,
        events: PageEventSink,
    ) -> Result<Arc<dyn RenderSurface>, RecorderError>;
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Registers a page-callable function. Must run before `set_content`.
    async fn expose_binding(&self, name: &str) -> Result<(), RecorderError>;
    /// Loads the document and returns once the page reports it loaded.
    async fn set_content(&self, html: &str) -> Result<(), RecorderError>;
    /// Encoded still image of the first element matching `selector`.
    async fn capture_region(&self, selector: &str) -> Result<Vec<u8>, RecorderError>;
    /// Releases the surface. Calling it again is a no-op.
    async fn close(&self) -> Result<(), RecorderError>;
}

pub type EncoderStdin = Pin<Box<dyn AsyncWrite + Send>>;
pub type EncoderStderr = Pin<Box<dyn AsyncRead + Send>>;

/// A running encoder subprocess, split into the parts its wrapper drives
/// independently.
pub struct EncoderChild {
    pub stdin: EncoderStdin,
    pub stderr: Option<EncoderStderr>,
    /// Resolves with the exit code, or a process error on runtime faults.
    pub exit: BoxFuture<'static, Result<i32, RecorderError>>,
    /// Sending (or dropping) this terminates the subprocess.
    pub kill_switch: oneshot::Sender<()>,
}

pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, request: ProcessRequest) -> Result<EncoderChild, RecorderError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }

    fn current_dir(&self) -> Result<PathBuf, RecorderError> {
        std::env::current_dir().map_err(|e| RecorderError::Io(e.to_string()))
    }
}

pub struct ProcessEncoderLauncher;

impl EncoderLauncher for ProcessEncoderLauncher {
    fn launch(&self, request: ProcessRequest) -> Result<EncoderChild, RecorderError> {
        let mut cmd = tokio::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RecorderError::Process(format!("failed to spawn {}: {e}", request.program))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::Process("encoder stdin unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let (kill_switch, kill_rx) = oneshot::channel::<()>();
        let exit = Box::pin(async move {
            tokio::select! {
                status = child.wait() => {
                    return status
                        .map_err(|e| RecorderError::Process(e.to_string()))
                        .and_then(exit_code);
                }
                _ = kill_rx => {}
            }
            let _ = child.kill().await;
            Err(RecorderError::Process("encoder terminated".to_string()))
        });

        Ok(EncoderChild {
            stdin: Box::pin(stdin),
            stderr: stderr.map(|stream| Box::pin(stream) as EncoderStderr),
            exit,
            kill_switch,
        })
    }
}

/// The exit code, or a process error when the encoder was ended by a signal.
fn exit_code(status: std::process::ExitStatus) -> Result<i32, RecorderError> {
    if let Some(code) = status.code() {
        return Ok(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(RecorderError::Process(format!(
                "encoder terminated by signal {signal}"
            )));
        }
    }
    Err(RecorderError::Process(
        "encoder exited without a status code".to_string(),
    ))
}

pub struct RecorderRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub render_host: Arc<dyn RenderHost>,
    pub encoder_launcher: Arc<dyn EncoderLauncher>,
    pub log: Arc<dyn LogSink>,
}
