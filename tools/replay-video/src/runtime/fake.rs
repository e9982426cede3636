//! Scriptable stand-ins for the runtime seams, shared by unit and
//! integration tests.

use super::{
    EncoderChild, EncoderLauncher, EncoderStderr, FileSystem, ProcessRequest, RenderHost,
    RenderSurface, SurfaceOptions,
};
use crate::bridge::{PageEventSink, FINISH_BINDING, START_BINDING};
use crate::console_tap::REPLAYER_ERROR_MARKER;
use crate::errors::RecorderError;
use crate::payload;
use crate::types::ConsoleLevel;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    cwd: PathBuf,
}

impl Default for FakeFileSystem {
    fn default() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            cwd: PathBuf::from("/work"),
        }
    }
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.add_file(path, contents);
        fs
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| RecorderError::Io(format!("missing file {}", path.display())))
    }

    fn current_dir(&self) -> Result<PathBuf, RecorderError> {
        Ok(self.cwd.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureFailures {
    #[default]
    None,
    First(usize),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedConsole {
    /// Offset from the document finishing its load.
    pub after: Duration,
    pub level: ConsoleLevel,
    pub text: String,
}

/// How the fake page behaves once its content is loaded. Start timing comes
/// from the settings embedded in the document, so the fake follows the same
/// delay contract as the real bootstrap script.
#[derive(Debug, Clone)]
pub struct FakePageScript {
    pub open_error: Option<String>,
    pub content_error: Option<String>,
    pub signal_start: bool,
    pub playback: Option<Duration>,
    pub finish_without_start: bool,
    /// Fires each bridge binding twice, as a misbehaving page would.
    pub duplicate_signals: bool,
    pub reject_empty_trace: bool,
    pub console: Vec<ScriptedConsole>,
    pub capture_failures: CaptureFailures,
}

impl Default for FakePageScript {
    fn default() -> Self {
        Self {
            open_error: None,
            content_error: None,
            signal_start: true,
            playback: Some(Duration::from_secs(2)),
            finish_without_start: false,
            duplicate_signals: false,
            reject_empty_trace: true,
            console: Vec::new(),
            capture_failures: CaptureFailures::None,
        }
    }
}

impl FakePageScript {
    pub fn plays_for(duration: Duration) -> Self {
        Self {
            playback: Some(duration),
            ..Self::default()
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            playback: None,
            ..Self::default()
        }
    }

    pub fn never_starts() -> Self {
        Self {
            signal_start: false,
            playback: None,
            ..Self::default()
        }
    }

    pub fn finishing_without_start() -> Self {
        Self {
            finish_without_start: true,
            ..Self::default()
        }
    }

    pub fn with_duplicate_signals(mut self) -> Self {
        self.duplicate_signals = true;
        self
    }

    pub fn failing_open(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_content(message: &str) -> Self {
        Self {
            content_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_console(mut self, after: Duration, level: ConsoleLevel, text: &str) -> Self {
        self.console.push(ScriptedConsole {
            after,
            level,
            text: text.to_string(),
        });
        self
    }

    pub fn with_capture_failures(mut self, failures: CaptureFailures) -> Self {
        self.capture_failures = failures;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub at: Instant,
    pub selector: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceJournal {
    pub calls: Vec<String>,
    pub bindings: Vec<String>,
    pub html: Option<String>,
    pub loaded_at: Option<Instant>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub captures: Vec<CaptureRecord>,
    pub close_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeRenderHost {
    script: FakePageScript,
    opened: Arc<Mutex<Vec<(SurfaceOptions, Arc<Mutex<SurfaceJournal>>)>>>,
}

impl FakeRenderHost {
    pub fn new(script: FakePageScript) -> Self {
        Self {
            script,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().expect("opened lock").len()
    }

    pub fn last_options(&self) -> Option<SurfaceOptions> {
        self.opened
            .lock()
            .expect("opened lock")
            .last()
            .map(|(options, _)| options.clone())
    }

    pub fn journal(&self) -> Option<SurfaceJournal> {
        self.opened
            .lock()
            .expect("opened lock")
            .last()
            .map(|(_, journal)| journal.lock().expect("journal lock").clone())
    }
}

#[async_trait]
impl RenderHost for FakeRenderHost {
    async fn open(
        &self,
        options: SurfaceOptions,
        events: PageEventSink,
    ) -> Result<Arc<dyn RenderSurface>, RecorderError> {
        if let Some(message) = &self.script.open_error {
            return Err(RecorderError::Setup(message.clone()));
        }
        let journal = Arc::new(Mutex::new(SurfaceJournal::default()));
        self.opened
            .lock()
            .expect("opened lock")
            .push((options, journal.clone()));
        Ok(Arc::new(FakeSurface {
            script: self.script.clone(),
            events,
            journal,
            page: Mutex::new(None),
        }))
    }
}

#[derive(Debug, Clone)]
enum PageAction {
    Console(ConsoleLevel, String),
    Start,
    Finish,
}

pub struct FakeSurface {
    script: FakePageScript,
    events: PageEventSink,
    journal: Arc<Mutex<SurfaceJournal>>,
    page: Mutex<Option<JoinHandle<()>>>,
}

impl FakeSurface {
    fn timeline(&self, html: &str, bindings: &[String]) -> Vec<(Duration, PageAction)> {
        let mut actions = self
            .script
            .console
            .iter()
            .map(|entry| {
                (
                    entry.after,
                    PageAction::Console(entry.level, entry.text.clone()),
                )
            })
            .collect::<Vec<_>>();

        let empty_trace = payload::embedded_trace(html)
            .and_then(|trace| trace.as_array().map(Vec::is_empty))
            .unwrap_or(false);
        let has = |name: &str| bindings.iter().any(|b| b == name);

        if self.script.reject_empty_trace && empty_trace {
            actions.push((
                Duration::ZERO,
                PageAction::Console(
                    ConsoleLevel::Error,
                    format!("{REPLAYER_ERROR_MARKER} Error: Replayer need at least 2 events."),
                ),
            ));
        } else if self.script.finish_without_start {
            if has(FINISH_BINDING) {
                actions.push((Duration::ZERO, PageAction::Finish));
            }
        } else if self.script.signal_start && has(START_BINDING) {
            let delay = payload::embedded_settings(html)
                .map(|settings| settings.playback_delay())
                .unwrap_or(Duration::ZERO);
            let repeats = if self.script.duplicate_signals { 2 } else { 1 };
            for _ in 0..repeats {
                actions.push((delay, PageAction::Start));
                if let Some(playback) = self.script.playback {
                    if has(FINISH_BINDING) {
                        actions.push((delay + playback, PageAction::Finish));
                    }
                }
            }
        }

        actions.sort_by_key(|(after, _)| *after);
        actions
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn expose_binding(&self, name: &str) -> Result<(), RecorderError> {
        let mut journal = self.journal.lock().expect("journal lock");
        journal.calls.push(format!("expose_binding:{name}"));
        journal.bindings.push(name.to_string());
        Ok(())
    }

    async fn set_content(&self, html: &str) -> Result<(), RecorderError> {
        let bindings = {
            let mut journal = self.journal.lock().expect("journal lock");
            journal.calls.push("set_content".to_string());
            journal.html = Some(html.to_string());
            if let Some(message) = &self.script.content_error {
                return Err(RecorderError::Setup(message.clone()));
            }
            journal.loaded_at = Some(Instant::now());
            journal.bindings.clone()
        };

        let actions = self.timeline(html, &bindings);
        let events = self.events.clone();
        let journal = self.journal.clone();
        let task = tokio::spawn(async move {
            let origin = Instant::now();
            for (after, action) in actions {
                tokio::time::sleep_until(origin + after).await;
                match action {
                    PageAction::Console(level, text) => {
                        events.console(level, &text);
                    }
                    PageAction::Start => {
                        journal.lock().expect("journal lock").started_at = Some(Instant::now());
                        events.binding_called(START_BINDING, "start");
                    }
                    PageAction::Finish => {
                        journal.lock().expect("journal lock").finished_at = Some(Instant::now());
                        events.binding_called(FINISH_BINDING, "finish");
                    }
                }
            }
        });
        *self.page.lock().expect("page lock") = Some(task);
        Ok(())
    }

    async fn capture_region(&self, selector: &str) -> Result<Vec<u8>, RecorderError> {
        let mut journal = self.journal.lock().expect("journal lock");
        let attempt = journal.captures.len();
        let succeeded = journal.close_count == 0
            && match self.script.capture_failures {
                CaptureFailures::None => true,
                CaptureFailures::First(n) => attempt >= n,
                CaptureFailures::All => false,
            };
        journal.captures.push(CaptureRecord {
            at: Instant::now(),
            selector: selector.to_string(),
            succeeded,
        });
        if succeeded {
            Ok(format!("frame-{attempt}").into_bytes())
        } else {
            Err(RecorderError::Capture(format!(
                "no element matches {selector}"
            )))
        }
    }

    async fn close(&self) -> Result<(), RecorderError> {
        {
            let mut journal = self.journal.lock().expect("journal lock");
            journal.calls.push("close".to_string());
            journal.close_count += 1;
        }
        if let Some(task) = self.page.lock().expect("page lock").take() {
            task.abort();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeEncoderScript {
    pub spawn_error: Option<String>,
    pub exit_code_on_close: i32,
    /// Writes beyond this many frames fail with a broken pipe.
    pub fail_writes_after: Option<usize>,
    /// Exit code reported as soon as a write fails; `None` keeps running.
    pub exit_code_on_write_failure: Option<i32>,
    pub fail_close: bool,
    /// Raw bytes served on the diagnostic stream.
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct EncoderJournal {
    pub requests: Vec<ProcessRequest>,
    pub frames: Vec<Vec<u8>>,
    pub frame_instants: Vec<Instant>,
    pub shutdowns: usize,
    pub closed_at: Option<Instant>,
    pub kills: usize,
}

#[derive(Clone, Default)]
pub struct FakeEncoderLauncher {
    script: FakeEncoderScript,
    journal: Arc<Mutex<EncoderJournal>>,
}

impl FakeEncoderLauncher {
    pub fn new(script: FakeEncoderScript) -> Self {
        Self {
            script,
            journal: Arc::new(Mutex::new(EncoderJournal::default())),
        }
    }

    pub fn journal(&self) -> EncoderJournal {
        self.journal.lock().expect("encoder journal lock").clone()
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.journal().requests
    }
}

impl EncoderLauncher for FakeEncoderLauncher {
    fn launch(&self, request: ProcessRequest) -> Result<EncoderChild, RecorderError> {
        self.journal
            .lock()
            .expect("encoder journal lock")
            .requests
            .push(request.clone());
        if let Some(message) = &self.script.spawn_error {
            return Err(RecorderError::Process(format!(
                "failed to spawn {}: {message}",
                request.program
            )));
        }

        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<i32>();
        let (kill_switch, kill_rx) = oneshot::channel::<()>();
        let stdin = FakeStdin {
            script: self.script.clone(),
            journal: self.journal.clone(),
            exit_tx,
            broken: false,
        };

        let journal = self.journal.clone();
        let exit_code_on_close = self.script.exit_code_on_close;
        let exit = Box::pin(async move {
            tokio::select! {
                code = exit_rx.recv() => Ok(code.unwrap_or(exit_code_on_close)),
                _ = kill_rx => {
                    journal.lock().expect("encoder journal lock").kills += 1;
                    Err(RecorderError::Process("encoder terminated".to_string()))
                }
            }
        });

        let stderr = if self.script.stderr.is_empty() {
            None
        } else {
            Some(Box::pin(io::Cursor::new(self.script.stderr.clone())) as EncoderStderr)
        };

        Ok(EncoderChild {
            stdin: Box::pin(stdin),
            stderr,
            exit,
            kill_switch,
        })
    }
}

struct FakeStdin {
    script: FakeEncoderScript,
    journal: Arc<Mutex<EncoderJournal>>,
    exit_tx: mpsc::UnboundedSender<i32>,
    broken: bool,
}

impl AsyncWrite for FakeStdin {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut journal = this.journal.lock().expect("encoder journal lock");
        let over_limit = this
            .script
            .fail_writes_after
            .is_some_and(|limit| journal.frames.len() >= limit);
        if this.broken || over_limit {
            if !this.broken {
                this.broken = true;
                if let Some(code) = this.script.exit_code_on_write_failure {
                    let _ = this.exit_tx.send(code);
                }
            }
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "fake encoder stopped reading",
            )));
        }
        journal.frames.push(buf.to_vec());
        journal.frame_instants.push(Instant::now());
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        {
            let mut journal = this.journal.lock().expect("encoder journal lock");
            journal.shutdowns += 1;
            journal.closed_at = Some(Instant::now());
        }
        if this.script.fail_close {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "fake encoder input already closed",
            )));
        }
        let _ = this.exit_tx.send(this.script.exit_code_on_close);
        Poll::Ready(Ok(()))
    }
}
