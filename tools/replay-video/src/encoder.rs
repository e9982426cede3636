use crate::bridge::PageEventSink;
use crate::errors::RecorderError;
use crate::logging::LogSink;
use crate::runtime::{EncoderLauncher, EncoderStderr, EncoderStdin, ProcessRequest};
use crate::types::EncoderSignal;
use futures_util::future::BoxFuture;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// `-framerate <fps> -f image2pipe -i - -y <output>`: still images on stdin,
/// output overwritten.
pub fn encoder_args(fps: u32, output: &Path) -> Vec<String> {
    vec![
        "-framerate".to_string(),
        fps.to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-y".to_string(),
        output.display().to_string(),
    ]
}

#[derive(Debug)]
enum WriterCommand {
    Frame(Vec<u8>),
    Close,
}

#[derive(Debug, Clone)]
pub struct EncoderSettings<'a> {
    pub program: &'a str,
    pub fps: u32,
    pub output: &'a Path,
    pub queue_depth: usize,
}

/// Owns one encoder subprocess. Frames go through a bounded queue to a
/// writer task; completion is reported on the run's event queue as an
/// [`EncoderSignal`].
pub struct EncoderHandle {
    commands: mpsc::Sender<WriterCommand>,
    failed: Arc<AtomicBool>,
    close_requested: AtomicBool,
    kill_switch: Mutex<Option<oneshot::Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl EncoderHandle {
    pub fn spawn(
        launcher: &dyn EncoderLauncher,
        settings: EncoderSettings<'_>,
        events: PageEventSink,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, RecorderError> {
        let request = ProcessRequest {
            program: settings.program.to_string(),
            args: encoder_args(settings.fps, settings.output),
            cwd: None,
        };
        log.info(
            "encoder_spawn",
            json!({"program": request.program, "args": request.args}),
        );
        let child = launcher.launch(request)?;

        let failed = Arc::new(AtomicBool::new(false));
        let (commands, rx) = mpsc::channel(settings.queue_depth.max(1));

        let writer = tokio::spawn(run_writer(
            child.stdin,
            rx,
            failed.clone(),
            events.clone(),
            log.clone(),
        ));
        let mut watchers = vec![tokio::spawn(watch_exit(
            child.exit,
            failed.clone(),
            events,
            log.clone(),
        ))];
        if let Some(stderr) = child.stderr {
            watchers.push(tokio::spawn(forward_stderr(stderr, log)));
        }

        Ok(Self {
            commands,
            failed,
            close_requested: AtomicBool::new(false),
            kill_switch: Mutex::new(Some(child.kill_switch)),
            writer: Mutex::new(Some(writer)),
            watchers: Mutex::new(watchers),
        })
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Queues one frame, waiting for queue capacity.
    pub async fn write(&self, frame: Vec<u8>) -> Result<(), RecorderError> {
        if self.has_failed() {
            return Err(RecorderError::Stream(
                "encoder input already failed".to_string(),
            ));
        }
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(RecorderError::Stream("encoder input closed".to_string()));
        }
        self.commands
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| RecorderError::Stream("encoder writer stopped".to_string()))
    }

    /// Ends the input stream once. Returns whether a close was actually sent;
    /// nothing is sent after a failure.
    pub async fn close(&self) -> bool {
        if self.has_failed() || self.close_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.commands.send(WriterCommand::Close).await.is_ok()
    }

    pub fn kill(&self) {
        let switch = match self.kill_switch.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(switch) = switch {
            let _ = switch.send(());
        }
    }

    /// Waits for the exit and diagnostic watchers, then stops the writer if
    /// it is still parked on an empty queue.
    pub async fn finished(&self) {
        let watchers = match self.watchers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        for watcher in watchers {
            let _ = watcher.await;
        }
        let writer = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(writer) = writer {
            writer.abort();
            let _ = writer.await;
        }
    }
}

async fn run_writer(
    mut stdin: EncoderStdin,
    mut rx: mpsc::Receiver<WriterCommand>,
    failed: Arc<AtomicBool>,
    events: PageEventSink,
    log: Arc<dyn LogSink>,
) {
    let mut written = 0usize;
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(bytes) => {
                if let Err(e) = stdin.write_all(&bytes).await {
                    failed.store(true, Ordering::SeqCst);
                    log.error(
                        "encoder_write_failed",
                        json!({"frames_written": written, "error": e.to_string()}),
                    );
                    events.encoder(EncoderSignal::StreamError(format!(
                        "writing frame {} failed: {e}",
                        written + 1
                    )));
                    return;
                }
                written += 1;
            }
            WriterCommand::Close => {
                if let Err(e) = stdin.shutdown().await {
                    failed.store(true, Ordering::SeqCst);
                    log.error("encoder_close_failed", json!({"error": e.to_string()}));
                    events.encoder(EncoderSignal::StreamError(format!(
                        "closing encoder input failed: {e}"
                    )));
                    return;
                }
                log.info("encoder_input_closed", json!({"frames_written": written}));
                return;
            }
        }
    }
}

async fn watch_exit(
    exit: BoxFuture<'static, Result<i32, RecorderError>>,
    failed: Arc<AtomicBool>,
    events: PageEventSink,
    log: Arc<dyn LogSink>,
) {
    let signal = match exit.await {
        Ok(0) if failed.load(Ordering::SeqCst) => {
            log.info("encoder_exit", json!({"code": 0, "after_stream_error": true}));
            return;
        }
        Ok(0) => EncoderSignal::ClosedNormally,
        Ok(code) => EncoderSignal::ProcessError(format!("encoder exited with code {code}")),
        Err(e) => EncoderSignal::ProcessError(e.message().to_string()),
    };
    log.info("encoder_exit", json!({"signal": signal.as_str()}));
    events.encoder(signal);
}

/// Drains the encoder's diagnostic stream until EOF. Lines are raw bytes;
/// anything that is not UTF-8 is logged lossily and the pipe stays open.
async fn forward_stderr(stderr: EncoderStderr, log: Arc<dyn LogSink>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                log.info(
                    "encoder_stderr",
                    json!({"line": line.trim_end_matches(['\r', '\n'])}),
                );
            }
            Err(e) => {
                log.warn("encoder_stderr_failed", json!({"error": e.to_string()}));
                break;
            }
        }
    }
}
