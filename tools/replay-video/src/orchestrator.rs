//! One end-to-end conversion: trace in, video path (or one error) out.
//!
//! Every asynchronous source (page bindings, page console, encoder
//! completion) feeds the same inbound queue. A single control loop consumes
//! it, drives the [`Lifecycle`], and resolves the [`ResultLatch`]; the first
//! outcome wins and anything arriving later is reported as discarded.

use crate::bridge::{PageEventSink, PlaybackBridge};
use crate::capture::{CaptureStats, FrameCaptureLoop};
use crate::config::RecorderConfig;
use crate::console_tap::ConsoleErrorTap;
use crate::encoder::{EncoderHandle, EncoderSettings};
use crate::errors::RecorderError;
use crate::fsm::Lifecycle;
use crate::latch::{ResultLatch, RunOutcome};
use crate::logging::LogSink;
use crate::payload::{capture_selector, load_assets, render_html};
use crate::runtime::{RecorderRuntime, RenderSurface};
use crate::trace::load_trace;
use crate::types::{EncoderSignal, LifecycleState, PlaybackSignal, RecorderEvent};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub result: RunOutcome,
    pub final_state: LifecycleState,
    /// Outcomes that reached the latch after it was resolved.
    pub discarded: Vec<RunOutcome>,
    pub capture: CaptureStats,
}

pub struct Recorder {
    config: RecorderConfig,
    runtime: RecorderRuntime,
}

impl Recorder {
    pub fn new(config: RecorderConfig, runtime: RecorderRuntime) -> Self {
        Self { config, runtime }
    }

    pub async fn run(&self) -> Result<PathBuf, RecorderError> {
        self.run_with_report().await.result
    }

    pub async fn run_with_report(&self) -> RunReport {
        let log = self.runtime.log.clone();
        let latch = ResultLatch::new();
        let (tx, mut inbox) = mpsc::unbounded_channel();

        let cwd = match self.runtime.file_system.current_dir() {
            Ok(cwd) => cwd,
            Err(e) => {
                return setup_failure(&latch, log.as_ref(), RecorderError::Setup(e.message().to_string()))
            }
        };
        let input = self.config.resolved_input(&cwd);
        let output = self.config.resolved_output(&cwd);
        log.info(
            "run_started",
            json!({
                "input": input.display().to_string(),
                "output": output.display().to_string(),
                "fps": self.config.recording.fps,
                "headless": self.config.browser.headless,
            }),
        );

        let document = match self.prepare_document(&input, &cwd) {
            Ok(document) => document,
            Err(e) => return setup_failure(&latch, log.as_ref(), e),
        };

        let sink = PageEventSink::new(tx);
        let surface = match self
            .runtime
            .render_host
            .open(self.config.surface_options(), sink.clone())
            .await
        {
            Ok(surface) => surface,
            Err(e) => return setup_failure(&latch, log.as_ref(), e),
        };

        let mut session = RunSession {
            config: &self.config,
            runtime: &self.runtime,
            output,
            latch,
            lifecycle: Lifecycle::new(),
            bridge: PlaybackBridge,
            tap: ConsoleErrorTap,
            sink,
            surface: Some(surface),
            encoder: None,
            capture: None,
            discarded: Vec::new(),
        };

        if let Err(e) = session.load_document(&document).await {
            session.lifecycle.force_close(e.message());
            session.resolve(Err(e));
        } else {
            session.control_loop(&mut inbox).await;
        }
        session.finish(&mut inbox).await
    }

    fn prepare_document(&self, input: &Path, cwd: &Path) -> Result<String, RecorderError> {
        let fs = self.runtime.file_system.as_ref();
        let trace = load_trace(fs, input)?;
        self.runtime.log.info(
            "trace_loaded",
            json!({"path": input.display().to_string(), "events": trace.event_count()}),
        );
        let assets = load_assets(fs, &self.config.assets, cwd)?;
        render_html(&trace, &self.config.player, self.config.start_delay(), &assets)
    }
}

fn setup_failure(latch: &ResultLatch, log: &dyn LogSink, error: RecorderError) -> RunReport {
    log.error("setup_failed", outcome_payload(&Err(error.clone())));
    latch.try_resolve(Err(error.clone()));
    RunReport {
        result: latch.get().unwrap_or(Err(error)),
        final_state: LifecycleState::Idle,
        discarded: Vec::new(),
        capture: CaptureStats::default(),
    }
}

fn outcome_payload(outcome: &RunOutcome) -> Value {
    match outcome {
        Ok(path) => json!({"ok": true, "output": path.display().to_string()}),
        Err(e) => json!({"ok": false, "kind": e.kind().as_str(), "message": e.message()}),
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

struct RunSession<'a> {
    config: &'a RecorderConfig,
    runtime: &'a RecorderRuntime,
    output: PathBuf,
    latch: ResultLatch,
    lifecycle: Lifecycle,
    bridge: PlaybackBridge,
    tap: ConsoleErrorTap,
    sink: PageEventSink,
    surface: Option<Arc<dyn RenderSurface>>,
    encoder: Option<Arc<EncoderHandle>>,
    capture: Option<JoinHandle<CaptureStats>>,
    discarded: Vec<RunOutcome>,
}

impl RunSession<'_> {
    fn log(&self) -> &dyn LogSink {
        self.runtime.log.as_ref()
    }

    async fn load_document(&mut self, document: &str) -> Result<(), RecorderError> {
        let Some(surface) = self.surface.clone() else {
            return Err(RecorderError::Setup("surface already released".to_string()));
        };
        for binding in self.bridge.bindings() {
            surface.expose_binding(binding).await?;
        }
        surface.set_content(document).await?;
        self.log().info("document_loaded", json!({"bytes": document.len()}));
        Ok(())
    }

    async fn control_loop(&mut self, inbox: &mut mpsc::UnboundedReceiver<RecorderEvent>) {
        let limit = self.config.max_duration();
        let deadline = limit.map(|limit| Instant::now() + limit);

        while !self.latch.is_resolved() {
            let event = tokio::select! {
                event = inbox.recv() => event,
                _ = deadline_elapsed(deadline) => {
                    let secs = limit.map(|limit| limit.as_secs()).unwrap_or_default();
                    self.abnormal_finish(RecorderError::Timeout(format!(
                        "no outcome within {secs}s"
                    )))
                    .await;
                    continue;
                }
            };
            match event {
                Some(event) => self.dispatch(event).await,
                None => break,
            }
        }
    }

    async fn dispatch(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Binding { name, payload } => match self.bridge.signal_for(&name) {
                Some(signal) => {
                    self.log().info(
                        "bridge_signal",
                        json!({
                            "signal": signal.as_str(),
                            "payload": payload,
                            "state": self.lifecycle.state().as_str(),
                        }),
                    );
                    self.on_playback(signal).await;
                }
                None => self.log().warn("unknown_binding", json!({"name": name})),
            },
            RecorderEvent::Console(message) => {
                self.log().debug(
                    "page_console",
                    json!({"level": message.level, "text": message.text}),
                );
                if let Some(error) = self.tap.inspect(&message) {
                    self.log()
                        .error("console_error_detected", json!({"message": error.message()}));
                    self.abnormal_finish(error).await;
                }
            }
            RecorderEvent::Encoder(signal) => {
                self.log()
                    .info("encoder_signal", json!({"signal": signal.as_str()}));
                match self.outcome_of(signal) {
                    Ok(path) => self.resolve(Ok(path)),
                    Err(e) => self.abnormal_finish(e).await,
                }
            }
        }
    }

    async fn on_playback(&mut self, signal: PlaybackSignal) {
        match (signal, self.lifecycle.state()) {
            (PlaybackSignal::Started, LifecycleState::Idle) => self.start_recording().await,
            (PlaybackSignal::Finished, LifecycleState::Recording) => {
                if let Err(e) = self.lifecycle.on_playback_finished() {
                    self.abnormal_finish(e).await;
                    return;
                }
                self.log_transition(LifecycleState::Recording, LifecycleState::Closed);
                self.release_surface().await;
            }
            (PlaybackSignal::Finished, LifecycleState::Idle) => {
                self.abnormal_finish(RecorderError::Render(
                    "replay finished before playback started".to_string(),
                ))
                .await;
            }
            (signal, state) => self.log().warn(
                "bridge_signal_ignored",
                json!({"signal": signal.as_str(), "state": state.as_str()}),
            ),
        }
    }

    async fn start_recording(&mut self) {
        if let Err(e) = self.lifecycle.on_playback_started() {
            self.abnormal_finish(e).await;
            return;
        }
        self.log_transition(LifecycleState::Idle, LifecycleState::Recording);

        let spawned = EncoderHandle::spawn(
            self.runtime.encoder_launcher.as_ref(),
            EncoderSettings {
                program: &self.config.encoder.program,
                fps: self.config.recording.fps,
                output: &self.output,
                queue_depth: self.config.encoder.queue_depth,
            },
            self.sink.clone(),
            self.runtime.log.clone(),
        );
        let encoder = match spawned {
            Ok(encoder) => Arc::new(encoder),
            Err(e) => {
                self.abnormal_finish(e).await;
                return;
            }
        };
        self.encoder = Some(encoder.clone());

        let Some(surface) = self.surface.clone() else {
            return;
        };
        let selector = capture_selector(&self.config.player);
        self.log().info("capture_started", json!({"selector": selector}));
        let capture = FrameCaptureLoop::new(
            surface,
            selector,
            self.lifecycle.subscribe(),
            self.latch.clone(),
            encoder,
            self.config.recording.fps,
            self.runtime.log.clone(),
        );
        self.capture = Some(tokio::spawn(capture.run()));
    }

    /// Forces `closed`, resolves with `error` when nothing else has, and
    /// tears down the surface and the encoder.
    async fn abnormal_finish(&mut self, error: RecorderError) {
        let previous = self.lifecycle.force_close(error.message());
        self.log().error(
            "abnormal_finish",
            json!({
                "kind": error.kind().as_str(),
                "message": error.message(),
                "from": previous.as_str(),
            }),
        );
        self.resolve(Err(error));
        self.release_surface().await;
        if let Some(encoder) = &self.encoder {
            encoder.kill();
        }
    }

    fn resolve(&mut self, outcome: RunOutcome) {
        if self.latch.try_resolve(outcome.clone()) {
            self.log().info("run_resolved", outcome_payload(&outcome));
        } else {
            self.log().warn("outcome_discarded", outcome_payload(&outcome));
            self.discarded.push(outcome);
        }
    }

    fn outcome_of(&self, signal: EncoderSignal) -> RunOutcome {
        match signal {
            EncoderSignal::ClosedNormally => Ok(self.output.clone()),
            EncoderSignal::ProcessError(message) => Err(RecorderError::Process(message)),
            EncoderSignal::StreamError(message) => Err(RecorderError::Stream(message)),
        }
    }

    async fn release_surface(&mut self) {
        let Some(surface) = self.surface.take() else {
            return;
        };
        match surface.close().await {
            Ok(()) => self.log().info("surface_released", json!({})),
            Err(e) => self
                .log()
                .warn("surface_release_failed", json!({"error": e.message()})),
        }
    }

    fn log_transition(&self, from: LifecycleState, to: LifecycleState) {
        self.log()
            .info("state", json!({"from": from.as_str(), "to": to.as_str()}));
    }

    async fn finish(mut self, inbox: &mut mpsc::UnboundedReceiver<RecorderEvent>) -> RunReport {
        if self.lifecycle.state() != LifecycleState::Closed {
            let previous = self.lifecycle.force_close("run resolved before playback finished");
            self.log_transition(previous, LifecycleState::Closed);
        }
        self.release_surface().await;

        if self.latch.has_error() {
            if let Some(encoder) = &self.encoder {
                encoder.kill();
            }
        }
        let capture = match self.capture.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => CaptureStats::default(),
        };
        if let Some(encoder) = self.encoder.take() {
            encoder.finished().await;
        }

        while let Ok(event) = inbox.try_recv() {
            match event {
                RecorderEvent::Encoder(signal) => {
                    let outcome = self.outcome_of(signal);
                    self.resolve(outcome);
                }
                RecorderEvent::Console(message) => {
                    if let Some(error) = self.tap.inspect(&message) {
                        self.resolve(Err(error));
                    }
                }
                RecorderEvent::Binding { name, .. } => {
                    self.log()
                        .debug("event_after_close", json!({"binding": name}));
                }
            }
        }

        let result = self.latch.get().unwrap_or_else(|| {
            Err(RecorderError::Render(
                "run ended without an outcome".to_string(),
            ))
        });
        self.log().info(
            "run_finished",
            json!({
                "outcome": outcome_payload(&result),
                "frames_written": capture.frames_written,
                "capture_misses": capture.misses,
                "discarded": self.discarded.len(),
            }),
        );
        RunReport {
            result,
            final_state: self.lifecycle.state(),
            discarded: self.discarded,
            capture,
        }
    }
}
