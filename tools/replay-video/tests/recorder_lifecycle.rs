use replay_video::config::RecorderConfig;
use replay_video::errors::{ErrorKind, RecorderError};
use replay_video::logging::MemoryLogSink;
use replay_video::orchestrator::{Recorder, RunReport};
use replay_video::runtime::fake::{
    CaptureFailures, FakeEncoderLauncher, FakeEncoderScript, FakeFileSystem, FakePageScript,
    FakeRenderHost,
};
use replay_video::runtime::RecorderRuntime;
use replay_video::types::{ConsoleLevel, LifecycleState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const TWO_CLICKS: &str = include_str!("fixtures/two-clicks.json");
const EMPTY: &str = include_str!("fixtures/empty.json");
const UNCAUGHT: &str = "Replayer Uncaught Error: Cannot read property 'x' of undefined";

struct Harness {
    fs: FakeFileSystem,
    host: FakeRenderHost,
    launcher: FakeEncoderLauncher,
    log: Arc<MemoryLogSink>,
}

fn harness(trace: Option<&str>, page: FakePageScript, encoder: FakeEncoderScript) -> Harness {
    let fs = FakeFileSystem::default().with_cwd("/work");
    if let Some(trace) = trace {
        fs.add_file("/work/events.json", trace);
    }
    fs.add_file(
        "/work/node_modules/rrweb-player/dist/index.js",
        "window.rrwebPlayer = function () {};",
    );
    fs.add_file("/work/node_modules/rrweb-player/dist/style.css", ".rr-player {}");
    Harness {
        fs,
        host: FakeRenderHost::new(page),
        launcher: FakeEncoderLauncher::new(encoder),
        log: Arc::new(MemoryLogSink::new()),
    }
}

impl Harness {
    async fn run(&self, config: RecorderConfig) -> RunReport {
        let runtime = RecorderRuntime {
            file_system: Arc::new(self.fs.clone()),
            render_host: Arc::new(self.host.clone()),
            encoder_launcher: Arc::new(self.launcher.clone()),
            log: self.log.clone(),
        };
        Recorder::new(config, runtime).run_with_report().await
    }

    fn close_count(&self) -> usize {
        self.host.journal().map(|j| j.close_count).unwrap_or_default()
    }
}

fn config_with_fps(fps: u32) -> RecorderConfig {
    let mut config = RecorderConfig::default();
    config.recording.fps = fps;
    config
}

fn error_kind(outcome: &Result<PathBuf, RecorderError>) -> Option<ErrorKind> {
    outcome.as_ref().err().map(RecorderError::kind)
}

#[tokio::test(start_paused = true)]
async fn two_click_trace_records_to_absolute_output() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(2050)),
        FakeEncoderScript::default(),
    );
    let mut config = config_with_fps(10);
    config.recording.output = PathBuf::from("out.mp4");

    let report = h.run(config).await;

    assert_eq!(report.result, Ok(PathBuf::from("/work/out.mp4")));
    assert_eq!(report.final_state, LifecycleState::Closed);
    assert!(report.discarded.is_empty());

    let requests = h.launcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].program, "ffmpeg");
    assert_eq!(
        requests[0].args,
        vec!["-framerate", "10", "-f", "image2pipe", "-i", "-", "-y", "/work/out.mp4"]
    );

    let surface = h.host.journal().expect("surface opened");
    let encoder = h.launcher.journal();
    let finished_at = surface.finished_at.expect("finish signalled");
    assert!(!encoder.frames.is_empty());
    assert!(encoder.frame_instants[0] < finished_at);
    assert_eq!(encoder.shutdowns, 1);
    assert!(encoder.closed_at.expect("closed") >= finished_at);
    assert_eq!(encoder.kills, 0);
    assert_eq!(surface.close_count, 1);
    assert_eq!(report.capture.frames_written, encoder.frames.len());
    assert!(surface
        .captures
        .iter()
        .all(|capture| capture.selector == ".replayer-wrapper"));
}

#[tokio::test(start_paused = true)]
async fn bindings_are_exposed_before_content_loads() {
    let h = harness(Some(TWO_CLICKS), FakePageScript::default(), FakeEncoderScript::default());
    h.run(RecorderConfig::default()).await;

    let calls = h.host.journal().expect("surface").calls;
    assert_eq!(
        &calls[..3],
        &[
            "expose_binding:onReplayStart".to_string(),
            "expose_binding:onReplayFinish".to_string(),
            "set_content".to_string(),
        ]
    );
    assert_eq!(calls.last().map(String::as_str), Some("close"));
}

#[tokio::test(start_paused = true)]
async fn explicit_size_switches_the_capture_region() {
    let h = harness(Some(TWO_CLICKS), FakePageScript::default(), FakeEncoderScript::default());
    let mut config = RecorderConfig::default();
    config.player.set("width", serde_json::json!(800));
    config.player.set("height", serde_json::json!(450));

    let report = h.run(config).await;

    assert!(report.result.is_ok());
    let surface = h.host.journal().expect("surface");
    assert!(surface.captures.iter().all(|c| c.selector == ".rr-player"));
    let options = h.host.last_options().expect("options");
    assert_eq!(options.viewport.map(|v| (v.width, v.height)), Some((800, 450)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_stream_and_process_errors_resolve_once() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::default(),
        FakeEncoderScript {
            fail_writes_after: Some(2),
            exit_code_on_write_failure: Some(1),
            ..FakeEncoderScript::default()
        },
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::StreamError));
    let discarded_kinds = report
        .discarded
        .iter()
        .map(error_kind)
        .collect::<Vec<_>>();
    assert_eq!(discarded_kinds, vec![Some(ErrorKind::ProcessError)]);
    assert_eq!(h.log.events_of("run_resolved").len(), 1);
    assert_eq!(h.log.events_of("outcome_discarded").len(), 1);
    assert_eq!(h.close_count(), 1);
    assert_eq!(h.launcher.journal().shutdowns, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_input_close_after_finish_is_a_stream_error() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(2050)),
        FakeEncoderScript {
            fail_close: true,
            ..FakeEncoderScript::default()
        },
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::StreamError));
    assert_eq!(report.final_state, LifecycleState::Closed);
    assert!(report.capture.closed_encoder);
    assert!(report.discarded.iter().all(Result::is_err));
    assert_eq!(h.launcher.journal().shutdowns, 1);
    assert_eq!(h.close_count(), 1);
    assert_eq!(h.log.events_of("run_resolved").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_captures_do_not_end_the_run() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(2050))
            .with_capture_failures(CaptureFailures::First(8)),
        FakeEncoderScript::default(),
    );

    let report = h.run(config_with_fps(10)).await;

    assert_eq!(report.result, Ok(PathBuf::from("/work/replay-video-output.mp4")));
    assert!(report.capture.misses >= 8);
    assert!(report.capture.frames_written > 0);
    assert_eq!(h.launcher.journal().shutdowns, 1);
}

#[tokio::test(start_paused = true)]
async fn every_capture_failing_still_waits_for_finish() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(1550))
            .with_capture_failures(CaptureFailures::All),
        FakeEncoderScript::default(),
    );

    let report = h.run(config_with_fps(10)).await;

    assert!(report.result.is_ok());
    assert_eq!(report.capture.frames_written, 0);
    assert!(report.capture.misses >= 15);
    let surface = h.host.journal().expect("surface");
    assert!(surface.finished_at.is_some());
    assert_eq!(h.log.events_of("capture_miss").len(), report.capture.misses);
}

#[tokio::test(start_paused = true)]
async fn error_marker_before_start_closes_from_idle() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::never_starts().with_console(
            Duration::from_millis(100),
            ConsoleLevel::Error,
            UNCAUGHT,
        ),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(
        report.result,
        Err(RecorderError::Render(
            "Cannot read property 'x' of undefined".to_string()
        ))
    );
    assert_eq!(report.final_state, LifecycleState::Closed);
    assert!(h.launcher.requests().is_empty());
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn error_marker_while_recording_tears_down_the_encoder() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_secs(10)).with_console(
            Duration::from_millis(1500),
            ConsoleLevel::Error,
            UNCAUGHT,
        ),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::RenderError));
    let encoder = h.launcher.journal();
    assert_eq!(encoder.kills, 1);
    assert_eq!(encoder.shutdowns, 0);
    assert!(report
        .discarded
        .iter()
        .all(|outcome| error_kind(outcome) == Some(ErrorKind::ProcessError)));
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn error_marker_preempts_a_pending_success() {
    // finish lands at 3050ms; the encoder is only closed on the 3100ms tick
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(2050)).with_console(
            Duration::from_millis(3060),
            ConsoleLevel::Error,
            UNCAUGHT,
        ),
        FakeEncoderScript::default(),
    );

    let report = h.run(config_with_fps(10)).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::RenderError));
    assert_eq!(h.launcher.journal().shutdowns, 0);
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_error_console_lines_are_ignored() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::default()
            .with_console(Duration::from_millis(10), ConsoleLevel::Warning, UNCAUGHT)
            .with_console(Duration::from_millis(20), ConsoleLevel::Error, "ResizeObserver loop"),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert!(report.result.is_ok());
    assert_eq!(h.log.events_of("page_console").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_trace_is_a_render_error_not_a_setup_error() {
    let h = harness(Some(EMPTY), FakePageScript::default(), FakeEncoderScript::default());

    let report = h.run(RecorderConfig::default()).await;

    match &report.result {
        Err(RecorderError::Render(message)) => {
            assert!(message.contains("Replayer need at least 2 events"))
        }
        other => panic!("expected render error, got {other:?}"),
    }
    assert_eq!(h.host.open_count(), 1);
    assert!(h.launcher.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_encoder_binary_is_a_process_error() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::default(),
        FakeEncoderScript {
            spawn_error: Some("No such file or directory (os error 2)".to_string()),
            ..FakeEncoderScript::default()
        },
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::ProcessError));
    assert_eq!(report.final_state, LifecycleState::Closed);
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_or_malformed_trace_never_opens_a_surface() {
    for trace in [None, Some("{\"events\": ["), Some("not json")] {
        let h = harness(trace, FakePageScript::default(), FakeEncoderScript::default());

        let report = h.run(RecorderConfig::default()).await;

        assert_eq!(error_kind(&report.result), Some(ErrorKind::SetupError));
        assert_eq!(report.final_state, LifecycleState::Idle);
        assert_eq!(h.host.open_count(), 0);
        assert!(h.launcher.requests().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn missing_player_bundle_is_a_setup_error() {
    let h = harness(Some(TWO_CLICKS), FakePageScript::default(), FakeEncoderScript::default());
    let mut config = RecorderConfig::default();
    config.assets.player_script = PathBuf::from("vendor/missing.js");

    let report = h.run(config).await;

    match &report.result {
        Err(RecorderError::Setup(message)) => assert!(message.contains("/work/vendor/missing.js")),
        other => panic!("expected setup error, got {other:?}"),
    }
    assert_eq!(h.host.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unavailable_renderer_is_a_setup_error() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::failing_open("no rendering capability available"),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(
        report.result,
        Err(RecorderError::Setup(
            "no rendering capability available".to_string()
        ))
    );
    assert!(h.launcher.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn content_load_failure_still_releases_the_surface() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::failing_content("document did not load within 30s"),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::SetupError));
    assert_eq!(h.close_count(), 1);
    assert!(h.launcher.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finish_before_start_is_an_abnormal_finish() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::finishing_without_start(),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert_eq!(
        report.result,
        Err(RecorderError::Render(
            "replay finished before playback started".to_string()
        ))
    );
    assert!(h.launcher.requests().is_empty());
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_bridge_signals_are_ignored() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::plays_for(Duration::from_millis(2050)).with_duplicate_signals(),
        FakeEncoderScript::default(),
    );

    let report = h.run(RecorderConfig::default()).await;

    assert!(report.result.is_ok());
    assert_eq!(h.launcher.requests().len(), 1);
    assert_eq!(h.log.events_of("bridge_signal_ignored").len(), 2);
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn page_that_never_finishes_times_out_when_bounded() {
    let h = harness(
        Some(TWO_CLICKS),
        FakePageScript::never_finishes(),
        FakeEncoderScript::default(),
    );
    let mut config = RecorderConfig::default();
    config.recording.max_duration_secs = Some(5);

    let report = h.run(config).await;

    assert_eq!(error_kind(&report.result), Some(ErrorKind::Timeout));
    assert_eq!(h.launcher.journal().kills, 1);
    assert_eq!(h.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_is_logged_in_order() {
    let h = harness(Some(TWO_CLICKS), FakePageScript::default(), FakeEncoderScript::default());
    h.run(RecorderConfig::default()).await;

    let states = h
        .log
        .events_of("state")
        .into_iter()
        .map(|event| event.payload["to"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(states, vec!["recording", "closed"]);
    let finished = h.log.events_of("run_finished");
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].payload["outcome"]["ok"], true);
}
