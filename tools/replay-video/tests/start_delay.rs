use replay_video::config::RecorderConfig;
use replay_video::logging::MemoryLogSink;
use replay_video::orchestrator::Recorder;
use replay_video::payload;
use replay_video::runtime::fake::{
    FakeEncoderLauncher, FakeEncoderScript, FakeFileSystem, FakePageScript, FakeRenderHost,
};
use replay_video::runtime::RecorderRuntime;
use std::sync::Arc;
use std::time::Duration;

const TWO_CLICKS: &str = include_str!("fixtures/two-clicks.json");

fn runtime(host: &FakeRenderHost, launcher: &FakeEncoderLauncher) -> RecorderRuntime {
    let fs = FakeFileSystem::with_file("/work/events.json", TWO_CLICKS);
    fs.add_file("/work/node_modules/rrweb-player/dist/index.js", "/* player */");
    fs.add_file("/work/node_modules/rrweb-player/dist/style.css", "/* style */");
    RecorderRuntime {
        file_system: Arc::new(fs),
        render_host: Arc::new(host.clone()),
        encoder_launcher: Arc::new(launcher.clone()),
        log: Arc::new(MemoryLogSink::new()),
    }
}

#[tokio::test(start_paused = true)]
async fn playback_starts_after_the_configured_delay() {
    let host = FakeRenderHost::new(FakePageScript::plays_for(Duration::from_millis(1050)));
    let launcher = FakeEncoderLauncher::new(FakeEncoderScript::default());
    let mut config = RecorderConfig::default();
    config.recording.start_delay_ms = 500;
    config.recording.fps = 10;

    let result = Recorder::new(config, runtime(&host, &launcher)).run().await;

    assert!(result.is_ok());
    let surface = host.journal().expect("surface");
    let loaded_at = surface.loaded_at.expect("loaded");
    let started_at = surface.started_at.expect("started");
    let waited = started_at - loaded_at;
    assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
    assert!(waited < Duration::from_millis(510), "waited {waited:?}");
    assert!(!surface.captures.is_empty());
    assert!(surface.captures.iter().all(|c| c.at >= started_at));

    let settings = payload::embedded_settings(surface.html.as_deref().unwrap_or_default())
        .expect("settings embedded");
    assert_eq!(settings.start_delay_time, 500);
}

#[tokio::test(start_paused = true)]
async fn autoplay_removes_the_delay() {
    let host = FakeRenderHost::new(FakePageScript::plays_for(Duration::from_millis(550)));
    let launcher = FakeEncoderLauncher::new(FakeEncoderScript::default());
    let mut config = RecorderConfig::default();
    config.recording.start_delay_ms = 5000;
    config.player.set("autoPlay", serde_json::json!(true));

    let result = Recorder::new(config, runtime(&host, &launcher)).run().await;

    assert!(result.is_ok());
    let surface = host.journal().expect("surface");
    let waited = surface.started_at.expect("started") - surface.loaded_at.expect("loaded");
    assert!(waited < Duration::from_millis(10), "waited {waited:?}");
    assert_eq!(launcher.requests().len(), 1);
}
