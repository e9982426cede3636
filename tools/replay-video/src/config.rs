use crate::errors::RecorderError;
use crate::runtime::{FileSystem, SurfaceOptions, Viewport};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_OUTPUT: &str = "replay-video-output.mp4";
pub const MAX_FPS: u32 = 1000;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub player_config_path: Option<PathBuf>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub fps: Option<u32>,
    pub headful: bool,
    pub start_delay_ms: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub autoplay: bool,
    pub encoder: Option<String>,
    pub browser: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    pub recording: RecordingConfig,
    pub browser: BrowserConfig,
    pub encoder: EncoderConfig,
    pub player: PlayerOptions,
    pub assets: AssetsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    pub fps: u32,
    pub input: PathBuf,
    pub output: PathBuf,
    pub start_delay_ms: u64,
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserConfig {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub load_timeout_secs: u64,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncoderConfig {
    pub program: String,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetsConfig {
    pub player_script: PathBuf,
    pub player_style: PathBuf,
    pub player_global: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
}

/// Display options handed to the in-page player untouched. Only a few keys
/// are read on this side: `width`/`height` pick the capture region and the
/// window size, `autoPlay` removes the start delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct PlayerOptions(pub Map<String, Value>);

impl PlayerOptions {
    pub fn width(&self) -> Option<u64> {
        self.0.get("width").and_then(Value::as_u64)
    }

    pub fn height(&self) -> Option<u64> {
        self.0.get("height").and_then(Value::as_u64)
    }

    pub fn auto_play(&self) -> bool {
        self.0
            .get("autoPlay")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_explicit_size(&self) -> bool {
        self.width().is_some() && self.height().is_some()
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn merge(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key, value);
        }
    }

    /// Options as the player receives them: built-in defaults first, then
    /// everything configured.
    pub fn merged_with_defaults(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        merged.insert("showController".to_string(), Value::Bool(false));
        merged.insert("autoPlay".to_string(), Value::Bool(false));
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recording: RecordingConfig {
                fps: 15,
                input: PathBuf::from("events.json"),
                output: PathBuf::from(DEFAULT_OUTPUT),
                start_delay_ms: 1000,
                max_duration_secs: None,
            },
            browser: BrowserConfig {
                headless: true,
                executable: None,
                load_timeout_secs: 30,
                extra_args: Vec::new(),
            },
            encoder: EncoderConfig {
                program: "ffmpeg".to_string(),
                queue_depth: 8,
            },
            player: PlayerOptions::default(),
            assets: AssetsConfig {
                player_script: PathBuf::from("node_modules/rrweb-player/dist/index.js"),
                player_style: PathBuf::from("node_modules/rrweb-player/dist/style.css"),
                player_global: "rrwebPlayer".to_string(),
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: crate::logging::DEFAULT_MAX_PAYLOAD_BYTES,
            },
        }
    }
}

impl RecorderConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.recording.start_delay_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.recording.max_duration_secs.map(Duration::from_secs)
    }

    pub fn surface_options(&self) -> SurfaceOptions {
        let viewport = match (self.player.width(), self.player.height()) {
            (Some(width), Some(height)) => Some(Viewport {
                width: u32::try_from(width).unwrap_or(u32::MAX),
                height: u32::try_from(height).unwrap_or(u32::MAX),
            }),
            _ => None,
        };
        SurfaceOptions {
            headless: self.browser.headless,
            viewport,
            load_timeout: Duration::from_secs(self.browser.load_timeout_secs),
        }
    }

    pub fn resolved_output(&self, cwd: &Path) -> PathBuf {
        absolutize_path(cwd, &self.recording.output)
    }

    pub fn resolved_input(&self, cwd: &Path) -> PathBuf {
        absolutize_path(cwd, &self.recording.input)
    }
}

/// Capture cadence for `fps`: 1000/fps milliseconds.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecorderConfig {
    recording: Option<PartialRecordingConfig>,
    browser: Option<PartialBrowserConfig>,
    encoder: Option<PartialEncoderConfig>,
    player: Option<Map<String, Value>>,
    assets: Option<PartialAssetsConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    fps: Option<u32>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    #[serde(alias = "startDelayTime")]
    start_delay_ms: Option<u64>,
    max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialBrowserConfig {
    headless: Option<bool>,
    executable: Option<PathBuf>,
    load_timeout_secs: Option<u64>,
    extra_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialEncoderConfig {
    program: Option<String>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAssetsConfig {
    player_script: Option<PathBuf>,
    player_style: Option<PathBuf>,
    player_global: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
}

pub fn load_config(
    overrides: &CliOverrides,
    fs: &dyn FileSystem,
) -> Result<RecorderConfig, RecorderError> {
    let mut cfg = RecorderConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial = parse_partial(&file_contents)?;
        merge_partial_config(&mut cfg, partial);
    }

    if let Some(path) = &overrides.player_config_path {
        let text = fs.read_to_string(path)?;
        let player: Map<String, Value> = serde_json::from_str(&text).map_err(|e| {
            RecorderError::ConfigParse(format!("player config {}: {e}", path.display()))
        })?;
        cfg.player.merge(player);
    }

    take_player_start_delay(&mut cfg)?;
    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config_str(text: &str) -> Result<RecorderConfig, RecorderError> {
    let mut cfg = RecorderConfig::default();
    merge_partial_config(&mut cfg, parse_partial(text)?);
    take_player_start_delay(&mut cfg)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn parse_partial(text: &str) -> Result<PartialRecorderConfig, RecorderError> {
    toml::from_str(text).map_err(|e| RecorderError::ConfigParse(e.to_string()))
}

fn merge_partial_config(cfg: &mut RecorderConfig, partial: PartialRecorderConfig) {
    if let Some(recording) = partial.recording {
        if let Some(value) = recording.fps {
            cfg.recording.fps = value;
        }
        if let Some(value) = recording.input {
            cfg.recording.input = value;
        }
        if let Some(value) = recording.output {
            cfg.recording.output = value;
        }
        if let Some(value) = recording.start_delay_ms {
            cfg.recording.start_delay_ms = value;
        }
        if let Some(value) = recording.max_duration_secs {
            cfg.recording.max_duration_secs = Some(value);
        }
    }

    if let Some(browser) = partial.browser {
        if let Some(value) = browser.headless {
            cfg.browser.headless = value;
        }
        if let Some(value) = browser.executable {
            cfg.browser.executable = Some(value);
        }
        if let Some(value) = browser.load_timeout_secs {
            cfg.browser.load_timeout_secs = value;
        }
        if let Some(value) = browser.extra_args {
            cfg.browser.extra_args = value;
        }
    }

    if let Some(encoder) = partial.encoder {
        if let Some(value) = encoder.program {
            cfg.encoder.program = value;
        }
        if let Some(value) = encoder.queue_depth {
            cfg.encoder.queue_depth = value;
        }
    }

    if let Some(player) = partial.player {
        cfg.player.merge(player);
    }

    if let Some(assets) = partial.assets {
        if let Some(value) = assets.player_script {
            cfg.assets.player_script = value;
        }
        if let Some(value) = assets.player_style {
            cfg.assets.player_style = value;
        }
        if let Some(value) = assets.player_global {
            cfg.assets.player_global = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
    }
}

/// `startDelayTime` given among the player options sets the recording's
/// start delay; it is not forwarded as a player option.
fn take_player_start_delay(cfg: &mut RecorderConfig) -> Result<(), RecorderError> {
    let Some(value) = cfg.player.0.remove("startDelayTime") else {
        return Ok(());
    };
    cfg.recording.start_delay_ms = value.as_u64().ok_or_else(|| {
        RecorderError::InvalidConfig(
            "player.startDelayTime must be a non-negative integer of milliseconds".to_string(),
        )
    })?;
    Ok(())
}

fn apply_cli_overrides(cfg: &mut RecorderConfig, overrides: &CliOverrides) {
    if let Some(input) = &overrides.input {
        cfg.recording.input = input.clone();
    }
    if let Some(output) = &overrides.output {
        cfg.recording.output = output.clone();
    }
    if let Some(fps) = overrides.fps {
        cfg.recording.fps = fps;
    }
    if overrides.headful {
        cfg.browser.headless = false;
    }
    if let Some(delay) = overrides.start_delay_ms {
        cfg.recording.start_delay_ms = delay;
    }
    if let Some(width) = overrides.width {
        cfg.player.set("width", Value::from(width));
    }
    if let Some(height) = overrides.height {
        cfg.player.set("height", Value::from(height));
    }
    if overrides.autoplay {
        cfg.player.set("autoPlay", Value::Bool(true));
    }
    if let Some(program) = &overrides.encoder {
        cfg.encoder.program = program.clone();
    }
    if let Some(browser) = &overrides.browser {
        cfg.browser.executable = Some(browser.clone());
    }
    if let Some(path) = &overrides.log_file {
        cfg.logging.path = Some(path.clone());
    }
    if let Some(secs) = overrides.max_duration_secs {
        cfg.recording.max_duration_secs = Some(secs);
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &RecorderConfig) -> Result<(), RecorderError> {
    if cfg.recording.fps == 0 || cfg.recording.fps > MAX_FPS {
        return Err(RecorderError::InvalidConfig(format!(
            "recording.fps must be between 1 and {MAX_FPS}"
        )));
    }

    if cfg.recording.output.as_os_str().is_empty() {
        return Err(RecorderError::InvalidConfig(
            "recording.output must not be empty".to_string(),
        ));
    }

    if cfg.encoder.program.trim().is_empty() {
        return Err(RecorderError::InvalidConfig(
            "encoder.program must not be empty".to_string(),
        ));
    }

    if cfg.encoder.queue_depth == 0 {
        return Err(RecorderError::InvalidConfig(
            "encoder.queue_depth must be greater than zero".to_string(),
        ));
    }

    for key in ["width", "height"] {
        if let Some(value) = cfg.player.0.get(key) {
            if value.as_u64().map_or(true, |v| v == 0 || v > u64::from(u32::MAX)) {
                return Err(RecorderError::InvalidConfig(format!(
                    "player.{key} must be a positive integer"
                )));
            }
        }
    }

    if cfg.recording.max_duration_secs == Some(0) {
        return Err(RecorderError::InvalidConfig(
            "recording.max_duration_secs must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}
