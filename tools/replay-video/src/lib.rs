pub mod bridge;
pub mod capture;
pub mod chrome;
pub mod config;
pub mod console_tap;
pub mod encoder;
pub mod errors;
pub mod fsm;
pub mod latch;
pub mod logging;
pub mod orchestrator;
pub mod payload;
pub mod runtime;
pub mod trace;
pub mod types;

use chrome::ChromeHost;
use clap::{error::ErrorKind, Parser};
use config::{load_config, CliOverrides, RecorderConfig};
use errors::RecorderError;
use logging::{JsonlLogger, LogSink, StderrLogSink};
use orchestrator::Recorder;
use runtime::{FileSystem, ProcessEncoderLauncher, ProductionFileSystem, RecorderRuntime};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
#[command(name = "replay-video")]
#[command(about = "Render a recorded session trace into a video file")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub input: Option<PathBuf>,
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[arg(long, default_value_t = false)]
    pub headful: bool,
    #[arg(long = "start-delay-ms")]
    pub start_delay_ms: Option<u64>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long, default_value_t = false)]
    pub autoplay: bool,
    #[arg(long = "player-config")]
    pub player_config: Option<PathBuf>,
    #[arg(long)]
    pub encoder: Option<String>,
    #[arg(long)]
    pub browser: Option<PathBuf>,
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
    #[arg(long = "max-duration-secs")]
    pub max_duration_secs: Option<u64>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config_path: self.config.clone(),
            player_config_path: self.player_config.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            fps: self.fps,
            headful: self.headful,
            start_delay_ms: self.start_delay_ms,
            width: self.width,
            height: self.height,
            autoplay: self.autoplay,
            encoder: self.encoder.clone(),
            browser: self.browser.clone(),
            log_file: self.log_file.clone(),
            max_duration_secs: self.max_duration_secs,
        }
    }
}

pub fn run() -> Result<i32, RecorderError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let mut stdout = std::io::stdout();
    run_with_runtime(
        &args,
        Arc::new(ProductionFileSystem),
        production_runtime,
        &mut stdout,
    )
}

/// Parses `args`, loads configuration through `file_system`, and performs one
/// recording on a current-thread runtime with the seams `build_runtime`
/// returns. The absolute output path is printed on success.
pub fn run_with_runtime<F>(
    args: &[OsString],
    file_system: Arc<dyn FileSystem>,
    build_runtime: F,
    stdout: &mut dyn Write,
) -> Result<i32, RecorderError>
where
    F: FnOnce(&RecorderConfig, Arc<dyn FileSystem>) -> Result<RecorderRuntime, RecorderError>,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write!(stdout, "{error}").map_err(|e| RecorderError::Io(e.to_string()))?;
                return Ok(0);
            }
            _ => return Err(RecorderError::Cli(error.to_string())),
        },
    };

    let config = load_config(&cli.overrides(), file_system.as_ref())?;
    let runtime = build_runtime(&config, file_system)?;
    let executor = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RecorderError::Io(e.to_string()))?;

    let recorder = Recorder::new(config, runtime);
    let output = executor.block_on(recorder.run())?;
    writeln!(stdout, "{}", output.display()).map_err(|e| RecorderError::Io(e.to_string()))?;
    Ok(0)
}

pub fn production_runtime(
    config: &RecorderConfig,
    file_system: Arc<dyn FileSystem>,
) -> Result<RecorderRuntime, RecorderError> {
    let log: Arc<dyn LogSink> = match &config.logging.path {
        Some(path) => Arc::new(
            JsonlLogger::new(path).with_max_payload_bytes(config.logging.max_payload_bytes),
        ),
        None => Arc::new(StderrLogSink::default()),
    };
    Ok(RecorderRuntime {
        file_system,
        render_host: Arc::new(ChromeHost::from_config(&config.browser, log.clone())),
        encoder_launcher: Arc::new(ProcessEncoderLauncher),
        log,
    })
}
