//! Rendering surfaces backed by a Chromium-family browser, driven through
//! `headless_chrome`. Its API is blocking, so every call runs on tokio's
//! blocking pool.

use crate::bridge::PageEventSink;
use crate::config::BrowserConfig;
use crate::errors::RecorderError;
use crate::logging::LogSink;
use crate::runtime::{RenderHost, RenderSurface, SurfaceOptions, Viewport};
use crate::types::ConsoleLevel;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Page, Runtime};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::ffi::{OsStr, OsString};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use url::Url;

pub const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "microsoft-edge",
];

pub const DEFAULT_WINDOW: Viewport = Viewport {
    width: 1280,
    height: 900,
};

/// Height added below an explicitly sized player for its controller bar.
const CONTROLLER_ALLOWANCE: u32 = 80;
/// The browser is torn down if it sends nothing for this long.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

pub struct ChromeHost {
    executable: Option<PathBuf>,
    extra_args: Vec<String>,
    log: Arc<dyn LogSink>,
}

impl ChromeHost {
    pub fn from_config(browser: &BrowserConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            executable: browser.executable.clone(),
            extra_args: browser.extra_args.clone(),
            log,
        }
    }

    pub fn discover(&self) -> Result<PathBuf, RecorderError> {
        discover_browser(
            self.executable.as_deref(),
            std::env::var_os("CHROME_PATH"),
            std::env::var_os("PATH"),
        )
        .ok_or_else(|| RecorderError::Setup("no rendering capability available".to_string()))
    }
}

/// Configured path first, then `CHROME_PATH`, then the usual names on `PATH`.
pub fn discover_browser(
    configured: Option<&Path>,
    chrome_path: Option<OsString>,
    path_var: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(configured) = configured {
        return configured.is_file().then(|| configured.to_path_buf());
    }
    if let Some(candidate) = chrome_path.map(PathBuf::from) {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let path_var = path_var?;
    for dir in std::env::split_paths(&path_var) {
        for name in BROWSER_CANDIDATES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

pub fn window_size(viewport: Option<Viewport>) -> Viewport {
    match viewport {
        Some(viewport) => Viewport {
            width: viewport.width,
            height: viewport.height.saturating_add(CONTROLLER_ALLOWANCE),
        },
        None => DEFAULT_WINDOW,
    }
}

/// Console arguments joined by a space: strings verbatim, everything else by
/// its value or description.
pub fn console_text(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg.get("value") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => arg
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Level and text of a `Runtime.consoleAPICalled` parameter object.
pub fn console_message(params: &Value) -> (ConsoleLevel, String) {
    let level = ConsoleLevel::parse(params["type"].as_str().unwrap_or("log"));
    let args = params["args"].as_array().map(Vec::as_slice).unwrap_or_default();
    (level, console_text(args))
}

/// The page passes its payload through `JSON.stringify`. When the binding is
/// wrapped, the call arrives as `{name, seq, args}` and the first argument is
/// the payload.
pub fn binding_payload(payload: &Value) -> String {
    let inner = payload
        .get("args")
        .and_then(|args| args.get(0))
        .unwrap_or(payload);
    match inner {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn forward_event(event: &Event, events: &PageEventSink) {
    if let Event::RuntimeConsoleAPICalled(called) = event {
        if let Ok(params) = serde_json::to_value(&called.params) {
            let (level, text) = console_message(&params);
            events.console(level, &text);
        }
    }
}

async fn blocking<T, F>(fail: fn(String) -> RecorderError, call: F) -> Result<T, RecorderError>
where
    F: FnOnce() -> Result<T, RecorderError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| fail(format!("browser call aborted: {e}")))?
}

#[async_trait]
impl RenderHost for ChromeHost {
    async fn open(
        &self,
        options: SurfaceOptions,
        events: PageEventSink,
    ) -> Result<Arc<dyn RenderSurface>, RecorderError> {
        let executable = self.discover()?;
        let window = window_size(options.viewport);
        self.log.info(
            "browser_launch",
            json!({
                "executable": executable.display().to_string(),
                "headless": options.headless,
                "window": [window.width, window.height],
                "args": self.extra_args,
            }),
        );

        let extra_args = self.extra_args.clone();
        let headless = options.headless;
        let load_timeout = options.load_timeout;
        let listener = events.clone();
        let (browser, tab) = blocking(RecorderError::Setup, move || {
            let browser = Browser::new(LaunchOptions {
                headless,
                path: Some(executable.clone()),
                window_size: Some((window.width, window.height)),
                args: extra_args.iter().map(OsStr::new).collect(),
                idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
                ..LaunchOptions::default()
            })
            .map_err(|e| {
                RecorderError::Setup(format!("failed to launch {}: {e}", executable.display()))
            })?;
            let tab = browser
                .new_tab()
                .map_err(|e| RecorderError::Setup(format!("opening a page: {e}")))?;
            tab.set_default_timeout(load_timeout);
            tab.call_method(Runtime::Enable(None))
                .map_err(|e| RecorderError::Setup(format!("enabling page runtime: {e}")))?;
            tab.add_event_listener(Arc::new(move |event: &Event| {
                forward_event(event, &listener)
            }))
            .map_err(|e| RecorderError::Setup(format!("subscribing to page events: {e}")))?;
            Ok((browser, tab))
        })
        .await?;

        Ok(Arc::new(ChromeSurface {
            browser: Mutex::new(Some(browser)),
            tab,
            events,
            document: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct ChromeSurface {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    events: PageEventSink,
    document: Mutex<Option<NamedTempFile>>,
    closed: AtomicBool,
}

#[async_trait]
impl RenderSurface for ChromeSurface {
    async fn expose_binding(&self, name: &str) -> Result<(), RecorderError> {
        let tab = self.tab.clone();
        let name = name.to_string();
        let events = self.events.clone();
        let called = name.clone();
        let forward: Arc<headless_chrome::browser::tab::SafeBinding> = Arc::new(move |payload: Value| {
            events.binding_called(&called, &binding_payload(&payload));
        });
        blocking(RecorderError::Setup, move || {
            tab.expose_function(&name, forward)
                .map(|_| ())
                .map_err(|e| RecorderError::Setup(format!("exposing {name}: {e}")))
        })
        .await
    }

    async fn set_content(&self, html: &str) -> Result<(), RecorderError> {
        let mut file = tempfile::Builder::new()
            .prefix("replay-video-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| RecorderError::Setup(format!("document file: {e}")))?;
        file.write_all(html.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| RecorderError::Setup(format!("document file: {e}")))?;
        let url = Url::from_file_path(file.path())
            .map_err(|_| RecorderError::Setup("document path is not absolute".to_string()))?;
        if let Ok(mut document) = self.document.lock() {
            *document = Some(file);
        }

        let tab = self.tab.clone();
        blocking(RecorderError::Setup, move || {
            tab.navigate_to(url.as_str())
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| RecorderError::Setup(format!("document did not load: {e}")))
        })
        .await
    }

    async fn capture_region(&self, selector: &str) -> Result<Vec<u8>, RecorderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RecorderError::Capture("surface closed".to_string()));
        }
        let quoted = serde_json::to_string(selector)
            .map_err(|e| RecorderError::Capture(e.to_string()))?;
        let expression = format!(
            "(() => {{ const el = document.querySelector({quoted}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return JSON.stringify({{ x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height }}); }})()"
        );
        let selector = selector.to_string();
        let tab = self.tab.clone();
        blocking(RecorderError::Capture, move || {
            let evaluated = tab
                .evaluate(&expression, false)
                .map_err(|e| RecorderError::Capture(e.to_string()))?;
            let rect: Value = evaluated
                .value
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|bounds| serde_json::from_str(bounds).ok())
                .ok_or_else(|| RecorderError::Capture(format!("no element matches {selector}")))?;
            let (Some(x), Some(y), Some(width), Some(height)) = (
                rect["x"].as_f64(),
                rect["y"].as_f64(),
                rect["width"].as_f64(),
                rect["height"].as_f64(),
            ) else {
                return Err(RecorderError::Capture(format!(
                    "{selector} returned malformed bounds"
                )));
            };
            if width <= 0.0 || height <= 0.0 {
                return Err(RecorderError::Capture(format!("{selector} has an empty box")));
            }
            tab.capture_screenshot(
                Page::CaptureScreenshotFormatOption::Png,
                None,
                Some(Page::Viewport {
                    x,
                    y,
                    width,
                    height,
                    scale: 1.0,
                }),
                true,
            )
            .map_err(|e| RecorderError::Capture(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> Result<(), RecorderError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let browser = self.browser.lock().ok().and_then(|mut browser| browser.take());
        if let Some(browser) = browser {
            // Dropping the last handle kills the browser process.
            blocking(RecorderError::Setup, move || {
                drop(browser);
                Ok(())
            })
            .await?;
        }
        if let Ok(mut document) = self.document.lock() {
            document.take();
        }
        Ok(())
    }
}
