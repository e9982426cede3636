//! The document injected into the rendering surface.
//!
//! The trace and the player settings travel as inert JSON `<script>` blocks;
//! a small bootstrap script reads them, constructs the player inside a
//! `try`/`catch` that prints [`REPLAYER_ERROR_MARKER`] on failure, and calls
//! the two bridge bindings. [`embedded_settings`] and [`embedded_trace`] read
//! the same blocks back so hosts that do not execute script can still follow
//! the page's timing contract.

use crate::bridge::{FINISH_BINDING, START_BINDING};
use crate::config::{AssetsConfig, PlayerOptions};
use crate::console_tap::REPLAYER_ERROR_MARKER;
use crate::errors::RecorderError;
use crate::runtime::FileSystem;
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

pub const TRACE_ELEMENT_ID: &str = "replay-events";
pub const SETTINGS_ELEMENT_ID: &str = "replay-settings";

/// Region captured when the player runs at its own default size.
pub const DEFAULT_SELECTOR: &str = ".replayer-wrapper";
/// Region captured when explicit width and height were configured.
pub const SIZED_SELECTOR: &str = ".rr-player";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAssets {
    pub script: String,
    pub style: String,
    pub global: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySettings {
    pub start_delay_time: u64,
    pub player_global: String,
    pub player_options: Map<String, Value>,
}

impl ReplaySettings {
    pub fn auto_play(&self) -> bool {
        self.player_options
            .get("autoPlay")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Time between the document loading and the start binding firing.
    pub fn playback_delay(&self) -> Duration {
        if self.auto_play() {
            Duration::ZERO
        } else {
            Duration::from_millis(self.start_delay_time)
        }
    }
}

pub fn playback_delay(options: &PlayerOptions, start_delay: Duration) -> Duration {
    if options.auto_play() {
        Duration::ZERO
    } else {
        start_delay
    }
}

pub fn capture_selector(options: &PlayerOptions) -> &'static str {
    if options.has_explicit_size() {
        SIZED_SELECTOR
    } else {
        DEFAULT_SELECTOR
    }
}

pub fn load_assets(
    fs: &dyn FileSystem,
    assets: &AssetsConfig,
    base: &Path,
) -> Result<PlayerAssets, RecorderError> {
    let read = |path: &Path, what: &str| {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };
        fs.read_to_string(&resolved).map_err(|e| {
            RecorderError::Setup(format!(
                "player {what} {} unavailable: {}",
                resolved.display(),
                e.message()
            ))
        })
    };
    Ok(PlayerAssets {
        script: read(&assets.player_script, "script")?,
        style: read(&assets.player_style, "stylesheet")?,
        global: assets.player_global.clone(),
    })
}

pub fn render_html(
    trace: &Trace,
    options: &PlayerOptions,
    start_delay: Duration,
    assets: &PlayerAssets,
) -> Result<String, RecorderError> {
    let settings = ReplaySettings {
        start_delay_time: u64::try_from(start_delay.as_millis()).unwrap_or(u64::MAX),
        player_global: assets.global.clone(),
        player_options: options.merged_with_defaults(),
    };
    let events_json = inert_json(trace.events())?;
    let settings_json = inert_json(&settings)?;

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>{style}</style>
<style>html, body {{ margin: 0; padding: 0; }}</style>
</head>
<body>
<script type="application/json" id="{trace_id}">{events_json}</script>
<script type="application/json" id="{settings_id}">{settings_json}</script>
<script>{script}</script>
<script>
(function () {{
  const events = JSON.parse(document.getElementById('{trace_id}').textContent);
  const settings = JSON.parse(document.getElementById('{settings_id}').textContent);
  const userConfig = settings.playerOptions;
  let player;
  try {{
    const Player = window[settings.playerGlobal];
    player = new Player({{
      target: document.body,
      props: Object.assign({{ events: events }}, userConfig),
    }});
  }} catch (e) {{
    console.error('{marker}', e);
    return;
  }}
  player.addEventListener('finish', function () {{
    window.{finish}(JSON.stringify('finish'));
  }});
  const begin = function () {{
    window.{start}(JSON.stringify('start'));
    player.play();
  }};
  if (userConfig.autoPlay) {{
    begin();
  }} else {{
    setTimeout(begin, settings.startDelayTime);
  }}
}})();
</script>
</body>
</html>
"#,
        style = assets.style,
        script = assets.script,
        trace_id = TRACE_ELEMENT_ID,
        settings_id = SETTINGS_ELEMENT_ID,
        marker = REPLAYER_ERROR_MARKER,
        start = START_BINDING,
        finish = FINISH_BINDING,
    ))
}

pub fn embedded_settings(html: &str) -> Option<ReplaySettings> {
    serde_json::from_str(embedded_block(html, SETTINGS_ELEMENT_ID)?).ok()
}

pub fn embedded_trace(html: &str) -> Option<Value> {
    serde_json::from_str(embedded_block(html, TRACE_ELEMENT_ID)?).ok()
}

fn embedded_block<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    let open = format!(r#"<script type="application/json" id="{id}">"#);
    let start = html.find(&open)? + open.len();
    let len = html[start..].find("</script>")?;
    Some(&html[start..start + len])
}

/// JSON that cannot terminate the surrounding `<script>` element. `<` only
/// occurs inside string literals, where `<` decodes to the same text.
fn inert_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RecorderError> {
    let rendered = serde_json::to_string(value)
        .map_err(|e| RecorderError::Setup(format!("payload serialization failed: {e}")))?;
    Ok(rendered.replace('<', "\\u003c"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeFileSystem;
    use serde_json::json;
    use std::path::PathBuf;

    fn assets() -> PlayerAssets {
        PlayerAssets {
            script: "window.rrwebPlayer = function () {};".to_string(),
            style: ".rr-player { color: red; }".to_string(),
            global: "rrwebPlayer".to_string(),
        }
    }

    #[test]
    fn document_embeds_trace_settings_and_bootstrap() {
        let trace = Trace::from_value("t.json", json!([{"type": 4, "data": {"href": "</script><b>"}}]));
        let mut options = PlayerOptions::default();
        options.set("speed", json!(2));
        let html = render_html(&trace, &options, Duration::from_millis(500), &assets())
            .expect("html");

        assert!(html.contains("console.error('Replayer Uncaught Error:', e)"));
        assert!(html.contains("window.onReplayStart(JSON.stringify('start'))"));
        assert!(html.contains("window.onReplayFinish(JSON.stringify('finish'))"));
        assert!(html.contains(".rr-player { color: red; }"));
        assert!(!html.contains("</script><b>"));

        assert_eq!(
            embedded_trace(&html),
            Some(json!([{"type": 4, "data": {"href": "</script><b>"}}]))
        );
        let settings = embedded_settings(&html).expect("settings");
        assert_eq!(settings.start_delay_time, 500);
        assert_eq!(settings.player_global, "rrwebPlayer");
        assert_eq!(settings.player_options.get("speed"), Some(&json!(2)));
        assert_eq!(settings.player_options.get("showController"), Some(&json!(false)));
        assert_eq!(settings.playback_delay(), Duration::from_millis(500));
    }

    #[test]
    fn autoplay_removes_the_start_delay() {
        let mut options = PlayerOptions::default();
        assert_eq!(
            playback_delay(&options, Duration::from_millis(1000)),
            Duration::from_millis(1000)
        );
        options.set("autoPlay", json!(true));
        assert_eq!(playback_delay(&options, Duration::from_millis(1000)), Duration::ZERO);

        let html = render_html(
            &Trace::from_value("t.json", json!([])),
            &options,
            Duration::from_millis(1000),
            &assets(),
        )
        .expect("html");
        assert_eq!(
            embedded_settings(&html).expect("settings").playback_delay(),
            Duration::ZERO
        );
    }

    #[test]
    fn selector_depends_on_explicit_size() {
        let mut options = PlayerOptions::default();
        assert_eq!(capture_selector(&options), ".replayer-wrapper");
        options.set("width", json!(800));
        assert_eq!(capture_selector(&options), ".replayer-wrapper");
        options.set("height", json!(600));
        assert_eq!(capture_selector(&options), ".rr-player");
    }

    #[test]
    fn assets_resolve_relative_to_base_and_report_missing_files() {
        let fs = FakeFileSystem::with_file("/work/player/index.js", "bundle");
        let config = AssetsConfig {
            player_script: PathBuf::from("player/index.js"),
            player_style: PathBuf::from("player/style.css"),
            player_global: "rrwebPlayer".to_string(),
        };
        let err = load_assets(&fs, &config, Path::new("/work")).expect_err("no stylesheet");
        assert!(matches!(err, RecorderError::Setup(message) if message.contains("/work/player/style.css")));

        fs.add_file("/work/player/style.css", "css");
        let loaded = load_assets(&fs, &config, Path::new("/work")).expect("assets");
        assert_eq!(loaded.script, "bundle");
        assert_eq!(loaded.style, "css");
    }
}
