use crate::errors::RecorderError;
use crate::types::{ConsoleLevel, ConsoleMessage};

/// Prefix the injected payload prints when constructing or driving the
/// player throws.
pub const REPLAYER_ERROR_MARKER: &str = "Replayer Uncaught Error:";

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleErrorTap;

impl ConsoleErrorTap {
    /// Some(RenderError) for error-level messages carrying the marker.
    pub fn inspect(&self, message: &ConsoleMessage) -> Option<RecorderError> {
        if message.level != ConsoleLevel::Error {
            return None;
        }
        let rest = message.text.strip_prefix(REPLAYER_ERROR_MARKER)?;
        Some(RecorderError::Render(rest.trim_start().to_string()))
    }
}
