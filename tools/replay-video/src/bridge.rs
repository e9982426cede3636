//! Page-to-orchestrator signalling.
//!
//! The replay script running inside the surface calls two bindings, one when
//! playback is about to begin and one when the player reports `finish`.
//! Hosts forward every binding call and console line into a [`PageEventSink`],
//! which is the sending half of the orchestrator's inbound queue. The
//! [`PlaybackBridge`] then turns binding calls back into typed signals.

use crate::types::{ConsoleLevel, ConsoleMessage, EncoderSignal, PlaybackSignal, RecorderEvent};
use tokio::sync::mpsc;

pub const START_BINDING: &str = "onReplayStart";
pub const FINISH_BINDING: &str = "onReplayFinish";

#[derive(Debug, Clone)]
pub struct PageEventSink {
    tx: mpsc::UnboundedSender<RecorderEvent>,
}

impl PageEventSink {
    pub fn new(tx: mpsc::UnboundedSender<RecorderEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the run has stopped listening.
    pub fn binding_called(&self, name: &str, payload: &str) -> bool {
        self.tx
            .send(RecorderEvent::Binding {
                name: name.to_string(),
                payload: payload.to_string(),
            })
            .is_ok()
    }

    pub fn console(&self, level: ConsoleLevel, text: &str) -> bool {
        self.tx
            .send(RecorderEvent::Console(ConsoleMessage {
                level,
                text: text.to_string(),
            }))
            .is_ok()
    }

    pub(crate) fn encoder(&self, signal: EncoderSignal) -> bool {
        self.tx.send(RecorderEvent::Encoder(signal)).is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackBridge;

impl PlaybackBridge {
    pub fn bindings(&self) -> [&'static str; 2] {
        [START_BINDING, FINISH_BINDING]
    }

    pub fn signal_for(&self, binding: &str) -> Option<PlaybackSignal> {
        match binding {
            START_BINDING => Some(PlaybackSignal::Started),
            FINISH_BINDING => Some(PlaybackSignal::Finished),
            _ => None,
        }
    }
}
