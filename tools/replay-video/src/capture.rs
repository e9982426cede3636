use crate::config::frame_interval;
use crate::encoder::EncoderHandle;
use crate::latch::ResultLatch;
use crate::logging::LogSink;
use crate::runtime::RenderSurface;
use crate::types::LifecycleState;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub ticks: usize,
    pub frames_written: usize,
    pub misses: usize,
    pub closed_encoder: bool,
}

/// Samples one page region at a fixed cadence while the run is recording.
/// The loop owns no frames beyond the current tick; a full encoder queue
/// simply delays the next tick.
pub struct FrameCaptureLoop {
    surface: Arc<dyn RenderSurface>,
    selector: String,
    state: watch::Receiver<LifecycleState>,
    latch: ResultLatch,
    encoder: Arc<EncoderHandle>,
    fps: u32,
    log: Arc<dyn LogSink>,
}

impl FrameCaptureLoop {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        selector: &str,
        state: watch::Receiver<LifecycleState>,
        latch: ResultLatch,
        encoder: Arc<EncoderHandle>,
        fps: u32,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            surface,
            selector: selector.to_string(),
            state,
            latch,
            encoder,
            fps,
            log,
        }
    }

    pub async fn run(self) -> CaptureStats {
        let period = frame_interval(self.fps);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = CaptureStats::default();

        loop {
            ticker.tick().await;
            stats.ticks += 1;

            let state = *self.state.borrow();
            let errored = self.latch.has_error() || self.encoder.has_failed();
            if state != LifecycleState::Recording || errored {
                if state == LifecycleState::Closed && !errored {
                    stats.closed_encoder = self.encoder.close().await;
                }
                break;
            }

            match self.surface.capture_region(&self.selector).await {
                Ok(frame) => {
                    if let Err(e) = self.encoder.write(frame).await {
                        self.log.warn("capture_write_refused", json!({"error": e.message()}));
                        break;
                    }
                    stats.frames_written += 1;
                }
                Err(e) => {
                    stats.misses += 1;
                    self.log.debug(
                        "capture_miss",
                        json!({"tick": stats.ticks, "error": e.message()}),
                    );
                }
            }
        }

        self.log.info(
            "capture_stopped",
            json!({
                "ticks": stats.ticks,
                "frames_written": stats.frames_written,
                "misses": stats.misses,
                "closed_encoder": stats.closed_encoder,
            }),
        );
        stats
    }
}
