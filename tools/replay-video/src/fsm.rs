use crate::errors::RecorderError;
use crate::types::LifecycleState;
use tokio::sync::watch;

/// Lifecycle of one recording run. Transitions only move forward
/// (idle -> recording -> closed), and every change is published on a
/// `watch` channel so the capture loop observes it at its next tick.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    publisher: watch::Sender<LifecycleState>,
    abnormal_reason: Option<String>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(LifecycleState::Idle);
        Self {
            state: LifecycleState::Idle,
            publisher,
            abnormal_reason: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.publisher.subscribe()
    }

    pub fn abnormal_reason(&self) -> Option<&str> {
        self.abnormal_reason.as_deref()
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), RecorderError> {
        validate_transition(self.state, next)?;
        self.set(next);
        Ok(())
    }

    pub fn on_playback_started(&mut self) -> Result<(), RecorderError> {
        self.transition(LifecycleState::Recording)
    }

    pub fn on_playback_finished(&mut self) -> Result<(), RecorderError> {
        if self.state != LifecycleState::Recording {
            return Err(RecorderError::Lifecycle(format!(
                "finish signal is only legal while recording (state {})",
                self.state.as_str()
            )));
        }
        self.transition(LifecycleState::Closed)
    }

    /// Abnormal finish: jumps straight to `closed` from any state.
    /// Returns the state that was left.
    pub fn force_close(&mut self, reason: &str) -> LifecycleState {
        let previous = self.state;
        if self.abnormal_reason.is_none() {
            self.abnormal_reason = Some(reason.to_string());
        }
        if previous != LifecycleState::Closed {
            self.set(LifecycleState::Closed);
        }
        previous
    }

    fn set(&mut self, next: LifecycleState) {
        self.state = next;
        self.publisher.send_replace(next);
    }
}

pub fn validate_transition(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<(), RecorderError> {
    use LifecycleState as S;

    let allowed = match from {
        S::Idle => matches!(to, S::Recording | S::Closed),
        S::Recording => matches!(to, S::Closed),
        S::Closed => false,
    };

    if !allowed {
        return Err(RecorderError::Lifecycle(format!(
            "illegal transition: {:?} -> {:?}",
            from, to
        )));
    }
    Ok(())
}
