use crate::errors::RecorderError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

pub type RunOutcome = Result<PathBuf, RecorderError>;

const EMPTY: u8 = 0;
const SUCCEEDED: u8 = 1;
const FAILED: u8 = 2;

/// First-write-wins slot for the terminal result of a run.
///
/// Clones share the slot. Exactly one `try_resolve` ever returns `true`;
/// the winner is decided by a single compare-and-set on the state byte.
#[derive(Debug, Clone, Default)]
pub struct ResultLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug, Default)]
struct LatchInner {
    state: AtomicU8,
    value: Mutex<Option<RunOutcome>>,
}

impl ResultLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_resolve(&self, outcome: RunOutcome) -> bool {
        let tag = if outcome.is_ok() { SUCCEEDED } else { FAILED };
        if self
            .inner
            .state
            .compare_exchange(EMPTY, tag, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Ok(mut slot) = self.inner.value.lock() {
            *slot = Some(outcome);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) != EMPTY
    }

    pub fn has_error(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FAILED
    }

    pub fn get(&self) -> Option<RunOutcome> {
        self.inner
            .value
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().cloned())
    }
}
