//! Expiry timers for outstanding polls
//!
//! One `TimerSlot` per push handle. Re-arming a slot cancels the previous
//! arm; a generation counter keeps an already-woken stale task from firing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::PushError;

/// A spawned expiry task together with the service counter it is counted in
#[derive(Debug)]
struct PendingArm {
    task: AbortHandle,
    armed: Arc<AtomicUsize>,
}

impl PendingArm {
    fn disarm(self) {
        self.armed.fetch_sub(1, Ordering::Relaxed);
    }

    fn abort(self) {
        self.task.abort();
        self.disarm();
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    task: Option<PendingArm>,
}

/// Per-handle timer slot
#[derive(Debug, Default)]
pub struct TimerSlot {
    state: Mutex<SlotState>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an arm is pending (not yet fired or cancelled)
    pub fn is_armed(&self) -> bool {
        self.state.lock().task.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(pending) = self.state.get_mut().task.take() {
            pending.abort();
        }
    }
}

/// Node-wide timer service backed by the tokio runtime
#[derive(Debug)]
pub struct TimerService {
    runtime: Handle,
    armed: Arc<AtomicUsize>,
}

impl TimerService {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            armed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Timer service on the runtime of the calling context
    pub fn current() -> Result<Self, PushError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PushError::exhausted("timer runtime", e.to_string()))
    }

    /// Number of arms that have neither fired nor been cancelled
    pub fn armed_count(&self) -> usize {
        self.armed.load(Ordering::Relaxed)
    }

    /// Arm `slot` to run `on_expire` after `timeout`, replacing any pending arm.
    ///
    /// `on_expire` runs with the slot's state lock held and must not arm or
    /// cancel the same slot.
    pub fn arm<F>(&self, slot: &Arc<TimerSlot>, timeout: Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = slot.state.lock();
        if let Some(previous) = state.task.take() {
            previous.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        let weak: Weak<TimerSlot> = Arc::downgrade(slot);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(slot) = weak.upgrade() else {
                return;
            };
            let mut state = slot.state.lock();
            if state.generation != generation {
                trace!(generation, "stale timer woke up, ignoring");
                return;
            }
            if let Some(pending) = state.task.take() {
                pending.disarm();
            }
            on_expire();
        });

        self.armed.fetch_add(1, Ordering::Relaxed);
        state.task = Some(PendingArm {
            task: task.abort_handle(),
            armed: Arc::clone(&self.armed),
        });
    }

    /// Cancel a pending arm without firing it. Returns true if one was pending.
    pub fn cancel(&self, slot: &TimerSlot) -> bool {
        let mut state = slot.state.lock();
        state.generation += 1;
        match state.task.take() {
            Some(pending) => {
                pending.abort();
                true
            }
            None => false,
        }
    }
}
