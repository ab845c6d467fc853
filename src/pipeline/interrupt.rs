//! Barge-in signal shared between the speech-detecting stages and the player.
//!
//! Any stage that hears the user may raise the signal. Only the player
//! clears it, once per interruption it observes. Every raise also advances a
//! generation counter; work stamped with an older generation than the
//! current one belongs to a reply the user has already talked over.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug)]
struct Inner {
    pending: AtomicBool,
    generation: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Cloneable handle to the session's interrupt state.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    inner: Arc<Inner>,
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSignal {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            inner: Arc::new(Inner {
                pending: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake_tx,
                wake_rx,
            }),
        }
    }

    /// Raises the signal and returns the new generation.
    ///
    /// Raising an already pending signal keeps it pending; the player still
    /// observes it only once.
    pub fn set(&self) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.pending.store(true, Ordering::Release);
        // A full wake slot already guarantees a wake-up.
        self.inner.wake_tx.try_send(()).ok();
        generation
    }

    /// Clears a pending signal. Returns true for exactly one caller per raise
    /// that was still pending.
    pub fn take(&self) -> bool {
        self.inner
            .pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// True when work stamped with `generation` has been superseded.
    pub fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation()
    }

    /// Channel that becomes ready after a raise, for use in `select!`.
    ///
    /// A token may outlive the raise it announced, so receivers must confirm
    /// with [`take`](Self::take).
    pub fn wake(&self) -> &Receiver<()> {
        &self.inner.wake_rx
    }
}
