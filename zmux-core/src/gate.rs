//! One-shot signals.
//!
//! [`Latch`] is the broadcast primitive: a flume channel nobody ever sends on.
//! Waiters park in `recv_async()`; opening the latch drops the only sender,
//! which disconnects the channel and wakes every waiter at once. Later waiters
//! see the disconnect immediately.
//!
//! [`ReadyGate`] is the pool-facing latch: closed until the first connection
//! registers, then open for the rest of the pool's life.

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Idempotent one-shot broadcast signal.
#[derive(Debug)]
pub struct Latch {
    open: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// Create a closed latch.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(0);
        Self {
            open: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Open the latch.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn open(&self) -> bool {
        if self.open.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the sender disconnects the channel for every waiter.
        self.tx.lock().take();
        true
    }

    /// Whether the latch has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Wait until the latch is open.
    pub async fn wait(&self) {
        if self.is_open() {
            return;
        }
        // Nothing is ever sent: this only resolves on disconnect.
        let _ = self.rx.recv_async().await;
    }
}

/// Readiness gate: blocks pool operations until a connection exists.
///
/// # Examples
///
/// ```
/// use zmux_core::gate::ReadyGate;
///
/// let gate = ReadyGate::new();
/// assert!(!gate.is_ready());
/// gate.enable();
/// gate.enable(); // idempotent
/// assert!(gate.is_ready());
/// ```
#[derive(Debug, Default)]
pub struct ReadyGate {
    latch: Latch,
}

impl ReadyGate {
    /// Create a gate in the "not ready" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the gate ready. Safe to call any number of times, concurrently.
    pub fn enable(&self) {
        if self.latch.open() {
            tracing::trace!("[GATE] Ready");
        }
    }

    /// Whether the gate has been enabled.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.latch.is_open()
    }

    /// Suspend until the gate is ready. Never blocks once enabled.
    pub async fn lock(&self) {
        self.latch.wait().await;
    }
}
