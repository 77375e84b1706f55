//! RAII guard for protecting against partial I/O corruption in async contexts.
//!
//! # The Problem
//!
//! When a pool operation's context is cancelled, the future driving an
//! adapter's read or write is dropped wherever it happens to be suspended. If
//! that was halfway through a multipart message, the byte stream is left with
//! half a frame on the wire and can no longer be trusted.
//!
//! # The Solution
//!
//! 1. `PoisonGuard::arm()` sets the flag to `true` (assume failure)
//! 2. If the future is dropped before completion, the flag remains `true`
//! 3. Only `disarm()` after the transport call returned resets it to `false`
//!
//! Once poisoned, the adapter refuses further I/O and must be replaced.

use std::sync::atomic::{AtomicBool, Ordering};

/// Marks an adapter as poisoned unless disarmed.
///
/// The flag is atomic because adapters are shared between a pool and its
/// worker tasks.
#[must_use = "dropping the guard immediately leaves the flag poisoned"]
pub struct PoisonGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PoisonGuard<'a> {
    /// Arm the guard, immediately marking the adapter as poisoned.
    #[inline]
    pub fn arm(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }

    /// Disarm the guard, marking the adapter as healthy.
    ///
    /// Call this once the transport call has returned, successfully or not:
    /// a returned error means the message boundary was respected.
    #[inline]
    pub fn disarm(self) {
        self.flag.store(false, Ordering::Release);
    }
}
