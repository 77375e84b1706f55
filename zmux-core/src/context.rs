//! Cancellation contexts.
//!
//! Every pool is bound to a [`Context`] and every blocking pool operation takes
//! one. Contexts form a tree: cancelling a context cancels all of its
//! descendants, never its ancestors.
//!
//! ```rust,no_run
//! use zmux_core::context::Context;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let root = Context::new();
//! let op = root.with_timeout(Duration::from_secs(5));
//!
//! root.cancel();
//! op.cancelled().await;
//! assert!(op.err().unwrap().is_cancellation());
//! # }
//! ```

use futures::future::{self, Either};
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gate::Latch;

/// Why a context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Explicit `cancel()`
    Cancelled,
    /// Timer set by `with_timeout()` fired
    DeadlineExceeded,
}

impl From<Cause> for Error {
    fn from(cause: Cause) -> Self {
        match cause {
            Cause::Cancelled => Self::Cancelled,
            Cause::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Default)]
struct Node {
    cause: OnceCell<Cause>,
    latch: Latch,
}

/// Cloneable cancellation handle.
///
/// Clones share the same cancellation state.
#[derive(Debug, Clone)]
pub struct Context {
    // Self first, then each ancestor up to the root.
    chain: Arc<[Arc<Node>]>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a root context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chain: Arc::from(vec![Arc::new(Node::default())]),
        }
    }

    /// A root context nobody holds a reason to cancel.
    #[must_use]
    pub fn background() -> Self {
        Self::new()
    }

    /// Derive a context that is cancelled whenever `self` is.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.push(Arc::new(Node::default()));
        chain.extend(self.chain.iter().cloned());
        Self {
            chain: Arc::from(chain),
        }
    }

    /// Derive a child that cancels itself with `DeadlineExceeded` after `timeout`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a compio runtime.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let ctx = self.child();
        let timer = ctx.clone();
        compio::runtime::spawn(async move {
            let sleep = compio::time::sleep(timeout);
            let cancelled = timer.cancelled();
            futures::pin_mut!(sleep, cancelled);
            if let Either::Left(_) = future::select(sleep, cancelled).await {
                timer.cancel_with(Cause::DeadlineExceeded);
            }
        })
        .detach();
        ctx
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel_with(Cause::Cancelled);
    }

    fn cancel_with(&self, cause: Cause) {
        let node = &self.chain[0];
        if self.is_cancelled() {
            return;
        }
        if node.cause.set(cause).is_ok() {
            node.latch.open();
        }
    }

    /// Cause of the nearest cancelled context in the chain.
    #[must_use]
    pub fn cause(&self) -> Option<Cause> {
        self.chain.iter().find_map(|node| node.cause.get().copied())
    }

    /// Error describing the cancellation, `None` while live.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        self.cause().map(Error::from)
    }

    /// Whether this context or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.chain.iter().any(|node| node.latch.is_open())
    }

    /// Resolve once this context or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let waits = self
            .chain
            .iter()
            .map(|node| Box::pin(node.latch.wait()));
        future::select_all(waits).await;
    }

    /// Run `fut` until it completes or the context is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if cancellation wins. An
    /// already-cancelled context never polls `fut`.
    pub async fn with_cancel<F: Future>(&self, fut: F) -> Result<F::Output> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let cancelled = self.cancelled();
        futures::pin_mut!(fut, cancelled);
        match future::select(fut, cancelled).await {
            Either::Left((out, _)) => Ok(out),
            Either::Right(_) => Err(self.err().unwrap_or(Error::Cancelled)),
        }
    }
}
