//! Connection pools.
//!
//! A socket owns one read pool and/or one write pool and registers every live
//! connection into them. The pool turns N connections into a single
//! message-in / message-out endpoint:
//!
//! | Pool | Direction | Policy |
//! |------|-----------|--------|
//! | [`QueuedReader`] | read | fan-in: merge all connections into one queue |
//! | [`MultiWriter`] | write | fan-out: send every message to every connection |
//! | [`LoadBalancedWriter`] | write | round-robin with retry on another connection |
//!
//! All pools block `read`/`write` on a [`ReadyGate`] until the first
//! connection is added, and observe both the caller's context and their own.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use crate::conn::{MsgReader, MsgWriter};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gate::{Latch, ReadyGate};
use crate::message::Msg;

mod balance;
mod fan_in;
mod fan_out;

pub use balance::LoadBalancedWriter;
pub use fan_in::QueuedReader;
pub use fan_out::MultiWriter;

/// Reads messages from a pool of connections.
#[async_trait]
pub trait ReadPool: Send + Sync {
    /// Register a connection.
    fn add_conn(&self, r: Arc<MsgReader>);

    /// Deregister a connection without closing it.
    fn rm_conn(&self, r: &Arc<MsgReader>);

    /// Read the next message from any connection.
    async fn read(&self, ctx: &Context) -> Result<Msg>;

    /// Close every registered connection.
    async fn close(&self) -> Result<()>;
}

/// Writes messages to a pool of connections.
#[async_trait]
pub trait WritePool: Send + Sync {
    /// Register a connection.
    fn add_conn(&self, w: Arc<MsgWriter>);

    /// Deregister a connection.
    fn rm_conn(&self, w: &Arc<MsgWriter>);

    /// Write a message according to the pool's policy.
    async fn write(&self, ctx: &Context, msg: Msg) -> Result<()>;

    /// Close the pool and its connections.
    async fn close(&self) -> Result<()>;
}

/// Live worker count plus the signal `close` waits on.
#[derive(Debug, Default)]
struct Workers {
    live: AtomicUsize,
    closed: AtomicBool,
    drained: Latch,
}

/// State every pool carries: its own context, readiness gate, closed flag
/// and live worker count.
#[derive(Debug)]
pub(crate) struct PoolCore {
    ctx: Context,
    gate: ReadyGate,
    workers: Arc<Workers>,
}

impl PoolCore {
    /// Bind to a child of `parent` so closing the pool never cancels the parent.
    pub(crate) fn new(parent: &Context) -> Self {
        Self {
            ctx: parent.child(),
            gate: ReadyGate::new(),
            workers: Arc::new(Workers::default()),
        }
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn gate(&self) -> &ReadyGate {
        &self.gate
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.workers.closed.load(Ordering::SeqCst)
    }

    /// Mark closed and cancel the pool context. `false` if already closed.
    pub(crate) fn shutdown(&self) -> bool {
        if self.workers.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.ctx.cancel();
        true
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.workers.live.load(Ordering::SeqCst)
    }

    /// Count a worker as live until the returned guard drops.
    ///
    /// Call before spawning so `drained` never misses a task that has not
    /// been polled yet.
    pub(crate) fn enter_worker(&self) -> WorkerGuard {
        self.workers.live.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            workers: self.workers.clone(),
        }
    }

    /// Wait until every worker has exited. Only resolves after `shutdown`.
    pub(crate) async fn drained(&self) {
        if self.active_workers() == 0 {
            return;
        }
        self.workers.drained.wait().await;
    }

    /// Run `fut` under both the caller's and the pool's context.
    pub(crate) async fn guard<F: Future>(&self, caller: &Context, fut: F) -> Result<F::Output> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        match caller.with_cancel(self.ctx.with_cancel(fut)).await? {
            Ok(out) => Ok(out),
            Err(_) if self.is_closed() => Err(Error::PoolClosed),
            Err(err) => Err(err),
        }
    }

    /// Suspend until a connection has been registered.
    pub(crate) async fn ready(&self, caller: &Context) -> Result<()> {
        if self.gate.is_ready() && !self.is_closed() {
            return Ok(());
        }
        self.guard(caller, self.gate.lock()).await
    }
}

/// Decrements the live worker count on drop; the last one out of a closed
/// pool opens the drained latch.
pub(crate) struct WorkerGuard {
    workers: Arc<Workers>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let prev = self.workers.live.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.workers.closed.load(Ordering::SeqCst) {
            self.workers.drained.open();
        }
    }
}

/// Give other tasks on this thread a turn.
pub(crate) async fn yield_now() {
    let mut yielded = false;
    std::future::poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}
