//! Load-balanced write pool.
//!
//! `write` only enqueues. One worker per connection pulls from the shared
//! queue, so whichever connection is free takes the next message. A message
//! whose write fails is put back on a retry lane that every worker drains
//! before fresh messages, and another (or the same) connection tries again.
//!
//! With the default [`RetryPolicy`] nothing is ever dropped: if the only
//! connection keeps failing, the message is retried until the connection is
//! removed or the pool closes. `max_attempts` and `evict_after` bound that.
//!
//! Unlike the fan-in pool, workers here do not remove themselves on failure.
//! Connections leave through `rm_conn`, eviction, or pool shutdown.

use async_trait::async_trait;
use flume::{Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{yield_now, PoolCore, WorkerGuard, WritePool};
use crate::conn::MsgWriter;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Msg;
use crate::options::{PoolOptions, RetryPolicy};

/// A queued message and how many deliveries have failed so far.
#[derive(Debug)]
struct Pending {
    msg: Msg,
    attempts: u32,
}

impl Pending {
    /// Count a failed delivery. Saturates: a message retried forever stays queued.
    fn failed(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }
}

/// A registered connection and the context its worker runs under.
struct Registered {
    writer: Arc<MsgWriter>,
    ctx: Context,
}

struct Shared {
    core: PoolCore,
    registry: Mutex<Vec<Registered>>,
    tx: Sender<Pending>,
    rx: Receiver<Pending>,
    retry_tx: Sender<Pending>,
    retry_rx: Receiver<Pending>,
    policy: RetryPolicy,
}

impl Shared {
    fn unregister(&self, w: &Arc<MsgWriter>) -> Option<Registered> {
        let mut registry = self.registry.lock();
        let pos = registry.iter().position(|r| Arc::ptr_eq(&r.writer, w))?;
        Some(registry.remove(pos))
    }

    /// Next message, retries first.
    async fn next(&self) -> Option<Pending> {
        if let Ok(pending) = self.retry_rx.try_recv() {
            return Some(pending);
        }

        futures::select_biased! {
            pending = self.retry_rx.recv_async().fuse() => pending.ok(),
            pending = self.rx.recv_async().fuse() => pending.ok(),
        }
    }

    fn requeue(&self, pending: Pending) {
        // Unbounded: a failing worker never blocks on a full queue.
        if self.retry_tx.send(pending).is_err() {
            warn!("[LB] Retry lane disconnected");
        }
    }
}

/// Round-robin writer that retries failed messages on another connection.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct LoadBalancedWriter {
    shared: Arc<Shared>,
}

impl LoadBalancedWriter {
    /// Create a pool bound to `ctx` with default options.
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self::with_options(ctx, &PoolOptions::default())
    }

    /// Create a pool bound to `ctx`.
    #[must_use]
    pub fn with_options(ctx: &Context, opts: &PoolOptions) -> Self {
        let (tx, rx) = flume::bounded(opts.queue_capacity.max(1));
        let (retry_tx, retry_rx) = flume::unbounded();
        Self {
            shared: Arc::new(Shared {
                core: PoolCore::new(ctx),
                registry: Mutex::new(Vec::new()),
                tx,
                rx,
                retry_tx,
                retry_rx,
                policy: opts.retry,
            }),
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a connection has ever been registered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.core.gate().is_ready()
    }

    /// Number of worker tasks still running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.shared.core.active_workers()
    }

    /// Messages waiting for a connection, including retries.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.shared.rx.len() + self.shared.retry_rx.len()
    }
}

/// Per-connection worker: pull, write, requeue on failure.
async fn listen(shared: Arc<Shared>, w: Arc<MsgWriter>, ctx: Context, _live: WorkerGuard) {
    let policy = shared.policy;
    let mut failures = 0u32;
    debug!("[LB] Worker started for adapter {}", w.id());

    loop {
        let Ok(Some(mut pending)) = ctx.with_cancel(shared.next()).await else {
            break;
        };

        match w.write(&ctx, &pending.msg).await {
            Ok(()) => {
                failures = 0;
                trace!("[LB] Adapter {} delivered {} frames", w.id(), pending.msg.len());
            }
            Err(err) if ctx.is_cancelled() => {
                // Removed or shut down mid-write: hand the message back.
                trace!("[LB] Adapter {} abandoned a write: {}", w.id(), err);
                shared.requeue(pending);
                break;
            }
            Err(err) => {
                let attempts = pending.failed();
                failures = failures.saturating_add(1);
                debug!(
                    "[LB] Adapter {} write failed (attempt {}): {}",
                    w.id(),
                    attempts,
                    err
                );

                if policy.exhausted(attempts) {
                    warn!("[LB] Dropping message: {}", Error::RetriesExhausted { attempts });
                } else {
                    shared.requeue(pending);
                }

                if policy.should_evict(failures) {
                    warn!("[LB] Evicting adapter {} after {} failures", w.id(), failures);
                    break;
                }

                if policy.backoff.is_zero() {
                    yield_now().await;
                } else if ctx
                    .with_cancel(compio::time::sleep(policy.backoff))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    shared.unregister(&w);
    if let Err(err) = w.close().await {
        warn!("[LB] Failed to close adapter {}: {}", w.id(), err);
    }
    debug!("[LB] Worker for adapter {} exited", w.id());
}

#[async_trait]
impl WritePool for LoadBalancedWriter {
    /// # Panics
    ///
    /// Panics if called outside a compio runtime.
    fn add_conn(&self, w: Arc<MsgWriter>) {
        if self.shared.core.is_closed() {
            warn!("[LB] Pool closed, dropping adapter {}", w.id());
            compio::runtime::spawn(async move {
                if let Err(err) = w.close().await {
                    warn!("[LB] Failed to close adapter {}: {}", w.id(), err);
                }
            })
            .detach();
            return;
        }

        let ctx = self.shared.core.ctx().child();
        self.shared.registry.lock().push(Registered {
            writer: w.clone(),
            ctx: ctx.clone(),
        });
        self.shared.core.gate().enable();
        debug!("[LB] Added adapter {}", w.id());
        let live = self.shared.core.enter_worker();
        compio::runtime::spawn(listen(self.shared.clone(), w, ctx, live)).detach();
    }

    /// Remove the connection and stop its worker. The worker closes the
    /// adapter on exit; a message it was writing goes back on the retry lane.
    fn rm_conn(&self, w: &Arc<MsgWriter>) {
        if let Some(registered) = self.shared.unregister(w) {
            registered.ctx.cancel();
            debug!("[LB] Removed adapter {}", w.id());
        }
    }

    async fn write(&self, ctx: &Context, msg: Msg) -> Result<()> {
        let core = &self.shared.core;
        core.ready(ctx).await?;

        trace!("[LB] Queueing {} frames", msg.len());
        let pending = Pending { msg, attempts: 0 };
        match core.guard(ctx, self.shared.tx.send_async(pending)).await? {
            Ok(()) => Ok(()),
            // Unreachable while `shared.rx` lives.
            Err(_) => Err(Error::PoolClosed),
        }
    }

    /// Stop every worker and wait for them; each closes its own adapter on
    /// the way out. Messages still queued are discarded.
    async fn close(&self) -> Result<()> {
        let core = &self.shared.core;
        if !core.shutdown() {
            return Ok(());
        }

        // Worker contexts are children of the pool's, already cancelled.
        let registry = std::mem::take(&mut *self.shared.registry.lock());
        debug!("[LB] Stopping {} workers", registry.len());
        core.drained().await;

        let backlog = self.backlog();
        if backlog > 0 {
            debug!("[LB] Closing with {} undelivered messages", backlog);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Connection;
    use crate::pipe::{pipe, Pipe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts write attempts and fails every one of them.
    #[derive(Default)]
    struct AlwaysFails {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connection for AlwaysFails {
        async fn read_msg(&self) -> Result<Msg> {
            Err(Error::ConnectionClosed)
        }

        async fn write_msg(&self, _msg: &Msg) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::peer_disconnected("always-fails"))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn attach(pool: &LoadBalancedWriter) -> (Arc<MsgWriter>, Pipe) {
        let (local, remote) = pipe();
        let writer = MsgWriter::new(Arc::new(local));
        pool.add_conn(writer.clone());
        (writer, remote)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            compio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[compio::test]
    async fn delivers_exactly_once_on_single_connection() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let (_w, peer) = attach(&pool);

        pool.write(&Context::background(), Msg::from("job")).await.unwrap();

        assert_eq!(peer.read_msg().await.unwrap(), Msg::from("job"));
        compio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(peer.pending(), 0);
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn drains_queue_across_connections() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let peers: Vec<_> = (0..2).map(|_| attach(&pool).1).collect();

        let ctx = Context::background();
        for i in 0..20 {
            pool.write(&ctx, Msg::from_string(format!("m{i}"))).await.unwrap();
        }

        assert!(wait_for(|| peers.iter().map(Pipe::pending).sum::<usize>() == 20).await);
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn failing_only_connection_keeps_retrying() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let conn = Arc::new(AlwaysFails::default());
        pool.add_conn(MsgWriter::new(conn.clone()));

        pool.write(&Context::background(), Msg::from("stuck")).await.unwrap();

        assert!(wait_for(|| conn.attempts.load(Ordering::SeqCst) >= 5).await);
        // Still registered, message still circulating.
        assert_eq!(pool.len(), 1);
        let seen = conn.attempts.load(Ordering::SeqCst);
        assert!(wait_for(|| conn.attempts.load(Ordering::SeqCst) > seen).await);

        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn failed_message_moves_to_healthy_connection() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let broken = Arc::new(AlwaysFails::default());
        pool.add_conn(MsgWriter::new(broken.clone()));
        let (_w, peer) = attach(&pool);

        let ctx = Context::background();
        for i in 0..4 {
            pool.write(&ctx, Msg::from_string(format!("m{i}"))).await.unwrap();
        }

        assert!(wait_for(|| peer.pending() == 4).await);
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn eviction_removes_failing_connection() {
        let opts = PoolOptions::default()
            .with_retry(RetryPolicy::default().with_evict_after(2));
        let pool = LoadBalancedWriter::with_options(&Context::background(), &opts);
        let broken = Arc::new(AlwaysFails::default());
        pool.add_conn(MsgWriter::new(broken.clone()));

        pool.write(&Context::background(), Msg::from("x")).await.unwrap();

        assert!(wait_for(|| pool.is_empty()).await);
        assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
        // Requeued, not dropped: a new connection picks it up.
        let (_w, peer) = attach(&pool);
        assert_eq!(peer.read_msg().await.unwrap(), Msg::from("x"));
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn max_attempts_drops_message() {
        let opts = PoolOptions::default()
            .with_retry(RetryPolicy::default().with_max_attempts(3));
        let pool = LoadBalancedWriter::with_options(&Context::background(), &opts);
        let broken = Arc::new(AlwaysFails::default());
        pool.add_conn(MsgWriter::new(broken.clone()));

        pool.write(&Context::background(), Msg::from("x")).await.unwrap();

        assert!(wait_for(|| broken.attempts.load(Ordering::SeqCst) == 3 && pool.backlog() == 0).await);
        compio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broken.attempts.load(Ordering::SeqCst), 3);
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn rm_conn_stops_worker_and_closes_adapter() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let (writer, _peer) = attach(&pool);
        assert!(wait_for(|| pool.active_workers() == 1).await);

        pool.rm_conn(&writer);
        assert!(pool.is_empty());
        assert!(wait_for(|| pool.active_workers() == 0).await);
        assert!(writer.is_closed());
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn close_stops_workers() {
        let pool = LoadBalancedWriter::new(&Context::background());
        let (writer, _peer) = attach(&pool);
        assert!(wait_for(|| pool.active_workers() == 1).await);

        pool.close().await.unwrap();
        assert_eq!(pool.active_workers(), 0);
        assert!(writer.is_closed());
        pool.close().await.unwrap();
        assert!(matches!(
            pool.write(&Context::background(), Msg::from("late")).await,
            Err(Error::PoolClosed)
        ));
    }

    #[compio::test]
    async fn close_waits_for_worker_in_backoff() {
        let opts = PoolOptions::default()
            .with_retry(RetryPolicy::default().with_backoff(Duration::from_millis(50)));
        let pool = LoadBalancedWriter::with_options(&Context::background(), &opts);
        let broken = Arc::new(AlwaysFails::default());
        let writer = MsgWriter::new(broken.clone());
        pool.add_conn(writer.clone());

        pool.write(&Context::background(), Msg::from("x")).await.unwrap();
        assert!(wait_for(|| broken.attempts.load(Ordering::SeqCst) == 1).await);

        pool.close().await.unwrap();
        assert_eq!(pool.active_workers(), 0);
        assert!(writer.is_closed());
    }

    #[test]
    fn attempt_counter_saturates() {
        let mut pending = Pending {
            msg: Msg::from("x"),
            attempts: u32::MAX - 1,
        };
        assert_eq!(pending.failed(), u32::MAX);
        assert_eq!(pending.failed(), u32::MAX);
        assert!(!RetryPolicy::default().exhausted(pending.attempts));
    }
}
