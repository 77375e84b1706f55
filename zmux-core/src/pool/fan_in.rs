//! Fan-in read pool.
//!
//! One worker task per connection reads messages and pushes them onto a
//! single bounded queue; `read` pops from it. Messages come out in arrival
//! order, so connections interleave freely while each connection's own
//! messages keep their order.
//!
//! A failed read is still queued (exactly once) so the failure reaches a
//! consumer, then the worker deregisters and closes its connection. The pool
//! keeps serving from whatever connections remain.

use async_trait::async_trait;
use flume::{Receiver, Sender};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{PoolCore, ReadPool, WorkerGuard};
use crate::conn::MsgReader;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Msg;
use crate::options::PoolOptions;

struct Shared {
    core: PoolCore,
    readers: Mutex<Vec<Arc<MsgReader>>>,
    tx: Sender<Result<Msg>>,
    rx: Receiver<Result<Msg>>,
}

impl Shared {
    fn remove(&self, r: &Arc<MsgReader>) -> bool {
        let mut readers = self.readers.lock();
        match readers.iter().position(|x| Arc::ptr_eq(x, r)) {
            Some(pos) => {
                readers.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Queued fan-in reader over any number of connections.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct QueuedReader {
    shared: Arc<Shared>,
}

impl QueuedReader {
    /// Create a pool bound to `ctx` with default options.
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self::with_options(ctx, &PoolOptions::default())
    }

    /// Create a pool bound to `ctx`.
    #[must_use]
    pub fn with_options(ctx: &Context, opts: &PoolOptions) -> Self {
        let (tx, rx) = flume::bounded(opts.queue_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                core: PoolCore::new(ctx),
                readers: Mutex::new(Vec::new()),
                tx,
                rx,
            }),
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.readers.lock().len()
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

    /// Messages queued and not yet read.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.rx.len()
    }
}

/// Per-connection worker: read, enqueue, repeat.
async fn listen(shared: Arc<Shared>, r: Arc<MsgReader>, _live: WorkerGuard) {
    let ctx = shared.core.ctx().clone();
    debug!("[FANIN] Worker started for adapter {}", r.id());

    loop {
        let res = r.read(&ctx).await;
        if ctx.is_cancelled() {
            // Pool closed or parent cancelled: leave without enqueuing.
            break;
        }

        let failed = res.is_err();
        if let Err(err) = &res {
            debug!("[FANIN] Adapter {} read failed: {}", r.id(), err);
        } else {
            trace!("[FANIN] Adapter {} queued a message", r.id());
        }

        match ctx.with_cancel(shared.tx.send_async(res)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => break,
        }
        if failed {
            break;
        }
    }

    shared.remove(&r);
    if let Err(err) = r.close().await {
        warn!("[FANIN] Failed to close adapter {}: {}", r.id(), err);
    }
    debug!("[FANIN] Worker for adapter {} exited", r.id());
}

#[async_trait]
impl ReadPool for QueuedReader {
    /// # Panics
    ///
    /// Panics if called outside a compio runtime.
    fn add_conn(&self, r: Arc<MsgReader>) {
        if self.shared.core.is_closed() {
            warn!("[FANIN] Pool closed, dropping adapter {}", r.id());
            compio::runtime::spawn(async move {
                if let Err(err) = r.close().await {
                    warn!("[FANIN] Failed to close adapter {}: {}", r.id(), err);
                }
            })
            .detach();
            return;
        }

        let live = self.shared.core.enter_worker();
        self.shared.readers.lock().push(r.clone());
        self.shared.core.gate().enable();
        debug!("[FANIN] Added adapter {}", r.id());
        compio::runtime::spawn(listen(self.shared.clone(), r, live)).detach();
    }

    fn rm_conn(&self, r: &Arc<MsgReader>) {
        if self.shared.remove(r) {
            debug!("[FANIN] Removed adapter {}", r.id());
        }
    }

    async fn read(&self, ctx: &Context) -> Result<Msg> {
        let core = &self.shared.core;
        core.ready(ctx).await?;

        if let Ok(res) = self.shared.rx.try_recv() {
            return res;
        }
        match core.guard(ctx, self.shared.rx.recv_async()).await? {
            Ok(res) => res,
            // Unreachable while `shared.tx` lives.
            Err(_) => Err(Error::PoolClosed),
        }
    }

    /// Close every adapter concurrently, then wait for all workers to exit.
    async fn close(&self) -> Result<()> {
        let core = &self.shared.core;
        if !core.shutdown() {
            return Ok(());
        }

        let readers = std::mem::take(&mut *self.shared.readers.lock());
        debug!("[FANIN] Closing {} adapters", readers.len());

        let results = join_all(readers.iter().map(|r| r.close())).await;
        core.drained().await;
        results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Connection;
    use crate::pipe::{pipe, Pipe};
    use std::time::Duration;

    fn attach(pool: &QueuedReader) -> Pipe {
        let (local, remote) = pipe();
        pool.add_conn(MsgReader::new(Arc::new(local)));
        remote
    }

    #[compio::test]
    async fn reads_from_single_connection_in_order() {
        let pool = QueuedReader::new(&Context::background());
        let peer = attach(&pool);

        for i in 0..5 {
            peer.write_msg(&Msg::from_string(format!("m{i}"))).await.unwrap();
        }

        let ctx = Context::background();
        for i in 0..5 {
            let msg = pool.read(&ctx).await.unwrap();
            assert_eq!(msg.frame_str(0).unwrap(), format!("m{i}"));
        }
        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn read_times_out_without_connections() {
        let pool = QueuedReader::new(&Context::background());
        let ctx = Context::background().with_timeout(Duration::from_millis(10));

        assert!(matches!(pool.read(&ctx).await, Err(Error::DeadlineExceeded)));
        assert!(!pool.is_ready());
    }

    #[compio::test]
    async fn failed_connection_surfaces_once_and_deregisters() {
        let pool = QueuedReader::new(&Context::background());
        let dead = attach(&pool);
        let live = attach(&pool);
        assert_eq!(pool.len(), 2);

        dead.close().await.unwrap();

        let ctx = Context::background();
        let res = pool.read(&ctx).await;
        assert!(matches!(res, Err(Error::PeerDisconnected(_))));
        assert_eq!(pool.len(), 1);

        live.write_msg(&Msg::from("still here")).await.unwrap();
        let msg = pool.read(&ctx).await.unwrap();
        assert_eq!(msg.frame_str(0).unwrap(), "still here");

        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn rm_conn_does_not_close_adapter() {
        let pool = QueuedReader::new(&Context::background());
        let (local, _remote) = pipe();
        let reader = MsgReader::new(Arc::new(local));

        pool.add_conn(reader.clone());
        pool.rm_conn(&reader);
        assert!(pool.is_empty());
        assert!(!reader.is_closed());

        pool.close().await.unwrap();
    }

    #[compio::test]
    async fn close_stops_workers_and_is_idempotent() {
        let pool = QueuedReader::new(&Context::background());
        let _a = attach(&pool);
        let _b = attach(&pool);
        assert_eq!(pool.active_workers(), 2);

        pool.close().await.unwrap();
        assert_eq!(pool.active_workers(), 0);
        pool.close().await.unwrap();
        assert!(pool.is_empty());

        assert!(matches!(
            pool.read(&Context::background()).await,
            Err(Error::PoolClosed)
        ));
    }

    #[compio::test]
    async fn close_waits_for_worker_blocked_on_full_queue() {
        let opts = PoolOptions::default().with_queue_capacity(1);
        let pool = QueuedReader::with_options(&Context::background(), &opts);
        let peer = attach(&pool);
        for i in 0..3 {
            peer.write_msg(&Msg::from_string(format!("m{i}"))).await.unwrap();
        }
        compio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued(), 1);

        pool.close().await.unwrap();
        assert_eq!(pool.active_workers(), 0);
    }

    #[compio::test]
    async fn parent_cancel_exits_without_enqueuing() {
        let parent = Context::new();
        let pool = QueuedReader::new(&parent);
        let (local, peer) = pipe();
        let reader = MsgReader::new(Arc::new(local));
        pool.add_conn(reader.clone());
        compio::time::sleep(Duration::from_millis(5)).await;

        // The worker is woken by the write but only runs after the cancel.
        peer.write_msg(&Msg::from("in flight")).await.unwrap();
        parent.cancel();

        for _ in 0..100 {
            if pool.active_workers() == 0 {
                break;
            }
            compio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.active_workers(), 0);
        assert_eq!(pool.queued(), 0);
        assert!(pool.is_empty());
        assert!(reader.is_closed());
    }
}
