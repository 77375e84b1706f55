//! Fan-out write pool.
//!
//! Every `write` goes to every registered connection concurrently and waits
//! for all of them. The first failure (in completion order) is returned, but
//! delivery is best-effort: other connections may already have the message.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{PoolCore, WritePool};
use crate::conn::MsgWriter;
use crate::context::Context;
use crate::error::Result;
use crate::message::Msg;
use crate::options::PoolOptions;

struct Shared {
    core: PoolCore,
    writers: Mutex<Vec<Arc<MsgWriter>>>,
    evict_failed: bool,
}

impl Shared {
    fn remove(&self, w: &Arc<MsgWriter>) -> bool {
        let mut writers = self.writers.lock();
        match writers.iter().position(|x| Arc::ptr_eq(x, w)) {
            Some(pos) => {
                writers.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Broadcast writer: every message to every connection.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct MultiWriter {
    shared: Arc<Shared>,
}

impl MultiWriter {
    /// Create a pool bound to `ctx` with default options.
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self::with_options(ctx, &PoolOptions::default())
    }

    /// Create a pool bound to `ctx`.
    #[must_use]
    pub fn with_options(ctx: &Context, opts: &PoolOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: PoolCore::new(ctx),
                writers: Mutex::new(Vec::new()),
                evict_failed: opts.evict_failed_writers,
            }),
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.writers.lock().len()
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

    async fn evict(&self, failed: Vec<Arc<MsgWriter>>) {
        for w in failed {
            if self.shared.remove(&w) {
                warn!("[FANOUT] Evicting adapter {} after failed write", w.id());
                if let Err(err) = w.close().await {
                    warn!("[FANOUT] Failed to close adapter {}: {}", w.id(), err);
                }
            }
        }
    }
}

#[async_trait]
impl WritePool for MultiWriter {
    fn add_conn(&self, w: Arc<MsgWriter>) {
        if self.shared.core.is_closed() {
            warn!("[FANOUT] Pool closed, dropping adapter {}", w.id());
            compio::runtime::spawn(async move {
                if let Err(err) = w.close().await {
                    warn!("[FANOUT] Failed to close adapter {}: {}", w.id(), err);
                }
            })
            .detach();
            return;
        }

        self.shared.writers.lock().push(w.clone());
        self.shared.core.gate().enable();
        debug!("[FANOUT] Added adapter {}", w.id());
    }

    fn rm_conn(&self, w: &Arc<MsgWriter>) {
        if self.shared.remove(w) {
            debug!("[FANOUT] Removed adapter {}", w.id());
        }
    }

    async fn write(&self, ctx: &Context, msg: Msg) -> Result<()> {
        self.shared.core.ready(ctx).await?;

        // Snapshot: adapters added mid-write miss this message.
        let writers = self.shared.writers.lock().clone();
        trace!("[FANOUT] Sending {} frames to {} adapters", msg.len(), writers.len());

        let msg = &msg;
        let mut inflight: FuturesUnordered<_> = writers
            .iter()
            .map(|w| async move { (w, w.write(ctx, msg).await) })
            .collect();

        let mut first_err = None;
        let mut failed = Vec::new();
        while let Some((w, res)) = inflight.next().await {
            if let Err(err) = res {
                debug!("[FANOUT] Adapter {} write failed: {}", w.id(), err);
                if err.is_connection_error() {
                    failed.push(w.clone());
                }
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        drop(inflight);

        if self.shared.evict_failed && !failed.is_empty() {
            self.evict(failed).await;
        }

        first_err.map_or(Ok(()), Err)
    }

    async fn close(&self) -> Result<()> {
        if !self.shared.core.shutdown() {
            return Ok(());
        }

        let writers = std::mem::take(&mut *self.shared.writers.lock());
        debug!("[FANOUT] Closing {} adapters", writers.len());

        let mut first_err = None;
        for w in &writers {
            if let Err(err) = w.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
