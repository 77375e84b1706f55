//! Connection capability and per-connection adapters.
//!
//! The transport layer hands the pools connections that are already
//! handshaken and security-wrapped. All the pools need from them is
//! "read one complete message", "write one complete message" and "close".
//!
//! [`MsgReader`] and [`MsgWriter`] wrap one connection each and add what the
//! pools rely on: cancellation, idempotent close, and poisoning when an
//! operation is abandoned mid-message. A reader and a writer may share the
//! same connection (REQ/REP style sockets read and write on every peer).

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::Msg;
use crate::poison::PoisonGuard;

/// A transport connection moving whole messages.
///
/// Implementations handle framing and security. `read_msg` and `write_msg`
/// may be called concurrently with each other and with `close`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read one complete message.
    async fn read_msg(&self) -> Result<Msg>;

    /// Write one complete message.
    async fn write_msg(&self, msg: &Msg) -> Result<()>;

    /// Release the connection. Pending and later I/O should fail.
    async fn close(&self) -> Result<()>;
}

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared adapter state.
struct Endpoint {
    id: u64,
    conn: Arc<dyn Connection>,
    poisoned: AtomicBool,
    closed: AtomicBool,
}

impl Endpoint {
    fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
            conn,
            poisoned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Drive one transport call under `ctx`, poisoning the adapter if the
    /// call is abandoned before it returns.
    async fn run<T, F>(&self, ctx: &Context, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::Poisoned);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let guard = PoisonGuard::arm(&self.poisoned);
        let out = ctx.with_cancel(op).await;
        match out {
            Ok(res) => {
                guard.disarm();
                res
            }
            Err(err) => {
                drop(guard);
                tracing::debug!("[ADAPTER {}] Poisoned by cancelled I/O", self.id);
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("[ADAPTER {}] Closing connection", self.id);
        self.conn.close().await
    }
}

/// Read side of one connection.
pub struct MsgReader {
    inner: Endpoint,
}

impl MsgReader {
    /// Wrap a connection for reading.
    #[must_use]
    pub fn new(conn: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new(Self {
            inner: Endpoint::new(conn),
        })
    }

    /// Process-unique adapter id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Read one complete message.
    ///
    /// # Errors
    ///
    /// Propagates the connection's failure, `ConnectionClosed` after
    /// `close()`, `Poisoned` after an abandoned read, or the context's error.
    pub async fn read(&self, ctx: &Context) -> Result<Msg> {
        self.inner.run(ctx, self.inner.conn.read_msg()).await
    }

    /// Close the underlying connection. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the connection's close failure from the first call.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether an abandoned read left the stream unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MsgReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgReader")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Write side of one connection.
pub struct MsgWriter {
    inner: Endpoint,
}

impl MsgWriter {
    /// Wrap a connection for writing.
    #[must_use]
    pub fn new(conn: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new(Self {
            inner: Endpoint::new(conn),
        })
    }

    /// Process-unique adapter id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Write one complete message.
    ///
    /// # Errors
    ///
    /// Propagates the connection's failure, `ConnectionClosed` after
    /// `close()`, `Poisoned` after an abandoned write, or the context's error.
    pub async fn write(&self, ctx: &Context, msg: &Msg) -> Result<()> {
        self.inner.run(ctx, self.inner.conn.write_msg(msg)).await
    }

    /// Close the underlying connection. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the connection's close failure from the first call.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether an abandoned write left the stream unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MsgWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgWriter")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
