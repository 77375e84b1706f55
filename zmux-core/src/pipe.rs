//! In-process duplex connection.
//!
//! [`pipe`] returns two connected [`Pipe`] ends that move whole messages over
//! flume channels, without framing, syscalls or serialization. Messages are
//! shared zero-copy (`Bytes` are refcounted).
//!
//! Closing one end fails pending and later I/O on it with
//! `ConnectionClosed`; the other end then sees `PeerDisconnected` once it has
//! drained what was already in flight.
//!
//! ```rust,no_run
//! use zmux_core::conn::Connection;
//! use zmux_core::message::Msg;
//! use zmux_core::pipe::pipe;
//!
//! # async fn example() -> zmux_core::error::Result<()> {
//! let (client, server) = pipe();
//! client.write_msg(&Msg::from("Hello, pipe!")).await?;
//! let msg = server.read_msg().await?;
//! assert_eq!(msg.frame_str(0)?, "Hello, pipe!");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use flume::{Receiver, Sender};
use futures::future::{self, Either};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::gate::Latch;
use crate::message::Msg;

/// Default per-direction queue depth, in messages.
pub const DEFAULT_PIPE_HWM: usize = 1000;

/// One end of an in-process connection.
#[derive(Debug)]
pub struct Pipe {
    tx: Mutex<Option<Sender<Msg>>>,
    rx: Receiver<Msg>,
    closed: Arc<Latch>,
    peer_closed: Arc<Latch>,
}

/// Create a connected pair with the default high water mark.
#[must_use]
pub fn pipe() -> (Pipe, Pipe) {
    pipe_with_hwm(DEFAULT_PIPE_HWM)
}

/// Create a connected pair holding at most `hwm` messages per direction.
///
/// Writers suspend while the peer's queue is full.
#[must_use]
pub fn pipe_with_hwm(hwm: usize) -> (Pipe, Pipe) {
    let (a_tx, b_rx) = flume::bounded(hwm);
    let (b_tx, a_rx) = flume::bounded(hwm);
    let a_closed = Arc::new(Latch::new());
    let b_closed = Arc::new(Latch::new());

    let a = Pipe {
        tx: Mutex::new(Some(a_tx)),
        rx: a_rx,
        closed: a_closed.clone(),
        peer_closed: b_closed.clone(),
    };
    let b = Pipe {
        tx: Mutex::new(Some(b_tx)),
        rx: b_rx,
        closed: b_closed,
        peer_closed: a_closed,
    };
    (a, b)
}

impl Pipe {
    /// Whether this end has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_open()
    }

    /// Number of messages waiting to be read on this end.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[async_trait]
impl Connection for Pipe {
    async fn read_msg(&self) -> Result<Msg> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let recv = self.rx.recv_async();
        let closed = self.closed.wait();
        futures::pin_mut!(recv, closed);
        match future::select(recv, closed).await {
            Either::Left((Ok(msg), _)) => Ok(msg),
            Either::Left((Err(_), _)) => Err(Error::peer_disconnected("inproc pipe")),
            Either::Right(_) => Err(Error::ConnectionClosed),
        }
    }

    async fn write_msg(&self, msg: &Msg) -> Result<()> {
        if self.peer_closed.is_open() {
            return Err(Error::peer_disconnected("inproc pipe"));
        }
        let tx = self.tx.lock().clone().ok_or(Error::ConnectionClosed)?;

        let send = tx.send_async(msg.clone());
        let closed = self.closed.wait();
        futures::pin_mut!(send, closed);
        match future::select(send, closed).await {
            Either::Left((Ok(()), _)) => Ok(()),
            Either::Left((Err(_), _)) => Err(Error::peer_disconnected("inproc pipe")),
            Either::Right(_) => Err(Error::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.open() {
            // Disconnects the peer's receiver once it drains.
            self.tx.lock().take();
        }
        Ok(())
    }
}
