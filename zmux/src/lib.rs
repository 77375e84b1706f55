//! # zmux
//!
//! Connection pools for ZeroMQ-style sockets.
//!
//! A socket may be connected to any number of peers at once. zmux gives the
//! socket a single blocking `read`/`write` over that set with one of three
//! distribution policies:
//!
//! - **`QueuedReader`** (fan-in): merges every connection into one ordered
//!   stream of inbound messages
//! - **`MultiWriter`** (fan-out): sends each message to every connection
//!   (PUB)
//! - **`LoadBalancedWriter`**: hands each message to one free connection and
//!   retries it elsewhere when the write fails (PUSH, DEALER)
//!
//! Until the first connection is registered, `read` and `write` suspend
//! instead of failing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zmux::prelude::*;
//!
//! # async fn example() -> zmux::prelude::Result<()> {
//! let ctx = Context::new();
//! let pool = QueuedReader::new(&ctx);
//!
//! // The transport layer hands over handshaken connections.
//! let (local, remote) = pipe();
//! pool.add_conn(MsgReader::new(Arc::new(local)));
//!
//! remote.write_msg(&Msg::from("Hello")).await?;
//! let msg = pool.read(&ctx).await?;
//! assert_eq!(msg.frame_str(0)?, "Hello");
//!
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Runtime
//!
//! Pools spawn one worker task per connection on the current `compio`
//! runtime, so `add_conn` must be called from inside one.

pub mod dev_tracing;

pub use zmux_core::{conn, context, error, gate, message, options, pipe, pool};

/// Everything needed to build on the pools.
pub mod prelude {
    pub use bytes::Bytes;
    pub use zmux_core::prelude::*;
}
