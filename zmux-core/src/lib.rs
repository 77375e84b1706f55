//! zmux Core
//!
//! The connection multiplexing kernel of a ZeroMQ-style socket: it turns N
//! live transport connections into one message-in / message-out endpoint.
//!
//! - Cancellation contexts (`context`)
//! - One-shot latch and readiness gate (`gate`)
//! - Connection capability and per-connection adapters (`conn`)
//! - Fan-in, fan-out and load-balanced pools (`pool`)
//! - Multipart messages (`message`)
//! - In-process connection pairs (`pipe`)
//! - Pool options (`options`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod conn;
pub mod context;
pub mod error;
pub mod gate;
pub mod message;
pub mod options;
pub mod pipe;
pub mod poison;
pub mod pool;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::conn::{Connection, MsgReader, MsgWriter};
    pub use crate::context::{Cause, Context};
    pub use crate::error::{Error, Result};
    pub use crate::gate::ReadyGate;
    pub use crate::message::Msg;
    pub use crate::options::{PoolOptions, RetryPolicy};
    pub use crate::pipe::{pipe, Pipe};
    pub use crate::pool::{LoadBalancedWriter, MultiWriter, QueuedReader, ReadPool, WritePool};
}
