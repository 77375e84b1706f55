/// zmux Error Types
///
/// Every failure a pool can report is a returned value of this type; nothing
/// in the multiplexing kernel panics or aborts on a per-connection fault.

use std::io;
use thiserror::Error;

/// Main error type for pool and connection operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error reported by the underlying transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The operation's context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The operation's context deadline elapsed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The pool has been closed
    #[error("pool closed")]
    PoolClosed,

    /// The connection was closed locally
    #[error("connection closed")]
    ConnectionClosed,

    /// The remote end went away
    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    /// A previous read or write was abandoned mid-message
    #[error("connection poisoned by cancelled I/O")]
    Poisoned,

    /// A load-balanced message ran out of delivery attempts
    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Transport-level protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for zmux operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a peer disconnected error
    pub fn peer_disconnected(peer: impl Into<String>) -> Self {
        Self::PeerDisconnected(peer.into())
    }

    /// Check if this error came from a cancelled or expired context
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Check if this is a connection error
    ///
    /// Connection errors are local to one adapter: the pool isolates the
    /// adapter and keeps serving the rest.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ConnectionClosed
                | Self::PeerDisconnected(_)
                | Self::Poisoned
                | Self::Protocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::PoolClosed.is_cancellation());
        assert!(!Error::Cancelled.is_connection_error());
    }

    #[test]
    fn classifies_connection_errors() {
        let io = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(io.is_connection_error());
        assert!(Error::peer_disconnected("tcp://10.0.0.1:5555").is_connection_error());
        assert!(Error::Poisoned.is_connection_error());
        assert!(!Error::PoolClosed.is_connection_error());
        assert!(!Error::RetriesExhausted { attempts: 3 }.is_connection_error());
    }

    #[test]
    fn display_matches_variant() {
        assert_eq!(
            Error::RetriesExhausted { attempts: 4 }.to_string(),
            "delivery failed after 4 attempts"
        );
        assert_eq!(
            Error::protocol("bad frame").to_string(),
            "Protocol error: bad frame"
        );
    }
}
