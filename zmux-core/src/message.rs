//! Multipart messages moved through the pools.
//!
//! A [`Msg`] is the unit of transfer: one complete logical message made of
//! ordered frames. Failures travel next to it as `Result<Msg>` rather than
//! inside it.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A multipart message with a fluent builder API.
///
/// # Examples
///
/// ```
/// use zmux_core::message::Msg;
///
/// let msg = Msg::new()
///     .push_str("topic")
///     .push(&b"data"[..]);
/// assert_eq!(msg.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Msg {
    frames: Vec<Bytes>,
}

impl Msg {
    /// Create a new empty message.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Create a message from existing frames.
    #[must_use]
    pub const fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// Create a single-frame message from a string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self {
            frames: vec![Bytes::from(s.into())],
        }
    }

    /// Add a frame from any type that can be converted to `Bytes`.
    #[must_use]
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Add a string frame (UTF-8 encoded).
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.frames.push(Bytes::copy_from_slice(s.as_bytes()));
        self
    }

    /// Add an empty frame (envelope delimiter).
    #[must_use]
    pub fn push_empty(mut self) -> Self {
        self.frames.push(Bytes::new());
        self
    }

    /// Get the number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the message has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total payload size across all frames.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Get a reference to the frames.
    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Consume the message and return the frames.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Borrow frame `index` as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame doesn't exist or isn't valid UTF-8.
    pub fn frame_str(&self, index: usize) -> Result<&str> {
        let frame = self
            .frames
            .get(index)
            .ok_or_else(|| Error::protocol(format!("frame index {index} out of bounds")))?;

        std::str::from_utf8(frame).map_err(|e| Error::protocol(e.to_string()))
    }
}

impl From<Vec<Bytes>> for Msg {
    fn from(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl From<&str> for Msg {
    fn from(s: &str) -> Self {
        Self::new().push_str(s)
    }
}

impl From<Msg> for Vec<Bytes> {
    fn from(msg: Msg) -> Self {
        msg.frames
    }
}
