//! Frame buffer for accumulating partial reads.
//!
//! Socket reads hand back arbitrary chunks; a frame may arrive split
//! across several reads or packed together with its neighbors. The buffer
//! accumulates bytes in a `BytesMut` and yields each complete event
//! exactly once.
//!
//! # Example
//!
//! ```
//! use broccoli_client::protocol::{build_frame, Event, FrameBuffer};
//!
//! let frame = build_frame(&Event::new("foo").arg(true));
//! let mut buffer = FrameBuffer::new();
//!
//! // First chunk is incomplete, second completes the frame.
//! assert!(buffer.push(&frame[..5]).unwrap().is_empty());
//! let events = buffer.push(&frame[5..]).unwrap();
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].name(), "foo");
//! ```

use bytes::BytesMut;

use super::frame::{try_parse_frame, Event};
use super::wire::FrameLimits;
use crate::error::Result;

/// Buffer for extracting complete event frames from a byte stream.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Limits enforced on inbound frames.
    limits: FrameLimits,
}

impl FrameBuffer {
    /// Create a frame buffer with default limits.
    pub fn new() -> Self {
        Self::with_limits(FrameLimits::default())
    }

    /// Create a frame buffer with custom limits.
    pub fn with_limits(limits: FrameLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            limits,
        }
    }

    /// Push data into the buffer and extract all complete events.
    ///
    /// Partial trailing data stays buffered for the next push. A frame
    /// split across chunks is delivered exactly once, on the push that
    /// completes it.
    ///
    /// # Errors
    ///
    /// Fails when the buffered bytes can never become a valid frame
    /// (limits exceeded, corrupt values). The error is fatal: callers
    /// should close the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Event>> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        while let Some((event, consumed)) = try_parse_frame(&self.buffer, &self.limits)? {
            let _ = self.buffer.split_to(consumed);
            events.push(event);
        }
        Ok(events)
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
