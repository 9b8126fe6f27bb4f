//! Framed byte containers for the command channel.
//!
//! Both types validate their length contract at construction, so a channel
//! operation never sees a count that disagrees with the backing storage.

use std::fmt;

use crate::error::{PcdError, Result};

/// Outbound command bytes. Never interpreted by this layer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> CommandBuffer<'a> {
    /// Frame the first `byte_count` bytes of `data`.
    pub fn new(data: &'a [u8], byte_count: usize) -> Result<Self> {
        if byte_count == 0 {
            return Err(PcdError::invalid("command byte count must be non-zero"));
        }
        if data.len() < byte_count {
            return Err(PcdError::invalid(format!(
                "command buffer holds {} bytes, {} requested",
                data.len(),
                byte_count
            )));
        }
        Ok(Self {
            bytes: &data[..byte_count],
        })
    }

    /// Frame all of `data`.
    pub fn from_slice(data: &'a [u8]) -> Result<Self> {
        Self::new(data, data.len())
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for CommandBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandBuffer({} bytes)", self.bytes.len())
    }
}

/// Caller-owned storage for one reply of a known size.
pub struct ReplyBuffer<'a> {
    region: &'a mut [u8],
    expected: usize,
    filled: usize,
}

impl<'a> ReplyBuffer<'a> {
    /// Expect exactly `expected` bytes into `region`.
    pub fn new(region: &'a mut [u8], expected: usize) -> Result<Self> {
        if expected == 0 {
            return Err(PcdError::invalid("expected reply size must be non-zero"));
        }
        if region.len() < expected {
            return Err(PcdError::invalid(format!(
                "reply buffer capacity {} is below expected {}",
                region.len(),
                expected
            )));
        }
        Ok(Self {
            region,
            expected,
            filled: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Bytes written by the last successful receive.
    pub fn filled(&self) -> &[u8] {
        &self.region[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Store an exact-size reply.
    pub(crate) fn fill(&mut self, data: &[u8]) {
        debug_assert_eq!(data.len(), self.expected);
        self.region[..data.len()].copy_from_slice(data);
        self.filled = data.len();
    }

    pub(crate) fn clear(&mut self) {
        self.filled = 0;
    }
}

impl fmt::Debug for ReplyBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyBuffer")
            .field("capacity", &self.region.len())
            .field("expected", &self.expected)
            .field("filled", &self.filled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_frames_prefix() {
        let data = [1u8, 2, 3, 4];
        let cmd = CommandBuffer::new(&data, 2).unwrap();
        assert_eq!(cmd.as_bytes(), &[1, 2]);
        assert_eq!(cmd.len(), 2);
    }

    #[test]
    fn test_command_buffer_rejects_bad_counts() {
        let data = [1u8, 2];
        assert!(matches!(
            CommandBuffer::new(&data, 0),
            Err(PcdError::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandBuffer::new(&data, 3),
            Err(PcdError::InvalidArgument(_))
        ));
        assert!(CommandBuffer::from_slice(&[]).is_err());
    }

    #[test]
    fn test_reply_buffer_contract() {
        let mut storage = [0u8; 8];
        assert!(ReplyBuffer::new(&mut storage, 0).is_err());
        assert!(ReplyBuffer::new(&mut storage, 9).is_err());

        let mut reply = ReplyBuffer::new(&mut storage, 4).unwrap();
        assert_eq!(reply.capacity(), 8);
        assert!(reply.is_empty());

        reply.fill(&[9, 8, 7, 6]);
        assert_eq!(reply.filled(), &[9, 8, 7, 6]);
        assert_eq!(reply.len(), 4);
    }
}
