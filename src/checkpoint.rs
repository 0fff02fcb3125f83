//! Checkpoint state encoding.
//!
//! Stateful nodes persist their fields through a [`StateWriter`] during the
//! save pass and restore them through a [`StateReader`] on recovery. Values
//! are written as length-prefixed MessagePack frames with CRC32 checksums, so
//! a truncated or corrupted checkpoint is detected on load rather than
//! silently misread. Where the resulting bytes are stored is up to the host;
//! only the field layout is defined here.

use crate::error::{EngineError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes for an encoded state blob.
const STATE_MAGIC: &[u8; 4] = b"RVS\0";

/// Current state blob format version.
const STATE_VERSION: u8 = 1;

/// Sanity cap on a single frame (100MB).
const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Serializes operator state into a framed byte buffer.
///
/// Frames are read back in write order; the save and load passes visit nodes
/// in the same deterministic pre-order, which is what keeps the two sides
/// aligned without per-node keys.
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(STATE_MAGIC);
        buf.push(STATE_VERSION);
        StateWriter { buf }
    }

    /// Append one value as a checksummed frame.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let encoded = rmp_serde::to_vec(value)?;

        let len = encoded.len() as u32;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(&encoded);

        let checksum = crc32fast::hash(&encoded);
        self.buf.extend_from_slice(&checksum.to_le_bytes());

        Ok(())
    }

    /// Number of payload bytes written so far (excluding the header).
    pub fn is_empty(&self) -> bool {
        self.buf.len() == STATE_MAGIC.len() + 1
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for StateWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserializes operator state frames written by a [`StateWriter`].
pub struct StateReader {
    buf: Vec<u8>,
    pos: usize,
}

impl StateReader {
    /// Wrap an encoded state blob, verifying its header.
    pub fn new(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < STATE_MAGIC.len() + 1 {
            return Err(EngineError::InvalidFormat("state blob too short".into()));
        }
        if &buf[..4] != STATE_MAGIC {
            return Err(EngineError::InvalidFormat("invalid state magic".into()));
        }
        if buf[4] != STATE_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "unsupported state version: {}",
                buf[4]
            )));
        }
        Ok(StateReader { buf, pos: 5 })
    }

    /// Read the next frame as a value of type `T`.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let len = self.take(4)?;
        let len = u32::from_le_bytes(len.try_into().unwrap()) as usize;

        if len > MAX_FRAME_LEN {
            return Err(EngineError::Corruption("state frame too large".into()));
        }

        let encoded = self.take(len)?.to_vec();

        let checksum_bytes = self.take(4)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(EngineError::Corruption("state frame checksum mismatch".into()));
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }

    /// Whether all frames have been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.buf.len() {
            return Err(EngineError::Corruption("truncated state blob".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
