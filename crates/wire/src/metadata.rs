//! Per-buffer metadata framing
//!
//! When a stream runs in `Sc16Q11Meta` format, every buffer exchanged with
//! the device starts with a fixed 16-byte header carrying the timestamp of
//! the buffer's first sample, burst flags, and a status word:
//!
//! ```text
//! offset  size  field
//! 0       8     timestamp (LE, free-running sample counter)
//! 8       4     flags     (LE, burst framing bits)
//! 12      4     status    (LE, overrun/underrun reporting)
//! ```

use crate::error::{Result, WireError};
use bytes::{Buf, BufMut};

/// Length of the metadata header at the start of each framed buffer
pub const METADATA_LEN: usize = 16;

/// First call of a TX burst
pub const FLAG_TX_BURST_START: u32 = 1 << 0;
/// Call that completes a TX burst
pub const FLAG_TX_BURST_END: u32 = 1 << 1;
/// RX: deliver samples immediately rather than at `timestamp`
pub const FLAG_RX_NOW: u32 = 1 << 2;

/// Receive path dropped samples before this buffer
pub const STATUS_OVERRUN: u32 = 1 << 0;
/// Transmit path ran out of samples mid-burst
pub const STATUS_UNDERRUN: u32 = 1 << 1;

/// Timestamp, burst flags, and status attached to a stream buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Monotonic sample counter of the first sample in the buffer
    pub timestamp: u64,
    /// Burst framing flags (`FLAG_*` constants)
    pub flags: u32,
    /// Status word reported by the device (`STATUS_*` constants)
    pub status: u32,
}

impl Metadata {
    /// Construct metadata with the given timestamp and flags
    pub fn new(timestamp: u64, flags: u32) -> Self {
        Self {
            timestamp,
            flags,
            status: 0,
        }
    }

    /// Whether a flag bit is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Serialize the header into the first [`METADATA_LEN`] bytes of `out`
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < METADATA_LEN {
            return Err(WireError::TruncatedHeader {
                expected: METADATA_LEN,
                actual: out.len(),
            });
        }
        let mut dst = &mut out[..METADATA_LEN];
        dst.put_u64_le(self.timestamp);
        dst.put_u32_le(self.flags);
        dst.put_u32_le(self.status);
        Ok(())
    }

    /// Parse the header from the first [`METADATA_LEN`] bytes of `src`
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < METADATA_LEN {
            return Err(WireError::TruncatedHeader {
                expected: METADATA_LEN,
                actual: src.len(),
            });
        }
        let mut buf = &src[..METADATA_LEN];
        Ok(Self {
            timestamp: buf.get_u64_le(),
            flags: buf.get_u32_le(),
            status: buf.get_u32_le(),
        })
    }
}
