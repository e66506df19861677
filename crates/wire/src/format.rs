//! Sample formats and SC16 Q11 byte conversion
//!
//! The radio produces and consumes interleaved complex samples. In SC16 Q11
//! each complex sample is a pair of little-endian i16 values (I then Q) with
//! 12 significant bits, so one sample occupies 4 bytes on the wire.

use crate::error::{Result, WireError};
use crate::metadata::METADATA_LEN;
use serde::{Deserialize, Serialize};

/// On-the-wire layout of the sample stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// SC16 Q11 samples, no framing
    Sc16Q11,
    /// SC16 Q11 samples preceded by a per-buffer metadata header
    Sc16Q11Meta,
}

impl SampleFormat {
    /// Bytes occupied by one complex sample
    pub const fn bytes_per_sample(self) -> usize {
        4
    }

    /// Bytes of framing at the start of each stream buffer
    pub const fn header_len(self) -> usize {
        match self {
            SampleFormat::Sc16Q11 => 0,
            SampleFormat::Sc16Q11Meta => METADATA_LEN,
        }
    }

    /// Total buffer length in bytes for `samples` payload samples
    pub const fn buffer_len(self, samples: usize) -> usize {
        self.header_len() + samples * self.bytes_per_sample()
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Sc16Q11 => write!(f, "sc16q11"),
            SampleFormat::Sc16Q11Meta => write!(f, "sc16q11meta"),
        }
    }
}

/// Pack interleaved i16 I/Q values into little-endian SC16 Q11 bytes.
///
/// `samples` holds 2 values per complex sample; `out` must be exactly
/// `2 * samples.len()` bytes.
pub fn pack_sc16q11(samples: &[i16], out: &mut [u8]) -> Result<()> {
    if samples.len() % 2 != 0 {
        return Err(WireError::UnpairedSamples(samples.len()));
    }
    let needed = samples.len() * 2;
    if out.len() != needed {
        return Err(WireError::LengthMismatch {
            needed,
            available: out.len(),
        });
    }
    for (value, chunk) in samples.iter().zip(out.chunks_exact_mut(2)) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

/// Unpack little-endian SC16 Q11 bytes into interleaved i16 I/Q values.
///
/// `bytes` must be exactly `2 * out.len()` bytes.
pub fn unpack_sc16q11(bytes: &[u8], out: &mut [i16]) -> Result<()> {
    if out.len() % 2 != 0 {
        return Err(WireError::UnpairedSamples(out.len()));
    }
    let needed = out.len() * 2;
    if bytes.len() != needed {
        return Err(WireError::LengthMismatch {
            needed,
            available: bytes.len(),
        });
    }
    for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *value = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
    Ok(())
}
