//! Wire representation of the sample stream for rfstream
//!
//! This crate defines how IQ samples and their per-buffer metadata are laid
//! out in the byte buffers exchanged with the radio's USB bulk endpoints.
//! It provides the sample format descriptors, SC16 Q11 packing/unpacking,
//! and the 16-byte metadata header used for timestamped bursts.
//!
//! # Example
//!
//! ```
//! use wire::{SampleFormat, pack_sc16q11, unpack_sc16q11};
//!
//! // One complex sample is an interleaved I/Q pair of i16 values.
//! let iq = [100i16, -100, 200, -200];
//! let mut bytes = vec![0u8; SampleFormat::Sc16Q11.bytes_per_sample() * 2];
//! pack_sc16q11(&iq, &mut bytes).unwrap();
//!
//! let mut out = [0i16; 4];
//! unpack_sc16q11(&bytes, &mut out).unwrap();
//! assert_eq!(iq, out);
//! ```

pub mod error;
pub mod format;
pub mod metadata;

pub use error::{Result, WireError};
pub use format::{SampleFormat, pack_sc16q11, unpack_sc16q11};
pub use metadata::{
    FLAG_RX_NOW, FLAG_TX_BURST_END, FLAG_TX_BURST_START, METADATA_LEN, Metadata, STATUS_OVERRUN,
    STATUS_UNDERRUN,
};
