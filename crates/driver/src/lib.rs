//! rfstream driver
//!
//! Host-side runtime for a USB-attached software-defined radio. The driver
//! discovers devices across USB backends, owns the RX/TX streaming data
//! paths, and moves IQ sample buffers between host memory and the radio's
//! bulk endpoints in real time.
//!
//! Two streaming interfaces are exposed:
//!
//! - the **asynchronous engine** ([`Stream::run`]): a fixed ring of
//!   in-flight USB transfers serviced in round-robin order, with a user
//!   callback supplying the next buffer for each completed slot;
//! - the **synchronous façade** ([`Device::sync_rx`] / [`Device::sync_tx`]):
//!   blocking receive/transmit of arbitrary sample counts with timeout and
//!   metadata-framed burst boundaries, built on the engine.
//!
//! USB transports implement the capability traits in [`backend`] and are
//! selected at runtime through a [`BackendRegistry`].
//!
//! # Example
//!
//! ```no_run
//! use driver::{BackendRegistry, Device, Module, SampleFormat, StreamConfig};
//! use std::time::Duration;
//!
//! # fn main() -> driver::Result<()> {
//! let registry = BackendRegistry::with_defaults();
//! let mut dev = Device::open_first(&registry)?;
//!
//! dev.sync_config(
//!     Module::Rx,
//!     StreamConfig {
//!         format: SampleFormat::Sc16Q11,
//!         num_buffers: 16,
//!         samples_per_buffer: 8192,
//!         num_transfers: 8,
//!         timeout: Duration::from_millis(3500),
//!     },
//! )?;
//!
//! let mut samples = vec![0i16; 10000 * 2];
//! dev.sync_rx(&mut samples, None, Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod device;
pub mod error;
pub mod stream;

pub use backend::{
    BackendId, BackendRegistry, Completion, ControlSetup, DeviceInfo, DeviceSpeed, StreamEndpoint,
    SubmitError, UsbBackend, UsbHandle,
};
pub use device::Device;
pub use error::{Error, ErrorKind, Result};
pub use stream::{
    BufferId, Module, Stream, StreamAction, StreamConfig, StreamHandle, StreamState, TransferEvent,
    TransferPool,
};
pub use wire::{Metadata, SampleFormat};
