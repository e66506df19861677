//! USB backend capability set
//!
//! The driver talks to the radio through a small set of transport
//! capabilities: probe/open, control and bulk transfers, device speed and
//! string descriptors, and per-stream transfer submission. One
//! implementation exists per OS/driver combination; implementations are
//! registered in a [`BackendRegistry`] and selected at runtime by
//! [`BackendId`], never by compile-time linkage.

pub mod libusb;
pub mod mock;

use crate::error::{Error, Result};
use crate::stream::Module;
use std::time::Duration;

pub use libusb::LibusbBackend;
pub use mock::{MockBackend, MockBehavior, MockStats};

/// Bulk IN endpoint carrying RX samples
pub const SAMPLE_EP_IN: u8 = 0x81;
/// Bulk OUT endpoint carrying TX samples
pub const SAMPLE_EP_OUT: u8 = 0x01;

/// Identifies a registered USB transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    /// libusb transport via rusb
    Libusb,
    /// Deterministic in-memory transport for tests and offline development
    Mock,
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendId::Libusb => write!(f, "libusb"),
            BackendId::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BackendId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "libusb" => Ok(BackendId::Libusb),
            "mock" => Ok(BackendId::Mock),
            _ => Err(Error::InvalidParam("unknown backend name")),
        }
    }
}

/// A device visible to one of the registered backends
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Backend that discovered the device
    pub backend: BackendId,
    /// Bus the device sits on
    pub bus_number: u8,
    /// Address on the bus
    pub address: u8,
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Serial number string, if readable
    pub serial: Option<String>,
}

/// Negotiated USB device speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpeed {
    /// 480 Mbps (USB 2.0)
    High,
    /// 5 Gbps and up (USB 3.x)
    Super,
}

impl std::fmt::Display for DeviceSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSpeed::High => write!(f, "high"),
            DeviceSpeed::Super => write!(f, "super"),
        }
    }
}

/// Setup packet fields of a control transfer
#[derive(Debug, Clone, Copy)]
pub struct ControlSetup {
    /// bmRequestType; bit 7 selects the direction
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

impl ControlSetup {
    /// Whether this is a device-to-host transfer
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// A completed stream transfer: the buffer handed back by the backend and
/// the number of bytes actually transferred
#[derive(Debug)]
pub struct Completion {
    /// Buffer ownership returns to the caller
    pub data: Vec<u8>,
    /// Bytes transferred; may be less than `data.len()` on short transfers
    pub len: usize,
}

/// A rejected submission; ownership of the buffer is handed back so the
/// caller can return it to its pool
#[derive(Debug)]
pub struct SubmitError {
    pub error: Error,
    pub data: Vec<u8>,
}

/// Discovery and open entry point of one transport
pub trait UsbBackend: Send + Sync {
    /// Registry key of this backend
    fn id(&self) -> BackendId;

    /// Enumerate devices this backend can drive
    fn probe(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a probed device
    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn UsbHandle>>;
}

/// An open device; closed on drop
pub trait UsbHandle: Send + Sync {
    /// Execute a control transfer on endpoint 0. Returns bytes transferred.
    fn control_transfer(
        &self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Execute a blocking bulk transfer. Direction follows bit 7 of
    /// `endpoint`. Returns bytes transferred.
    fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Negotiated device speed
    fn speed(&self) -> Result<DeviceSpeed>;

    /// Fetch a string descriptor by index
    fn string_descriptor(&self, index: u8) -> Result<String>;

    /// Allocate per-stream transfer resources: one slot per in-flight
    /// transfer on the module's sample endpoint
    fn init_stream(&self, module: Module, num_transfers: usize) -> Result<Box<dyn StreamEndpoint>>;
}

/// Per-stream transfer slots of one endpoint
///
/// A slot is idle, submitted (the backend owns its buffer), or
/// completed-pending-wait. Dropping the endpoint releases all slot
/// resources; callers must reap submitted slots with [`wait`] first.
///
/// [`wait`]: StreamEndpoint::wait
pub trait StreamEndpoint: Send {
    /// Abort and reset the endpoint before streaming starts
    fn reset(&mut self) -> Result<()>;

    /// Begin a transfer on `slot`. Ownership of `data` moves to the backend
    /// until the matching [`wait`](StreamEndpoint::wait) returns it; a
    /// rejected submission hands the buffer straight back.
    fn submit(&mut self, slot: usize, data: Vec<u8>) -> std::result::Result<(), SubmitError>;

    /// Await completion of the transfer on `slot`, bounded by `timeout`
    fn wait(&mut self, slot: usize, timeout: Duration) -> Result<Completion>;

    /// Ask the backend to finish outstanding transfers early. Submitted
    /// slots must still be reaped with [`wait`](StreamEndpoint::wait).
    fn cancel_all(&mut self);
}

/// Runtime-selected set of USB transports
pub struct BackendRegistry {
    backends: Vec<Box<dyn UsbBackend>>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Registry with every transport available on this host
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        match LibusbBackend::new() {
            Ok(backend) => registry.register(Box::new(backend)),
            Err(e) => tracing::warn!("libusb backend unavailable: {}", e),
        }
        registry
    }

    /// Add a transport. A later registration with the same id shadows an
    /// earlier one.
    pub fn register(&mut self, backend: Box<dyn UsbBackend>) {
        tracing::debug!("registered {} backend", backend.id());
        self.backends.insert(0, backend);
    }

    /// Look up a transport by id
    pub fn get(&self, id: BackendId) -> Option<&dyn UsbBackend> {
        self.backends
            .iter()
            .find(|b| b.id() == id)
            .map(|b| b.as_ref())
    }

    /// Enumerate devices across all registered transports
    pub fn probe_all(&self) -> Vec<DeviceInfo> {
        let mut devices = Vec::new();
        for backend in &self.backends {
            match backend.probe() {
                Ok(found) => devices.extend(found),
                Err(e) => tracing::warn!("{} probe failed: {}", backend.id(), e),
            }
        }
        devices
    }

    /// Open a device through the backend that discovered it
    pub fn open(&self, info: &DeviceInfo) -> Result<Box<dyn UsbHandle>> {
        self.get(info.backend)
            .ok_or(Error::NoBackend(info.backend))?
            .open(info)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
