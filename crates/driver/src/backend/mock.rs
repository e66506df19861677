//! Deterministic in-memory transport
//!
//! A first-class backend that stands in for real hardware, the way a file
//! source sits beside hardware sources in SDR capture tools. RX transfers
//! complete with a monotonically increasing counter pattern (sample `k`
//! carries I == Q == k, wrapping), TX transfers are captured for
//! inspection, and [`MockBehavior`] can inject latency, failures, or a
//! device that never completes anything. The test suites and the CLI's
//! offline mode both run on it.

use crate::backend::{
    BackendId, Completion, ControlSetup, DeviceInfo, DeviceSpeed, StreamEndpoint, SubmitError,
    UsbBackend, UsbHandle,
};
use crate::error::{Error, Result};
use crate::stream::Module;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;
use wire::{METADATA_LEN, Metadata};

/// Tunable fault injection for the mock transport
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Artificial latency before each completion
    pub completion_delay: Duration,
    /// Simulate a hung device: no submitted transfer ever completes
    pub never_complete: bool,
    /// Fail completions after this many have succeeded
    pub fail_after: Option<usize>,
    /// Write metadata headers into RX buffers (for `Sc16Q11Meta` streams)
    pub meta: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            completion_delay: Duration::ZERO,
            never_complete: false,
            fail_after: None,
            meta: false,
        }
    }
}

/// Resource counters shared by every stream the backend creates
#[derive(Debug, Default)]
pub struct MockStats {
    pub streams_initialized: AtomicUsize,
    pub streams_dropped: AtomicUsize,
    pub submitted: AtomicUsize,
    pub completed: AtomicUsize,
    /// Transfers currently owned by the backend
    pub outstanding: AtomicUsize,
}

impl MockStats {
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

/// In-memory transport
pub struct MockBackend {
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    tx_sink: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            stats: Arc::new(MockStats::default()),
            tx_sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Counters shared with every handle/stream this backend creates
    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    /// Buffers captured from TX streams, in flush order
    pub fn tx_captures(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.tx_sink.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for MockBackend {
    fn id(&self) -> BackendId {
        BackendId::Mock
    }

    fn probe(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            backend: BackendId::Mock,
            bus_number: 0,
            address: 1,
            vendor_id: 0x2cf0,
            product_id: 0x5246,
            serial: Some("MOCK0001".to_string()),
        }])
    }

    fn open(&self, _info: &DeviceInfo) -> Result<Box<dyn UsbHandle>> {
        Ok(Box::new(MockHandle {
            behavior: self.behavior.clone(),
            stats: self.stats.clone(),
            tx_sink: self.tx_sink.clone(),
        }))
    }
}

struct MockHandle {
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    tx_sink: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl UsbHandle for MockHandle {
    fn control_transfer(
        &self,
        setup: ControlSetup,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        trace!(request = setup.request, "mock control transfer");
        if setup.is_in() {
            data.fill(0);
        }
        Ok(data.len())
    }

    fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], _timeout: Duration) -> Result<usize> {
        if endpoint & 0x80 != 0 {
            data.fill(0);
        }
        Ok(data.len())
    }

    fn speed(&self) -> Result<DeviceSpeed> {
        Ok(DeviceSpeed::Super)
    }

    fn string_descriptor(&self, _index: u8) -> Result<String> {
        Ok("MOCK0001".to_string())
    }

    fn init_stream(&self, module: Module, num_transfers: usize) -> Result<Box<dyn StreamEndpoint>> {
        self.stats.streams_initialized.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            module,
            behavior: self.behavior.clone(),
            stats: self.stats.clone(),
            tx_sink: self.tx_sink.clone(),
            pending: (0..num_transfers).map(|_| None).collect(),
            counter: 0,
            timestamp: 0,
            completed: 0,
            cancelled: false,
        }))
    }
}

struct MockStream {
    module: Module,
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    tx_sink: Arc<Mutex<Vec<Vec<u8>>>>,
    pending: Vec<Option<Vec<u8>>>,
    counter: i16,
    timestamp: u64,
    completed: usize,
    cancelled: bool,
}

impl MockStream {
    /// Fill an RX buffer with the counter pattern (and header, if enabled)
    fn fill_rx(&mut self, data: &mut [u8]) {
        let header = if self.behavior.meta { METADATA_LEN } else { 0 };
        if self.behavior.meta {
            // encode cannot fail: stream buffers are larger than the header
            let _ = Metadata::new(self.timestamp, 0).encode(data);
        }
        let payload = &mut data[header..];
        let samples = payload.len() / 4;
        for pair in payload.chunks_exact_mut(4) {
            let bytes = self.counter.to_le_bytes();
            pair[0] = bytes[0];
            pair[1] = bytes[1];
            pair[2] = bytes[0];
            pair[3] = bytes[1];
            self.counter = self.counter.wrapping_add(1);
        }
        self.timestamp += samples as u64;
    }
}

impl StreamEndpoint for MockStream {
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn submit(&mut self, slot: usize, data: Vec<u8>) -> std::result::Result<(), SubmitError> {
        let Some(pending) = self.pending.get_mut(slot) else {
            return Err(SubmitError {
                error: Error::InvalidParam("transfer slot out of range"),
                data,
            });
        };
        if pending.is_some() {
            return Err(SubmitError {
                error: Error::InvalidState("transfer slot is already submitted"),
                data,
            });
        }
        // submission hands the data to the device, so TX content is
        // captured here, in submission order
        if self.module == Module::Tx {
            self.tx_sink.lock().unwrap().push(data.clone());
        }
        *pending = Some(data);
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.stats.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self, slot: usize, timeout: Duration) -> Result<Completion> {
        if self
            .pending
            .get(slot)
            .ok_or(Error::InvalidParam("transfer slot out of range"))?
            .is_none()
        {
            return Err(Error::InvalidState("transfer slot is idle"));
        }

        if self.behavior.never_complete && !self.cancelled {
            std::thread::sleep(timeout);
            return Err(Error::Timeout);
        }
        if !self.cancelled && !self.behavior.completion_delay.is_zero() {
            if self.behavior.completion_delay >= timeout {
                std::thread::sleep(timeout);
                return Err(Error::Timeout);
            }
            std::thread::sleep(self.behavior.completion_delay);
        }

        let Some(mut data) = self.pending[slot].take() else {
            return Err(Error::InvalidState("transfer slot is idle"));
        };
        self.stats.outstanding.fetch_sub(1, Ordering::SeqCst);

        // a cancelled transfer hands its buffer back without data
        if self.cancelled {
            return Ok(Completion { data, len: 0 });
        }

        if let Some(limit) = self.behavior.fail_after {
            if self.completed >= limit {
                return Err(Error::Io("injected transfer failure".to_string()));
            }
        }

        let len = data.len();
        if self.module == Module::Rx {
            self.fill_rx(&mut data);
        }
        self.completed += 1;
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Completion { data, len })
    }

    fn cancel_all(&mut self) {
        self.cancelled = true;
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stats.streams_dropped.fetch_add(1, Ordering::SeqCst);
    }
}
