//! libusb transport via rusb
//!
//! Discovery, control/bulk transfers, and the streaming endpoint for hosts
//! with a libusb-compatible driver. Streaming uses one worker thread per
//! transfer slot, each running a blocking bulk transfer at a time; slot
//! completions travel back over bounded channels, which gives the engine
//! the submit/wait shape the capability set requires while keeping
//! `num_transfers` transfers in flight.

use crate::backend::{
    BackendId, Completion, ControlSetup, DeviceInfo, DeviceSpeed, SAMPLE_EP_IN, SAMPLE_EP_OUT,
    StreamEndpoint, SubmitError, UsbBackend, UsbHandle,
};
use crate::error::{Error, Result};
use crate::stream::Module;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use rusb::{Context, DeviceDescriptor, DeviceHandle, UsbContext};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// USB ids the radio enumerates with
const RADIO_VID: u16 = 0x2cf0;
const RADIO_PID: u16 = 0x5246;

/// Timeout for descriptor reads during probe/open
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(500);

/// Backstop timeout for an individual bulk transfer on the sample
/// endpoints; the engine's own wait bound is the one callers configure
const STREAM_TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// libusb-backed transport
pub struct LibusbBackend {
    context: Context,
}

impl LibusbBackend {
    /// Create the backend; fails if no libusb context can be created
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }
}

impl UsbBackend for LibusbBackend {
    fn id(&self) -> BackendId {
        BackendId::Libusb
    }

    fn probe(&self) -> Result<Vec<DeviceInfo>> {
        let mut found = Vec::new();
        for device in self.context.devices().map_err(map_rusb_error)?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    warn!("failed to read device descriptor: {}", e);
                    continue;
                }
            };
            if descriptor.vendor_id() != RADIO_VID || descriptor.product_id() != RADIO_PID {
                continue;
            }

            // open briefly to pick up the serial; devices we cannot open
            // are still listed
            let serial = device
                .open()
                .ok()
                .and_then(|handle| read_serial(&handle, &descriptor));

            found.push(DeviceInfo {
                backend: BackendId::Libusb,
                bus_number: device.bus_number(),
                address: device.address(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                serial,
            });
        }
        debug!("libusb probe found {} device(s)", found.len());
        Ok(found)
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn UsbHandle>> {
        let device = self
            .context
            .devices()
            .map_err(map_rusb_error)?
            .iter()
            .find(|d| d.bus_number() == info.bus_number && d.address() == info.address)
            .ok_or(Error::NoDevice)?;

        let mut handle = device.open().map_err(map_rusb_error)?;
        // not supported on all platforms; claiming below still catches
        // an active kernel driver
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(0).map_err(map_rusb_error)?;
        handle.set_alternate_setting(0, 1).map_err(map_rusb_error)?;

        debug!(
            bus = info.bus_number,
            address = info.address,
            "libusb device opened"
        );
        Ok(Box::new(LibusbHandle {
            handle: Arc::new(handle),
        }))
    }
}

fn read_serial(handle: &DeviceHandle<Context>, descriptor: &DeviceDescriptor) -> Option<String> {
    let languages = handle.read_languages(DESCRIPTOR_TIMEOUT).ok()?;
    let language = languages.first().copied()?;
    handle
        .read_serial_number_string(language, descriptor, DESCRIPTOR_TIMEOUT)
        .ok()
}

/// An open libusb device
pub struct LibusbHandle {
    handle: Arc<DeviceHandle<Context>>,
}

impl UsbHandle for LibusbHandle {
    fn control_transfer(
        &self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        trace!(
            request_type = setup.request_type,
            request = setup.request,
            len = data.len(),
            "control transfer"
        );
        if setup.is_in() {
            self.handle
                .read_control(
                    setup.request_type,
                    setup.request,
                    setup.value,
                    setup.index,
                    data,
                    timeout,
                )
                .map_err(map_rusb_error)
        } else {
            self.handle
                .write_control(
                    setup.request_type,
                    setup.request,
                    setup.value,
                    setup.index,
                    data,
                    timeout,
                )
                .map_err(map_rusb_error)
        }
    }

    fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], timeout: Duration) -> Result<usize> {
        if endpoint & 0x80 != 0 {
            self.handle
                .read_bulk(endpoint, data, timeout)
                .map_err(map_rusb_error)
        } else {
            self.handle
                .write_bulk(endpoint, data, timeout)
                .map_err(map_rusb_error)
        }
    }

    fn speed(&self) -> Result<DeviceSpeed> {
        match self.handle.device().speed() {
            rusb::Speed::High => Ok(DeviceSpeed::High),
            rusb::Speed::Super | rusb::Speed::SuperPlus => Ok(DeviceSpeed::Super),
            other => Err(Error::Unexpected(format!(
                "cannot stream at device speed {:?}",
                other
            ))),
        }
    }

    fn string_descriptor(&self, index: u8) -> Result<String> {
        let languages = self
            .handle
            .read_languages(DESCRIPTOR_TIMEOUT)
            .map_err(map_rusb_error)?;
        let language = languages
            .first()
            .copied()
            .ok_or_else(|| Error::Unexpected("device reports no string languages".to_string()))?;
        self.handle
            .read_string_descriptor(language, index, DESCRIPTOR_TIMEOUT)
            .map_err(map_rusb_error)
    }

    fn init_stream(&self, module: Module, num_transfers: usize) -> Result<Box<dyn StreamEndpoint>> {
        Ok(Box::new(LibusbStream::new(
            self.handle.clone(),
            module,
            num_transfers,
        )?))
    }
}

struct SlotDone {
    data: Vec<u8>,
    result: std::result::Result<usize, rusb::Error>,
}

struct TransferSlot {
    submit_tx: Sender<Vec<u8>>,
    done_rx: Receiver<SlotDone>,
    worker: Option<JoinHandle<()>>,
    busy: bool,
}

/// Streaming endpoint backed by per-slot bulk transfer workers
struct LibusbStream {
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    slots: Vec<TransferSlot>,
}

impl LibusbStream {
    fn new(
        handle: Arc<DeviceHandle<Context>>,
        module: Module,
        num_transfers: usize,
    ) -> Result<Self> {
        let endpoint = match module {
            Module::Rx => SAMPLE_EP_IN,
            Module::Tx => SAMPLE_EP_OUT,
        };

        let mut slots = Vec::with_capacity(num_transfers);
        for slot in 0..num_transfers {
            let (submit_tx, submit_rx) = bounded::<Vec<u8>>(1);
            let (done_tx, done_rx) = bounded::<SlotDone>(1);
            let worker_handle = handle.clone();
            let worker = std::thread::Builder::new()
                .name(format!("rfstream-usb-{}", slot))
                .spawn(move || slot_worker(worker_handle, endpoint, submit_rx, done_tx))
                .map_err(|e| Error::Memory(format!("failed to spawn transfer worker: {}", e)))?;
            slots.push(TransferSlot {
                submit_tx,
                done_rx,
                worker: Some(worker),
                busy: false,
            });
        }

        debug!(endpoint, num_transfers, "libusb stream initialized");
        Ok(Self {
            handle,
            endpoint,
            slots,
        })
    }
}

/// One blocking bulk transfer at a time; exits when the stream drops the
/// submission channel.
fn slot_worker(
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    submit_rx: Receiver<Vec<u8>>,
    done_tx: Sender<SlotDone>,
) {
    while let Ok(mut data) = submit_rx.recv() {
        let result = if endpoint & 0x80 != 0 {
            handle.read_bulk(endpoint, &mut data, STREAM_TRANSFER_TIMEOUT)
        } else {
            handle.write_bulk(endpoint, &data, STREAM_TRANSFER_TIMEOUT)
        };
        if done_tx.send(SlotDone { data, result }).is_err() {
            break;
        }
    }
    trace!(endpoint, "transfer worker exiting");
}

impl StreamEndpoint for LibusbStream {
    fn reset(&mut self) -> Result<()> {
        // clear_halt needs exclusive access, which the shared transfer
        // handle cannot give; a second open of the same device provides it
        let mut control = self.handle.device().open().map_err(map_rusb_error)?;
        control
            .clear_halt(self.endpoint)
            .map_err(map_rusb_error)
    }

    fn submit(&mut self, slot: usize, data: Vec<u8>) -> std::result::Result<(), SubmitError> {
        let Some(s) = self.slots.get_mut(slot) else {
            return Err(SubmitError {
                error: Error::InvalidParam("transfer slot out of range"),
                data,
            });
        };
        if s.busy {
            return Err(SubmitError {
                error: Error::InvalidState("transfer slot is already submitted"),
                data,
            });
        }
        match s.submit_tx.try_send(data) {
            Ok(()) => {
                s.busy = true;
                Ok(())
            }
            Err(TrySendError::Full(data)) | Err(TrySendError::Disconnected(data)) => {
                Err(SubmitError {
                    error: Error::Io("transfer worker unavailable".to_string()),
                    data,
                })
            }
        }
    }

    fn wait(&mut self, slot: usize, timeout: Duration) -> Result<Completion> {
        let s = self
            .slots
            .get_mut(slot)
            .ok_or(Error::InvalidParam("transfer slot out of range"))?;
        if !s.busy {
            return Err(Error::InvalidState("transfer slot is idle"));
        }
        match s.done_rx.recv_timeout(timeout) {
            Ok(done) => {
                s.busy = false;
                match done.result {
                    Ok(len) => Ok(Completion {
                        data: done.data,
                        len,
                    }),
                    Err(e) => Err(map_rusb_error(e)),
                }
            }
            // the transfer stays in flight; the caller may wait again
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                s.busy = false;
                Err(Error::Unexpected("transfer worker died".to_string()))
            }
        }
    }

    fn cancel_all(&mut self) {
        // the blocking API offers no true cancellation; in-flight transfers
        // run out their backstop timeout and are reaped by the drain
        debug!(endpoint = self.endpoint, "cancel requested");
    }
}

impl Drop for LibusbStream {
    fn drop(&mut self) {
        let workers: Vec<_> = self
            .slots
            .iter_mut()
            .filter_map(|s| s.worker.take())
            .collect();
        // closing the channels makes the workers exit
        self.slots.clear();
        for worker in workers {
            let _ = worker.join();
        }
        trace!(endpoint = self.endpoint, "libusb stream released");
    }
}

/// Map rusb::Error to a driver error
pub(crate) fn map_rusb_error(err: rusb::Error) -> Error {
    match err {
        rusb::Error::Timeout => Error::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => Error::NoDevice,
        rusb::Error::NoMem => Error::Memory(err.to_string()),
        rusb::Error::Io
        | rusb::Error::Pipe
        | rusb::Error::Busy
        | rusb::Error::Overflow
        | rusb::Error::Access
        | rusb::Error::InvalidParam => Error::Io(err.to_string()),
        other => Error::Unexpected(other.to_string()),
    }
}
