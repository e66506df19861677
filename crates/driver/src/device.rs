//! Device handle and per-module stream bookkeeping
//!
//! A [`Device`] wraps one open USB handle and enforces the invariant that
//! at most one stream is active per module (RX, TX) at a time. It exposes
//! the asynchronous engine through [`Device::init_stream`] and the blocking
//! interface through [`Device::sync_config`] / [`Device::sync_rx`] /
//! [`Device::sync_tx`].

use crate::backend::{BackendRegistry, ControlSetup, DeviceInfo, DeviceSpeed, UsbHandle};
use crate::error::{Error, Result};
use crate::stream::{Module, Stream, StreamConfig, SyncStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use wire::Metadata;

/// Which modules currently have an active stream
pub(crate) type ModuleSlots = Arc<Mutex<[bool; 2]>>;

/// Exclusive claim on a module's streaming path; released on drop
pub(crate) struct ModuleClaim {
    slots: ModuleSlots,
    module: Module,
}

impl ModuleClaim {
    pub(crate) fn acquire(slots: &ModuleSlots, module: Module) -> Result<Self> {
        let mut held = slots.lock().unwrap();
        if held[module.index()] {
            return Err(Error::InvalidState("a stream is already active for this module"));
        }
        held[module.index()] = true;
        Ok(Self {
            slots: slots.clone(),
            module,
        })
    }
}

impl Drop for ModuleClaim {
    fn drop(&mut self) {
        self.slots.lock().unwrap()[self.module.index()] = false;
    }
}

/// An open radio
pub struct Device {
    // declared before the handle so stream workers stop before it closes
    sync: [Option<SyncStream>; 2],
    handle: Box<dyn UsbHandle>,
    info: DeviceInfo,
    modules: ModuleSlots,
}

impl Device {
    /// Open a probed device through the backend that discovered it
    pub fn open(registry: &BackendRegistry, info: &DeviceInfo) -> Result<Self> {
        let handle = registry.open(info)?;
        info!(
            backend = %info.backend,
            bus = info.bus_number,
            address = info.address,
            serial = info.serial.as_deref().unwrap_or("?"),
            "device opened"
        );
        Ok(Self {
            sync: [None, None],
            handle,
            info: info.clone(),
            modules: Arc::new(Mutex::new([false; 2])),
        })
    }

    /// Open the first device any registered backend can see
    pub fn open_first(registry: &BackendRegistry) -> Result<Self> {
        let devices = registry.probe_all();
        let info = devices.first().ok_or(Error::NoDevice)?;
        Self::open(registry, info)
    }

    /// Identity of the opened device
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Negotiated USB speed
    pub fn speed(&self) -> Result<DeviceSpeed> {
        self.handle.speed()
    }

    /// Fetch a string descriptor by index
    pub fn string_descriptor(&self, index: u8) -> Result<String> {
        self.handle.string_descriptor(index)
    }

    /// Raw control transfer passthrough
    pub fn control_transfer(
        &self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.handle.control_transfer(setup, data, timeout)
    }

    /// Raw bulk transfer passthrough
    pub fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle.bulk_transfer(endpoint, data, timeout)
    }

    /// Set up an asynchronous stream for `module`.
    ///
    /// Allocates the buffer pool and the backend's per-transfer resources.
    /// Fails with [`Error::InvalidState`] if the module already has an
    /// active stream, and releases everything allocated so far if any step
    /// fails. Drive the returned stream with [`Stream::run`].
    pub fn init_stream(&self, module: Module, config: StreamConfig) -> Result<Stream> {
        config.validate()?;
        let claim = ModuleClaim::acquire(&self.modules, module)?;
        let endpoint = self.handle.init_stream(module, config.num_transfers)?;
        let stream = Stream::new(module, config, endpoint, claim)?;
        debug!(%module, "stream initialized");
        Ok(stream)
    }

    /// Configure the synchronous interface for `module`.
    ///
    /// Must be called before the first [`sync_rx`](Self::sync_rx) /
    /// [`sync_tx`](Self::sync_tx); fails with [`Error::InvalidState`] while
    /// a stream is active for the module. Reconfiguring an idle module
    /// replaces its previous configuration.
    pub fn sync_config(&mut self, module: Module, config: StreamConfig) -> Result<()> {
        config.validate()?;
        if self.modules.lock().unwrap()[module.index()] {
            return Err(Error::InvalidState("a stream is already active for this module"));
        }
        debug!(%module, buffers = config.num_buffers, transfers = config.num_transfers,
               "sync interface configured");
        self.sync[module.index()] = Some(SyncStream::new(module, config));
        Ok(())
    }

    /// Blocking receive of exactly `samples.len() / 2` complex samples.
    ///
    /// Starts the underlying RX stream on first use. Blocks until the
    /// samples have been copied out or `timeout` elapses
    /// ([`Error::Timeout`]); a timeout leaves the stream usable. If
    /// metadata is supplied, it receives the timestamp of the first
    /// returned sample.
    pub fn sync_rx(
        &mut self,
        samples: &mut [i16],
        meta: Option<&mut Metadata>,
        timeout: Duration,
    ) -> Result<()> {
        let modules = self.modules.clone();
        let facade = self.sync[Module::Rx.index()]
            .as_mut()
            .ok_or(Error::InvalidState("sync_config required before sync_rx"))?;
        facade.recv(self.handle.as_ref(), &modules, samples, meta, timeout)
    }

    /// Blocking transmit of exactly `samples.len() / 2` complex samples.
    ///
    /// Starts the underlying TX stream on first use. In `Sc16Q11Meta`
    /// format, bursts must be bracketed with `FLAG_TX_BURST_START` /
    /// `FLAG_TX_BURST_END` in the supplied metadata; a partially filled
    /// buffer is only flushed at a burst boundary.
    pub fn sync_tx(
        &mut self,
        samples: &[i16],
        meta: Option<&mut Metadata>,
        timeout: Duration,
    ) -> Result<()> {
        let modules = self.modules.clone();
        let facade = self.sync[Module::Tx.index()]
            .as_mut()
            .ok_or(Error::InvalidState("sync_config required before sync_tx"))?;
        facade.send(self.handle.as_ref(), &modules, samples, meta, timeout)
    }

    /// Stop the synchronous stream for `module`, if running.
    ///
    /// Returns the stream's exit result; the module's configuration is
    /// kept, so the next `sync_rx`/`sync_tx` restarts it.
    pub fn sync_stop(&mut self, module: Module) -> Result<()> {
        match self.sync[module.index()].as_mut() {
            Some(facade) => facade.stop(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_claim_exclusive() {
        let slots: ModuleSlots = Arc::new(Mutex::new([false; 2]));

        let rx = ModuleClaim::acquire(&slots, Module::Rx).unwrap();
        assert!(ModuleClaim::acquire(&slots, Module::Rx).is_err());

        // the other module is independent
        let _tx = ModuleClaim::acquire(&slots, Module::Tx).unwrap();

        drop(rx);
        assert!(ModuleClaim::acquire(&slots, Module::Rx).is_ok());
    }
}
