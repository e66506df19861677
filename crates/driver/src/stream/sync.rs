//! Synchronous stream façade
//!
//! Presents blocking "receive/transmit exactly K samples" semantics on top
//! of the asynchronous engine's fixed-size buffer pool. A dedicated worker
//! thread runs the engine; the caller's thread exchanges buffers with it
//! through two rings (ready, free) guarded by one mutex and a condition
//! variable per direction. Buffer payloads are only touched by whichever
//! side currently holds the buffer id, so ownership handoff is exclusive.
//!
//! RX: the engine's callback pushes each filled buffer onto the ready ring
//! and blocks for a free one when the pool is exhausted (the reader is
//! falling behind). The reader drains ready buffers, spanning buffer
//! boundaries transparently, and recycles them onto the free ring.
//!
//! TX: the writer stages samples into free buffers and flushes them onto
//! the ready ring when full, or immediately at a burst end (zero-padded).
//! The engine's callback recycles drained buffers and blocks for the next
//! flushed one.

use super::{BufferId, Module, StreamAction, StreamConfig, StreamHandle, TransferEvent};
use crate::backend::UsbHandle;
use crate::device::{ModuleClaim, ModuleSlots};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wire::{FLAG_TX_BURST_END, FLAG_TX_BURST_START, Metadata, SampleFormat};

struct SyncShared {
    state: Mutex<SyncQueues>,
    /// Signaled when a buffer lands on the ready ring
    ready: Condvar,
    /// Signaled when a buffer lands on the free ring
    space: Condvar,
}

struct SyncQueues {
    ready: VecDeque<ReadyBuffer>,
    free: VecDeque<BufferId>,
    shutdown: bool,
    worker_done: bool,
}

#[derive(Debug, Clone, Copy)]
struct ReadyBuffer {
    id: BufferId,
    samples: usize,
}

/// Read position inside a partially consumed RX buffer
struct RxCursor {
    id: BufferId,
    samples: usize,
    offset: usize,
    timestamp: u64,
}

/// Write position inside the TX buffer currently being filled
struct TxStaging {
    id: BufferId,
    offset: usize,
    /// Timestamp of this buffer's first sample (metadata mode)
    base_timestamp: u64,
    /// Whether this is the first buffer of the open burst
    first: bool,
}

/// An open TX burst
struct BurstState {
    timestamp: u64,
    /// Samples accepted since the burst opened
    sent: u64,
}

/// One direction's blocking stream state; owned by the device
pub struct SyncStream {
    module: Module,
    config: StreamConfig,
    shared: Arc<SyncShared>,
    handle: Option<StreamHandle>,
    worker: Option<JoinHandle<Result<()>>>,
    rx_cursor: Option<RxCursor>,
    tx_staging: Option<TxStaging>,
    burst: Option<BurstState>,
    last_timestamp: u64,
    /// The stream terminated and its error was surfaced; calls fail with
    /// `InvalidState` until reconfigured
    faulted: bool,
}

impl SyncStream {
    pub(crate) fn new(module: Module, config: StreamConfig) -> Self {
        Self {
            module,
            config,
            shared: Arc::new(SyncShared {
                state: Mutex::new(SyncQueues {
                    ready: VecDeque::new(),
                    free: VecDeque::new(),
                    shutdown: false,
                    worker_done: false,
                }),
                ready: Condvar::new(),
                space: Condvar::new(),
            }),
            handle: None,
            worker: None,
            rx_cursor: None,
            tx_staging: None,
            burst: None,
            last_timestamp: 0,
            faulted: false,
        }
    }

    /// Start the engine worker if it is not already running.
    fn ensure_running(&mut self, dev: &dyn UsbHandle, modules: &ModuleSlots) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.faulted {
            return Err(Error::InvalidState(
                "stream terminated; sync_config required to restart",
            ));
        }

        let claim = ModuleClaim::acquire(modules, self.module)?;
        let endpoint = dev.init_stream(self.module, self.config.num_transfers)?;
        let mut stream =
            super::Stream::new(self.module, self.config.clone(), endpoint, claim)?;
        self.handle = Some(stream.handle());

        {
            let mut q = self.shared.state.lock().unwrap();
            q.ready.clear();
            q.free.clear();
            q.shutdown = false;
            q.worker_done = false;
            // RX primes the first num_transfers buffers inside the engine;
            // TX primes through the callback, so every buffer starts free.
            let first_free = match self.module {
                Module::Rx => self.config.num_transfers,
                Module::Tx => 0,
            };
            for i in first_free..self.config.num_buffers {
                q.free.push_back(BufferId(i));
            }
        }

        let shared = self.shared.clone();
        let module = self.module;
        let worker = thread::Builder::new()
            .name(format!("rfstream-{}", module).to_lowercase())
            .spawn(move || {
                let result = match module {
                    Module::Rx => stream.run(rx_callback(shared.clone())),
                    Module::Tx => stream.run(tx_callback(shared.clone())),
                };
                if let Err(ref e) = result {
                    warn!(%module, "stream worker exited: {}", e);
                }
                let mut q = shared.state.lock().unwrap();
                q.worker_done = true;
                shared.ready.notify_all();
                shared.space.notify_all();
                drop(q);
                result
            })
            .map_err(|e| Error::Io(format!("failed to spawn stream worker: {}", e)))?;

        debug!(%module, "sync stream worker started");
        self.worker = Some(worker);
        Ok(())
    }

    /// Blocking receive into `samples` (interleaved I/Q), bounded by `timeout`.
    pub(crate) fn recv(
        &mut self,
        dev: &dyn UsbHandle,
        modules: &ModuleSlots,
        samples: &mut [i16],
        mut meta: Option<&mut Metadata>,
        timeout: Duration,
    ) -> Result<()> {
        if samples.len() % 2 != 0 {
            return Err(Error::InvalidParam("sample slice must hold whole I/Q pairs"));
        }
        let meta_mode = self.config.format == SampleFormat::Sc16Q11Meta;
        if meta.is_some() && !meta_mode {
            return Err(Error::InvalidParam("metadata requires the sc16q11meta format"));
        }
        self.ensure_running(dev, modules)?;
        let handle = match self.handle.clone() {
            Some(h) => h,
            None => return Err(Error::InvalidState("stream not running")),
        };

        let deadline = Instant::now() + timeout;
        let total = samples.len() / 2;
        let mut copied = 0usize;
        let mut meta_filled = false;

        while copied < total {
            if self.rx_cursor.is_none() {
                let rb = match wait_ready(&self.shared, deadline)? {
                    Some(rb) => rb,
                    None => return Err(self.take_worker_fault()),
                };
                // a short completion may carry no payload at all
                if rb.samples == 0 {
                    self.recycle(rb.id);
                    continue;
                }
                let mut timestamp = 0;
                if meta_mode {
                    let header = handle.with_buffer(rb.id, |b| Metadata::decode(b))??;
                    timestamp = header.timestamp;
                    if let Some(out) = meta.as_deref_mut() {
                        if !meta_filled {
                            out.flags = header.flags;
                        }
                        out.status |= header.status;
                    }
                }
                self.rx_cursor = Some(RxCursor {
                    id: rb.id,
                    samples: rb.samples,
                    offset: 0,
                    timestamp,
                });
            }

            let Some(cur) = self.rx_cursor.as_mut() else {
                continue;
            };
            if meta_mode && !meta_filled {
                if let Some(out) = meta.as_deref_mut() {
                    out.timestamp = cur.timestamp + cur.offset as u64;
                }
                meta_filled = true;
            }

            let n = (total - copied).min(cur.samples - cur.offset);
            let byte_start = self.config.format.header_len()
                + cur.offset * self.config.format.bytes_per_sample();
            let byte_end = byte_start + n * self.config.format.bytes_per_sample();
            handle.with_buffer(cur.id, |b| {
                wire::unpack_sc16q11(&b[byte_start..byte_end], &mut samples[copied * 2..(copied + n) * 2])
            })??;
            copied += n;
            cur.offset += n;

            let id = cur.id;
            if cur.offset == cur.samples {
                self.rx_cursor = None;
                self.recycle(id);
            }
        }

        Ok(())
    }

    /// Blocking transmit of `samples` (interleaved I/Q), bounded by `timeout`.
    pub(crate) fn send(
        &mut self,
        dev: &dyn UsbHandle,
        modules: &ModuleSlots,
        samples: &[i16],
        meta: Option<&mut Metadata>,
        timeout: Duration,
    ) -> Result<()> {
        if samples.len() % 2 != 0 {
            return Err(Error::InvalidParam("sample slice must hold whole I/Q pairs"));
        }
        let meta_mode = self.config.format == SampleFormat::Sc16Q11Meta;
        let meta = meta.map(|m| *m);

        if meta_mode {
            let m = meta.ok_or(Error::InvalidParam(
                "metadata required when transmitting in sc16q11meta format",
            ))?;
            if m.has_flag(FLAG_TX_BURST_START) {
                if self.burst.is_some() {
                    return Err(Error::InvalidState(
                        "TX burst already open; close it with FLAG_TX_BURST_END first",
                    ));
                }
                if m.timestamp < self.last_timestamp {
                    return Err(Error::InvalidState("burst timestamp must not move backwards"));
                }
            } else if self.burst.is_none() {
                return Err(Error::InvalidState(
                    "TX data outside a burst; set FLAG_TX_BURST_START first",
                ));
            }
        } else if meta.is_some() {
            return Err(Error::InvalidParam("metadata requires the sc16q11meta format"));
        }

        self.ensure_running(dev, modules)?;
        let handle = match self.handle.clone() {
            Some(h) => h,
            None => return Err(Error::InvalidState("stream not running")),
        };

        if meta_mode {
            if let Some(m) = meta {
                if m.has_flag(FLAG_TX_BURST_START) {
                    self.burst = Some(BurstState {
                        timestamp: m.timestamp,
                        sent: 0,
                    });
                }
            }
        }

        let closing = meta_mode && meta.is_some_and(|m| m.has_flag(FLAG_TX_BURST_END));
        let deadline = Instant::now() + timeout;
        let total = samples.len() / 2;
        let mut written = 0usize;

        while written < total {
            if self.tx_staging.is_none() {
                let id = match wait_free(&self.shared, deadline)? {
                    Some(id) => id,
                    None => return Err(self.take_worker_fault()),
                };
                let (base_timestamp, first) = match self.burst.as_ref() {
                    Some(b) => (b.timestamp + b.sent, b.sent == 0),
                    None => (0, false),
                };
                self.tx_staging = Some(TxStaging {
                    id,
                    offset: 0,
                    base_timestamp,
                    first,
                });
            }

            let Some(staging) = self.tx_staging.as_mut() else {
                continue;
            };
            let n = (total - written).min(self.config.samples_per_buffer - staging.offset);
            let byte_start = self.config.format.header_len()
                + staging.offset * self.config.format.bytes_per_sample();
            let byte_end = byte_start + n * self.config.format.bytes_per_sample();
            handle.with_buffer_mut(staging.id, |b| {
                wire::pack_sc16q11(&samples[written * 2..(written + n) * 2], &mut b[byte_start..byte_end])
            })??;
            written += n;
            staging.offset += n;
            if let Some(b) = self.burst.as_mut() {
                b.sent += n as u64;
            }

            if staging.offset == self.config.samples_per_buffer {
                // a closing burst keeps its final buffer staged so it can
                // carry the burst-end flag
                if !(closing && written == total) {
                    self.flush_staging(&handle, false)?;
                }
            }
        }

        if closing {
            // pad the remainder with zeros and push the final buffer out
            if let Some(staging) = self.tx_staging.as_ref() {
                let byte_start = self.config.format.header_len()
                    + staging.offset * self.config.format.bytes_per_sample();
                handle.with_buffer_mut(staging.id, |b| b[byte_start..].fill(0))?;
            }
            self.flush_staging(&handle, true)?;
            if let Some(b) = self.burst.take() {
                self.last_timestamp = b.timestamp + b.sent;
            }
        }

        Ok(())
    }

    /// Push the staged buffer onto the ready ring, writing its metadata
    /// header first. No-op if nothing is staged.
    fn flush_staging(&mut self, handle: &StreamHandle, closing: bool) -> Result<()> {
        let Some(staging) = self.tx_staging.take() else {
            return Ok(());
        };
        if self.config.format == SampleFormat::Sc16Q11Meta {
            let mut flags = 0;
            if staging.first {
                flags |= FLAG_TX_BURST_START;
            }
            if closing {
                flags |= FLAG_TX_BURST_END;
            }
            let header = Metadata::new(staging.base_timestamp, flags);
            handle.with_buffer_mut(staging.id, |b| header.encode(b))??;
        }
        let mut q = self.shared.state.lock().unwrap();
        q.ready.push_back(ReadyBuffer {
            id: staging.id,
            samples: self.config.samples_per_buffer,
        });
        self.shared.ready.notify_one();
        Ok(())
    }

    fn recycle(&self, id: BufferId) {
        let mut q = self.shared.state.lock().unwrap();
        q.free.push_back(id);
        self.shared.space.notify_one();
        drop(q);
    }

    /// Map a finished worker to the caller-visible error: the recorded
    /// stream error the first time, `InvalidState` afterwards.
    fn take_worker_fault(&mut self) -> Error {
        if self.faulted {
            return Error::InvalidState("stream terminated; sync_config required to restart");
        }
        self.faulted = true;
        match self.handle.as_ref().and_then(|h| h.error_kind()) {
            Some(kind) => Error::from(kind),
            None => Error::InvalidState("stream shut down"),
        }
    }

    /// Request shutdown and join the worker. Keeps the configuration, so a
    /// later call restarts the stream (unless the worker exited with an
    /// error, which still requires reconfiguration).
    pub(crate) fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        {
            let mut q = self.shared.state.lock().unwrap();
            q.shutdown = true;
            self.shared.ready.notify_all();
            self.shared.space.notify_all();
        }
        debug!(module = %self.module, "stopping sync stream worker");

        let result = match worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Unexpected("stream worker panicked".to_string())),
        };

        self.handle = None;
        self.rx_cursor = None;
        self.tx_staging = None;
        self.burst = None;
        match &result {
            // a clean stop leaves the configuration usable for a restart
            Ok(()) => self.faulted = false,
            Err(e) => {
                self.faulted = true;
                debug!(module = %self.module, "worker exit: {}", e);
            }
        }
        result
    }
}

impl Drop for SyncStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!(module = %self.module, "sync stream dropped after error: {}", e);
        }
    }
}

/// Wait for a ready buffer until `deadline`. `Ok(None)` means the worker
/// has exited and no more data is coming.
fn wait_ready(shared: &SyncShared, deadline: Instant) -> Result<Option<ReadyBuffer>> {
    let mut q = shared.state.lock().unwrap();
    loop {
        if let Some(rb) = q.ready.pop_front() {
            return Ok(Some(rb));
        }
        if q.worker_done {
            return Ok(None);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }
        let (guard, _) = shared.ready.wait_timeout(q, deadline - now).unwrap();
        q = guard;
    }
}

/// Wait for a free buffer until `deadline`. `Ok(None)` means the worker
/// has exited and nothing will be recycled.
fn wait_free(shared: &SyncShared, deadline: Instant) -> Result<Option<BufferId>> {
    let mut q = shared.state.lock().unwrap();
    loop {
        if let Some(id) = q.free.pop_front() {
            return Ok(Some(id));
        }
        if q.worker_done {
            return Ok(None);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout);
        }
        let (guard, _) = shared.space.wait_timeout(q, deadline - now).unwrap();
        q = guard;
    }
}

/// Engine callback for RX: publish the filled buffer, then block for a
/// free one (the reader is behind if none is available).
fn rx_callback(shared: Arc<SyncShared>) -> impl FnMut(TransferEvent) -> StreamAction {
    move |event| {
        let mut q = shared.state.lock().unwrap();
        if let Some(id) = event.buffer {
            q.ready.push_back(ReadyBuffer {
                id,
                samples: event.samples,
            });
            shared.ready.notify_one();
        }
        loop {
            if q.shutdown {
                return StreamAction::Shutdown;
            }
            if let Some(id) = q.free.pop_front() {
                return StreamAction::Continue(id);
            }
            q = shared.space.wait(q).unwrap();
        }
    }
}

/// Engine callback for TX: recycle the drained buffer, then block for the
/// next buffer the writer has flushed.
fn tx_callback(shared: Arc<SyncShared>) -> impl FnMut(TransferEvent) -> StreamAction {
    move |event| {
        let mut q = shared.state.lock().unwrap();
        if let Some(id) = event.buffer {
            q.free.push_back(id);
            shared.space.notify_one();
        }
        loop {
            if q.shutdown {
                return StreamAction::Shutdown;
            }
            if let Some(rb) = q.ready.pop_front() {
                return StreamAction::Continue(rb.id);
            }
            q = shared.ready.wait(q).unwrap();
        }
    }
}
