//! Streaming sessions
//!
//! A [`Stream`] is one direction's (RX or TX) active streaming session: the
//! transfer pool, the backend endpoint slots, and the lifecycle state shared
//! with whoever consumes or produces samples. [`Stream::run`] drives the
//! asynchronous engine; the blocking interface in [`sync`] wraps it.

pub mod engine;
pub mod pool;
pub mod sync;

pub use pool::{BufferId, TransferPool};
pub use sync::SyncStream;

use crate::backend::StreamEndpoint;
use crate::device::ModuleClaim;
use crate::error::{Error, ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use wire::SampleFormat;

/// Direction of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Rx,
    Tx,
}

impl Module {
    /// Stable index for per-module bookkeeping
    pub(crate) fn index(self) -> usize {
        match self {
            Module::Rx => 0,
            Module::Tx => 1,
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Module::Rx => write!(f, "RX"),
            Module::Tx => write!(f, "TX"),
        }
    }
}

/// Lifecycle of a streaming session
///
/// `Running → ShuttingDown → Done`; the engine never skips `ShuttingDown`,
/// which is where outstanding transfers are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, not yet running
    Idle,
    /// The engine loop is submitting and reaping transfers
    Running,
    /// The loop has exited; in-flight slots are being drained
    ShuttingDown,
    /// Drain complete; resources may be released
    Done,
}

/// Callback verdict: hand the engine the next buffer for the completed
/// slot, or stop the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// Submit this pool buffer on the slot that just completed
    Continue(BufferId),
    /// End the stream; outstanding transfers are drained, not abandoned
    Shutdown,
}

/// What the engine reports to the callback
///
/// For RX, `buffer` is the buffer just filled by the device and `samples`
/// the number of payload samples it carries. For TX, `buffer` is the buffer
/// just drained (reusable), except during priming where it is `None` and
/// the callback must supply a pre-filled buffer for the slot's first
/// submission.
#[derive(Debug, Clone, Copy)]
pub struct TransferEvent {
    pub buffer: Option<BufferId>,
    pub samples: usize,
}

/// Stream geometry and timing
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// On-the-wire sample layout
    pub format: SampleFormat,
    /// Buffers in the pool
    pub num_buffers: usize,
    /// Payload samples per buffer
    pub samples_per_buffer: usize,
    /// Transfers kept in flight; at most `num_buffers`
    pub num_transfers: usize,
    /// Bound on each wait for a transfer completion
    pub timeout: Duration,
}

impl StreamConfig {
    /// Check the pool/transfer invariants
    pub fn validate(&self) -> Result<()> {
        if self.num_transfers == 0 {
            return Err(Error::InvalidParam("num_transfers must be at least 1"));
        }
        if self.num_buffers < self.num_transfers {
            return Err(Error::InvalidParam("num_buffers must be >= num_transfers"));
        }
        if self.samples_per_buffer == 0 {
            return Err(Error::InvalidParam("samples_per_buffer must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidParam("stream timeout must be non-zero"));
        }
        Ok(())
    }

    /// Bytes per pool buffer, including any metadata header
    pub fn buffer_len(&self) -> usize {
        self.format.buffer_len(self.samples_per_buffer)
    }
}

pub(crate) struct StreamInner {
    pub(crate) pool: TransferPool,
    pub(crate) state: StreamState,
    pub(crate) error: Option<ErrorKind>,
}

/// Shared view of a stream: pool access, lifecycle state, recorded error.
///
/// Cloneable and thread-safe; this is how callbacks and the sync façade
/// reach buffer payloads while the engine owns the [`Stream`] itself. All
/// bookkeeping is serialized by one mutex per stream.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<Mutex<StreamInner>>,
}

impl StreamHandle {
    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Error recorded when the engine loop terminated, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.lock().error
    }

    /// Number of buffers in the pool
    pub fn num_buffers(&self) -> usize {
        self.lock().pool.num_buffers()
    }

    /// Bytes per pool buffer
    pub fn buffer_len(&self) -> usize {
        self.lock().pool.buffer_len()
    }

    /// Run `f` against `id`'s buffer contents.
    ///
    /// Fails with [`Error::InvalidState`] while the buffer is checked out
    /// (in flight at the backend).
    pub fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let inner = self.lock();
        inner.pool.get(id).map(f)
    }

    /// Run `f` against `id`'s buffer contents, mutably
    pub fn with_buffer_mut<R>(&self, id: BufferId, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut inner = self.lock();
        inner.pool.get_mut(id).map(f)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap()
    }
}

/// One direction's active streaming session
///
/// Created by [`Device::init_stream`](crate::Device::init_stream); at most
/// one exists per module per device. Dropping the stream releases the pool
/// and the backend's per-transfer resources.
pub struct Stream {
    module: Module,
    config: StreamConfig,
    inner: Arc<Mutex<StreamInner>>,
    pub(crate) endpoint: Box<dyn StreamEndpoint>,
    // held for the stream's lifetime; released on drop
    _claim: ModuleClaim,
}

impl Stream {
    pub(crate) fn new(
        module: Module,
        config: StreamConfig,
        endpoint: Box<dyn StreamEndpoint>,
        claim: ModuleClaim,
    ) -> Result<Self> {
        let pool = TransferPool::new(config.num_buffers, config.buffer_len())?;
        Ok(Self {
            module,
            config,
            inner: Arc::new(Mutex::new(StreamInner {
                pool,
                state: StreamState::Idle,
                error: None,
            })),
            endpoint,
            _claim: claim,
        })
    }

    /// Direction of this stream
    pub fn module(&self) -> Module {
        self.module
    }

    /// Geometry the stream was created with
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Shared view for callbacks and other threads
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            inner: self.inner.clone(),
        }
    }
}
