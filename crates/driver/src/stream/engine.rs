//! The asynchronous streaming engine
//!
//! Keeps a fixed ring of USB transfers in flight so samples move at wire
//! rate without gaps. Slots complete and are resubmitted in strict
//! round-robin order, which preserves sample ordering: slot `i`'s buffer
//! always covers an earlier time window than slot `i + 1`'s. The look-ahead
//! is bounded to one pool depth because `num_buffers >= num_transfers`
//! guarantees at least one buffer is never in flight.

use super::{BufferId, Module, Stream, StreamAction, StreamState, TransferEvent};
use crate::error::{Error, Result};
use tracing::{debug, trace, warn};

impl Stream {
    /// Run the streaming loop until the callback requests shutdown or an
    /// error terminates it.
    ///
    /// For RX the engine primes every transfer slot with the first
    /// `num_transfers` pool buffers. For TX the callback is invoked once
    /// per slot (with `buffer: None`) to obtain each pre-filled buffer
    /// before the first submission.
    ///
    /// After every completion the callback receives the completed buffer
    /// and its payload sample count, and answers with
    /// [`StreamAction::Continue`] (next buffer for that slot) or
    /// [`StreamAction::Shutdown`]. Shutdown is honored immediately, even
    /// mid-burst.
    ///
    /// On exit (clean or not) all still-submitted slots are drained
    /// before this returns, so no buffer is ever released while the
    /// backend still owns it. Errors are also recorded on the shared
    /// handle as an [`ErrorKind`](crate::ErrorKind).
    pub fn run<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(TransferEvent) -> StreamAction,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != StreamState::Idle {
                return Err(Error::InvalidState("stream has already run"));
            }
            inner.state = StreamState::Running;
            inner.error = None;
        }
        debug!(module = %self.module, transfers = self.config.num_transfers, "stream starting");

        let mut bound: Vec<Option<BufferId>> = vec![None; self.config.num_transfers];

        let result = match self.endpoint.reset() {
            Ok(()) => self.pump(&mut bound, &mut callback),
            Err(e) => Err(e),
        };

        self.finish(bound, result)
    }

    /// Prime the slots, then service completions round-robin.
    fn pump<F>(&mut self, bound: &mut [Option<BufferId>], callback: &mut F) -> Result<()>
    where
        F: FnMut(TransferEvent) -> StreamAction,
    {
        let num_transfers = self.config.num_transfers;

        for slot in 0..num_transfers {
            let id = match self.module {
                Module::Rx => BufferId(slot),
                Module::Tx => match callback(TransferEvent {
                    buffer: None,
                    samples: 0,
                }) {
                    StreamAction::Continue(id) => id,
                    StreamAction::Shutdown => {
                        debug!("shutdown requested while priming");
                        return Ok(());
                    }
                },
            };
            self.submit_slot(slot, id, bound)?;
        }
        trace!("all {} transfer slots primed", num_transfers);

        let mut slot = 0usize;
        loop {
            let completion = self.endpoint.wait(slot, self.config.timeout)?;
            let id = bound[slot]
                .take()
                .ok_or_else(|| Error::Unexpected("completion on an idle slot".to_string()))?;
            let samples = self.payload_samples(completion.len);
            self.inner.lock().unwrap().pool.check_in(id, completion.data);
            trace!(slot, %id, samples, "transfer complete");

            match callback(TransferEvent {
                buffer: Some(id),
                samples,
            }) {
                StreamAction::Shutdown => {
                    debug!("shutdown requested by callback");
                    return Ok(());
                }
                StreamAction::Continue(next) => self.submit_slot(slot, next, bound)?,
            }

            slot = (slot + 1) % num_transfers;
        }
    }

    /// Check a buffer out of the pool and bind it to `slot`.
    fn submit_slot(
        &mut self,
        slot: usize,
        id: BufferId,
        bound: &mut [Option<BufferId>],
    ) -> Result<()> {
        let buf = self.inner.lock().unwrap().pool.check_out(id)?;
        match self.endpoint.submit(slot, buf) {
            Ok(()) => {
                bound[slot] = Some(id);
                Ok(())
            }
            Err(rejected) => {
                self.inner.lock().unwrap().pool.check_in(id, rejected.data);
                Err(rejected.error)
            }
        }
    }

    fn payload_samples(&self, transferred: usize) -> usize {
        let header = self.config.format.header_len();
        transferred.saturating_sub(header) / self.config.format.bytes_per_sample()
    }

    /// Drain outstanding slots and finalize state. Runs on every exit path,
    /// so error exits release resources exactly the way clean shutdowns do.
    fn finish(&mut self, bound: Vec<Option<BufferId>>, result: Result<()>) -> Result<()> {
        self.inner.lock().unwrap().state = StreamState::ShuttingDown;
        debug!(module = %self.module, clean = result.is_ok(), "stream shutting down");

        self.endpoint.cancel_all();
        for (slot, id) in bound.into_iter().enumerate() {
            let Some(id) = id else { continue };
            match self.endpoint.wait(slot, self.config.timeout) {
                Ok(completion) => {
                    self.inner.lock().unwrap().pool.check_in(id, completion.data);
                }
                Err(e) => warn!(slot, %id, "failed to reap in-flight transfer: {}", e),
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = StreamState::Done;
            if let Err(ref e) = result {
                inner.error = Some(e.kind());
            }
        }
        debug!(module = %self.module, "stream done");
        result
    }
}
