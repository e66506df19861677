//! Fixed-capacity transfer buffer pool
//!
//! All buffer storage for a stream is allocated once at init; nothing grows
//! at stream time. Buffers are addressed by [`BufferId`] (an index), and a
//! slot is either present (host-owned) or checked out: owned by the backend
//! while a transfer is in flight, or by whichever side is currently filling
//! or draining it. A buffer is never reachable from two owners at once.

use crate::error::{Error, Result};

/// Index of a buffer in a stream's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed set of reusable stream buffers
pub struct TransferPool {
    slots: Vec<Option<Vec<u8>>>,
    buffer_len: usize,
}

impl TransferPool {
    /// Allocate `num_buffers` zeroed buffers of `buffer_len` bytes each.
    ///
    /// Fails with [`Error::Memory`] if any allocation fails; buffers
    /// allocated before the failure are released with the pool.
    pub fn new(num_buffers: usize, buffer_len: usize) -> Result<Self> {
        if num_buffers == 0 || buffer_len == 0 {
            return Err(Error::InvalidParam("pool dimensions must be non-zero"));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(num_buffers)
            .map_err(|e| Error::Memory(e.to_string()))?;

        for _ in 0..num_buffers {
            let mut buf: Vec<u8> = Vec::new();
            buf.try_reserve_exact(buffer_len)
                .map_err(|e| Error::Memory(e.to_string()))?;
            buf.resize(buffer_len, 0);
            slots.push(Some(buf));
        }

        Ok(Self { slots, buffer_len })
    }

    /// Number of buffers in the pool
    pub fn num_buffers(&self) -> usize {
        self.slots.len()
    }

    /// Length in bytes of every buffer
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Whether `id`'s buffer is currently checked out
    pub fn is_checked_out(&self, id: BufferId) -> bool {
        matches!(self.slots.get(id.0), Some(None))
    }

    /// Take ownership of `id`'s buffer
    pub fn check_out(&mut self, id: BufferId) -> Result<Vec<u8>> {
        self.slots
            .get_mut(id.0)
            .ok_or(Error::InvalidParam("buffer id out of range"))?
            .take()
            .ok_or(Error::InvalidState("buffer is already checked out"))
    }

    /// Return a checked-out buffer to its slot
    pub fn check_in(&mut self, id: BufferId, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.buffer_len);
        debug_assert!(self.is_checked_out(id), "check_in on a present slot");
        if let Some(slot) = self.slots.get_mut(id.0) {
            *slot = Some(buf);
        }
    }

    /// Borrow `id`'s buffer
    pub fn get(&self, id: BufferId) -> Result<&[u8]> {
        self.slots
            .get(id.0)
            .ok_or(Error::InvalidParam("buffer id out of range"))?
            .as_deref()
            .ok_or(Error::InvalidState("buffer is checked out"))
    }

    /// Mutably borrow `id`'s buffer
    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut [u8]> {
        self.slots
            .get_mut(id.0)
            .ok_or(Error::InvalidParam("buffer id out of range"))?
            .as_deref_mut()
            .ok_or(Error::InvalidState("buffer is checked out"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocates_exactly() {
        let pool = TransferPool::new(16, 8192).unwrap();
        assert_eq!(pool.num_buffers(), 16);
        assert_eq!(pool.buffer_len(), 8192);
        for i in 0..16 {
            assert!(!pool.is_checked_out(BufferId(i)));
            assert_eq!(pool.get(BufferId(i)).unwrap().len(), 8192);
        }
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(TransferPool::new(0, 8192).is_err());
        assert!(TransferPool::new(16, 0).is_err());
    }

    #[test]
    fn test_check_out_is_exclusive() {
        let mut pool = TransferPool::new(2, 64).unwrap();
        let buf = pool.check_out(BufferId(0)).unwrap();
        assert!(pool.is_checked_out(BufferId(0)));

        assert!(matches!(
            pool.check_out(BufferId(0)),
            Err(Error::InvalidState(_))
        ));
        assert!(pool.get(BufferId(0)).is_err());
        assert!(pool.get(BufferId(1)).is_ok());

        pool.check_in(BufferId(0), buf);
        assert!(!pool.is_checked_out(BufferId(0)));
        assert!(pool.get(BufferId(0)).is_ok());
    }

    #[test]
    fn test_out_of_range_id() {
        let mut pool = TransferPool::new(2, 64).unwrap();
        assert!(matches!(
            pool.check_out(BufferId(2)),
            Err(Error::InvalidParam(_))
        ));
        assert!(pool.get(BufferId(99)).is_err());
    }

    #[test]
    fn test_buffer_contents_survive_checkout() {
        let mut pool = TransferPool::new(1, 8).unwrap();
        let mut buf = pool.check_out(BufferId(0)).unwrap();
        buf.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        pool.check_in(BufferId(0), buf);
        assert_eq!(pool.get(BufferId(0)).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
