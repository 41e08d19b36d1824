use crate::error::{DeviceError, DeviceErrorKind, DeviceResult};
use crate::request::{Direction, IoSegment};
use crate::{SECTOR_SHIFT, SECTOR_SIZE};
use std::sync::Mutex;
use tracing::trace;

/// In-memory byte region emulating device storage, addressed by sector.
///
/// Transfers are clipped against the capacity instead of rejected: callers
/// that do not pre-validate ranges get a short transfer, never an overrun.
/// The data lock is held only for the duration of each byte copy.
pub struct BackingStore {
    capacity_sectors: u64,
    data: Mutex<Vec<u8>>,
}

impl BackingStore {
    /// Allocate a zeroed store of `capacity_sectors` sectors.
    ///
    /// Allocation failure is reported rather than aborting the process, so
    /// a failed bind can unwind cleanly.
    pub fn allocate(capacity_sectors: u64) -> DeviceResult<Self> {
        let bytes = capacity_sectors
            .checked_mul(SECTOR_SIZE as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                DeviceError::with_message(DeviceErrorKind::OutOfMemory, "capacity overflows usize")
            })?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).map_err(|_| {
            DeviceError::with_message(
                DeviceErrorKind::OutOfMemory,
                format!("unable to allocate {bytes} byte backing store"),
            )
        })?;
        data.resize(bytes, 0);
        Ok(Self {
            capacity_sectors,
            data: Mutex::new(data),
        })
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// Copy one segment to or from the store, returning the sectors moved.
    ///
    /// A transfer reaching past the last sector is truncated to fit; one
    /// starting at or beyond the capacity moves nothing and returns 0.
    pub fn transfer(&self, segment: &mut IoSegment, pos: u64, direction: Direction) -> u64 {
        let mut len = segment.sectors();
        if pos >= self.capacity_sectors {
            return 0;
        }
        if pos + len > self.capacity_sectors {
            len = self.capacity_sectors - pos;
        }

        let offset = (pos as usize) << SECTOR_SHIFT;
        let nbytes = (len as usize) << SECTOR_SHIFT;

        {
            let mut data = self.data.lock().expect("backing store lock poisoned");
            match direction {
                Direction::Write => {
                    data[offset..offset + nbytes].copy_from_slice(&segment.buf[..nbytes]);
                }
                Direction::Read => {
                    segment.buf[..nbytes].copy_from_slice(&data[offset..offset + nbytes]);
                }
            }
        }

        trace!(pos, len, ?direction, "store transfer");
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(sectors: usize) -> IoSegment {
        IoSegment::new(vec![0u8; sectors * SECTOR_SIZE])
    }

    #[test]
    fn transfer_within_capacity_moves_everything() {
        let store = BackingStore::allocate(100).unwrap();
        let mut seg = segment(20);
        assert_eq!(store.transfer(&mut seg, 0, Direction::Write), 20);
    }

    #[test]
    fn transfer_clips_at_end_of_device() {
        let store = BackingStore::allocate(100).unwrap();
        let mut seg = segment(20);
        assert_eq!(store.transfer(&mut seg, 90, Direction::Write), 10);
    }

    #[test]
    fn transfer_past_capacity_moves_nothing() {
        let store = BackingStore::allocate(100).unwrap();
        let mut seg = segment(10);
        assert_eq!(store.transfer(&mut seg, 100, Direction::Read), 0);
        assert_eq!(store.transfer(&mut seg, 600, Direction::Read), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = BackingStore::allocate(8).unwrap();
        let mut out = IoSegment::new(vec![0xa5u8; 2 * SECTOR_SIZE]);
        assert_eq!(store.transfer(&mut out, 3, Direction::Write), 2);

        let mut back = segment(2);
        assert_eq!(store.transfer(&mut back, 3, Direction::Read), 2);
        assert_eq!(back.buf, out.buf);
    }

    #[test]
    fn clipped_write_leaves_tail_untouched() {
        let store = BackingStore::allocate(4).unwrap();
        let mut out = IoSegment::new(vec![0xffu8; 4 * SECTOR_SIZE]);
        assert_eq!(store.transfer(&mut out, 2, Direction::Write), 2);

        // Sectors [0, 2) were never written and stay zeroed.
        let mut head = segment(2);
        store.transfer(&mut head, 0, Direction::Read);
        assert!(head.buf.iter().all(|&b| b == 0));
    }
}
