use crate::error::{DeviceError, DeviceErrorKind, DeviceResult};
use crate::SECTOR_SIZE;
use tokio::sync::oneshot;

/// Transfer direction of an I/O request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// One contiguous buffer of an I/O request.
///
/// The buffer length must be a non-zero multiple of the sector size. For
/// writes it holds the payload; for reads it is filled in place and handed
/// back through the completion signal.
#[derive(Debug)]
pub struct IoSegment {
    pub buf: Vec<u8>,
}

impl IoSegment {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    /// Buffer length in sectors, assuming the buffer is sector aligned.
    pub fn sectors(&self) -> u64 {
        (self.buf.len() / SECTOR_SIZE) as u64
    }
}

/// Terminal result of a serviced request, delivered through the completion
/// signal.
#[derive(Debug)]
pub struct IoOutcome {
    /// Sectors actually moved; less than requested when the transfer was
    /// clipped at the end of the device.
    pub sectors_transferred: u64,
    /// The request's segments, returned to the caller.
    pub segments: Vec<IoSegment>,
}

/// One-shot channel delivering the terminal outcome of a request. Sending
/// consumes the signal, so a request completes exactly once.
pub type CompletionSignal = oneshot::Sender<DeviceResult<IoOutcome>>;

/// Receiving half handed to whoever submitted the request.
pub type CompletionWaiter = oneshot::Receiver<DeviceResult<IoOutcome>>;

/// A transient value describing one block I/O operation.
pub struct IoRequest {
    pub direction: Direction,
    pub start_sector: u64,
    pub segments: Vec<IoSegment>,
    pub completion: CompletionSignal,
}

impl IoRequest {
    /// Build a request together with the waiter for its completion.
    pub fn new(
        direction: Direction,
        start_sector: u64,
        segments: Vec<IoSegment>,
    ) -> (Self, CompletionWaiter) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                direction,
                start_sector,
                segments,
                completion: tx,
            },
            rx,
        )
    }

    /// Read request covering `sectors` sectors in a single segment.
    pub fn read(start_sector: u64, sectors: u64) -> (Self, CompletionWaiter) {
        let buf = vec![0u8; sectors as usize * SECTOR_SIZE];
        Self::new(Direction::Read, start_sector, vec![IoSegment::new(buf)])
    }

    /// Write request carrying `payload` in a single segment.
    pub fn write(start_sector: u64, payload: Vec<u8>) -> (Self, CompletionWaiter) {
        Self::new(Direction::Write, start_sector, vec![IoSegment::new(payload)])
    }

    /// Total length of the request in sectors.
    pub fn total_sectors(&self) -> u64 {
        self.segments.iter().map(IoSegment::sectors).sum()
    }

    /// Check segment alignment and sector arithmetic before admission.
    pub(crate) fn validate(&self) -> DeviceResult<()> {
        if self.segments.is_empty() {
            return Err(DeviceError::with_message(
                DeviceErrorKind::InvalidRequest,
                "request has no segments",
            ));
        }
        let mut total: u64 = 0;
        for segment in &self.segments {
            if segment.buf.is_empty() || segment.buf.len() % SECTOR_SIZE != 0 {
                return Err(DeviceError::with_message(
                    DeviceErrorKind::InvalidRequest,
                    "segment length must be a non-zero multiple of the sector size",
                ));
            }
            total = total.checked_add(segment.sectors()).ok_or_else(|| {
                DeviceError::with_message(DeviceErrorKind::InvalidRequest, "request size overflow")
            })?;
        }
        self.start_sector.checked_add(total).ok_or_else(|| {
            DeviceError::with_message(DeviceErrorKind::InvalidRequest, "start sector overflow")
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_misaligned_segment() {
        let (request, _rx) = IoRequest::new(
            Direction::Write,
            0,
            vec![IoSegment::new(vec![0u8; SECTOR_SIZE + 1])],
        );
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::InvalidRequest);
    }

    #[test]
    fn validate_rejects_empty_request() {
        let (request, _rx) = IoRequest::new(Direction::Read, 0, Vec::new());
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::InvalidRequest);
    }

    #[test]
    fn validate_rejects_sector_overflow() {
        let (request, _rx) = IoRequest::new(
            Direction::Read,
            u64::MAX,
            vec![IoSegment::new(vec![0u8; SECTOR_SIZE])],
        );
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::InvalidRequest);
    }

    #[test]
    fn total_sectors_sums_segments() {
        let (request, _rx) = IoRequest::new(
            Direction::Write,
            4,
            vec![
                IoSegment::new(vec![0u8; 2 * SECTOR_SIZE]),
                IoSegment::new(vec![0u8; 3 * SECTOR_SIZE]),
            ],
        );
        assert_eq!(request.total_sectors(), 5);
        assert!(request.validate().is_ok());
    }
}
