use async_trait::async_trait;
use std::fmt;

pub type TargetResult<T> = Result<T, TargetError>;

/// Describes the failure category for underlying-device operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetErrorKind {
    NotFound,
    Busy,
    PermissionDenied,
    Io,
    Unsupported,
    Other,
}

/// Error surfaced by [`BlockTarget`] implementations.
#[derive(Clone, Debug)]
pub struct TargetError {
    kind: TargetErrorKind,
    message: Option<String>,
}

impl TargetError {
    pub const fn new(kind: TargetErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: TargetErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> TargetErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for TargetError {}

/// Abstraction over an underlying block device that the virtual device
/// forwards I/O to.
///
/// Implementations operate on 512-byte sectors; callers pass buffers whose
/// lengths are exact multiples of [`SECTOR_SIZE`](crate::SECTOR_SIZE). The
/// handle is exclusively owned for the lifetime of a binding and released by
/// drop once the device has drained.
#[async_trait]
pub trait BlockTarget: Send + Sync {
    /// Total number of sectors the target reports.
    async fn total_sectors(&self) -> TargetResult<u64>;

    /// Read one or more sectors starting at `sector` into `buf`.
    async fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> TargetResult<usize>;

    /// Write one or more sectors starting at `sector` from `buf`.
    async fn write_sectors(&self, sector: u64, buf: &[u8]) -> TargetResult<usize>;

    /// Flush outstanding writes to durable media.
    async fn flush(&self) -> TargetResult<()> {
        Ok(())
    }
}
