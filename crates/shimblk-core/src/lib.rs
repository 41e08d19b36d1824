pub mod device;
pub mod error;
pub mod geometry;
pub mod request;
pub mod store;
pub mod target;

/// log2 of the sector size.
pub const SECTOR_SHIFT: u32 = 9;
/// Logical sector size in bytes.
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT;

pub use device::{DeviceState, VirtualDevice};
pub use error::{DeviceError, DeviceErrorKind, DeviceResult};
pub use geometry::DiskGeometry;
pub use request::{CompletionSignal, CompletionWaiter, Direction, IoOutcome, IoRequest, IoSegment};
pub use store::BackingStore;
pub use target::{BlockTarget, TargetError, TargetErrorKind, TargetResult};
