use async_trait::async_trait;
use shimblk_core::{BlockTarget, TargetError, TargetErrorKind, TargetResult, SECTOR_SHIFT};
use std::{
    io::{self, Seek, SeekFrom},
    os::unix::fs::FileExt,
    path::Path,
    sync::Arc,
};
use tokio::{fs::OpenOptions, task};
use tracing::debug;

/// Underlying-device binding backed by a raw block device node (e.g.
/// `/dev/nvme0n1p3`) or a regular file.
///
/// The node is opened read+write with `O_EXCL`, so a device already claimed
/// elsewhere fails the bind with `Busy` instead of racing its owner. The
/// handle is released when the target is dropped, which the device core does
/// only after its drain has finished.
#[derive(Debug)]
pub struct RawDeviceTarget {
    file: Arc<std::fs::File>,
    total_sectors: u64,
}

impl RawDeviceTarget {
    /// Open the named device exclusively for read+write and discover its
    /// capacity.
    pub async fn open(path: impl AsRef<Path>) -> TargetResult<Self> {
        let path = path.as_ref();
        let path_display = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_EXCL)
            .open(path)
            .await
            .map_err(|err| open_error(&path_display, err))?;

        let mut len = file
            .metadata()
            .await
            .map_err(|err| open_error(&path_display, err))?
            .len();
        let file = file.into_std().await;

        // Block device nodes report a zero metadata length; seek to the end
        // to learn the real size.
        if len == 0 {
            let mut probe = file.try_clone().map_err(io_error)?;
            len = task::spawn_blocking(move || probe.seek(SeekFrom::End(0)))
                .await
                .map_err(join_error)?
                .map_err(io_error)?;
        }

        let total_sectors = len >> SECTOR_SHIFT;
        debug!(path = %path_display, len, total_sectors, "opened underlying device");
        Ok(Self {
            file: Arc::new(file),
            total_sectors,
        })
    }

    fn offset(&self, sector: u64) -> TargetResult<u64> {
        sector.checked_mul(1 << SECTOR_SHIFT).ok_or_else(|| {
            TargetError::with_message(TargetErrorKind::Other, "sector offset overflow")
        })
    }
}

#[async_trait]
impl BlockTarget for RawDeviceTarget {
    async fn total_sectors(&self) -> TargetResult<u64> {
        Ok(self.total_sectors)
    }

    async fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> TargetResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = self.offset(sector)?;
        let file = Arc::clone(&self.file);
        let len = buf.len();
        let tmp = task::spawn_blocking(move || {
            let mut tmp = vec![0u8; len];
            let mut read = 0;
            while read < len {
                let n = file.read_at(&mut tmp[read..], offset + read as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "short read from underlying device",
                    ));
                }
                read += n;
            }
            Ok::<_, io::Error>(tmp)
        })
        .await
        .map_err(join_error)?
        .map_err(io_error)?;
        buf.copy_from_slice(&tmp);
        Ok(len)
    }

    async fn write_sectors(&self, sector: u64, buf: &[u8]) -> TargetResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = self.offset(sector)?;
        let file = Arc::clone(&self.file);
        let data = buf.to_vec();
        let len = data.len();
        task::spawn_blocking(move || {
            let mut written = 0;
            while written < len {
                let n = file.write_at(&data[written..], offset + written as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "short write to underlying device",
                    ));
                }
                written += n;
            }
            Ok(())
        })
        .await
        .map_err(join_error)?
        .map_err(io_error)?;
        Ok(len)
    }

    async fn flush(&self) -> TargetResult<()> {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(join_error)?
            .map_err(io_error)
    }
}

fn open_error(path: &str, err: io::Error) -> TargetError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => TargetErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => TargetErrorKind::PermissionDenied,
        io::ErrorKind::ResourceBusy => TargetErrorKind::Busy,
        _ => TargetErrorKind::Io,
    };
    TargetError::with_message(kind, format!("open {path}: {err}"))
}

fn io_error(err: io::Error) -> TargetError {
    TargetError::with_message(TargetErrorKind::Io, err.to_string())
}

fn join_error(err: task::JoinError) -> TargetError {
    TargetError::with_message(TargetErrorKind::Other, err.to_string())
}
