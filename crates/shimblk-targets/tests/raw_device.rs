use shimblk_core::{
    BlockTarget, DeviceErrorKind, IoRequest, TargetErrorKind, VirtualDevice, SECTOR_SIZE,
};
use shimblk_targets::RawDeviceTarget;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn backing_file(sectors: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; sectors * SECTOR_SIZE]).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn open_missing_path_maps_to_not_found() {
    let err = RawDeviceTarget::open("/definitely/not/a/device")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), TargetErrorKind::NotFound);
}

#[tokio::test]
async fn capacity_comes_from_file_length() {
    let file = backing_file(64);
    let target = RawDeviceTarget::open(file.path()).await.unwrap();
    assert_eq!(target.total_sectors().await.unwrap(), 64);
}

#[tokio::test]
async fn zero_length_node_falls_back_to_seek_and_fails_bind() {
    // An empty file takes the seek-to-end branch that device nodes with a
    // zero metadata length rely on.
    let file = NamedTempFile::new().unwrap();
    let target = RawDeviceTarget::open(file.path()).await.unwrap();
    assert_eq!(target.total_sectors().await.unwrap(), 0);

    let device = Arc::new(VirtualDevice::new());
    let err = device.bind(Box::new(target)).await.unwrap_err();
    assert_eq!(err.kind(), DeviceErrorKind::DeviceOpenFailed);
}

#[tokio::test]
async fn sector_io_round_trips() {
    let file = backing_file(16);
    let target = RawDeviceTarget::open(file.path()).await.unwrap();

    let payload: Vec<u8> = (0..2 * SECTOR_SIZE).map(|i| i as u8).collect();
    assert_eq!(
        target.write_sectors(5, &payload).await.unwrap(),
        payload.len()
    );

    let mut back = vec![0u8; 2 * SECTOR_SIZE];
    assert_eq!(target.read_sectors(5, &mut back).await.unwrap(), back.len());
    assert_eq!(back, payload);
    target.flush().await.unwrap();
}

#[tokio::test]
async fn device_passthrough_lands_in_the_backing_file() {
    let file = backing_file(32);
    let target = RawDeviceTarget::open(file.path()).await.unwrap();

    let device = Arc::new(VirtualDevice::new());
    let capacity = device.bind(Box::new(target)).await.unwrap();
    assert_eq!(capacity, 32);

    let payload = vec![0xc3u8; 3 * SECTOR_SIZE];
    let (write, done) = IoRequest::write(4, payload.clone());
    device.handle(write);
    assert_eq!(done.await.unwrap().unwrap().sectors_transferred, 3);

    device.teardown().await;

    let contents = std::fs::read(file.path()).unwrap();
    assert_eq!(&contents[4 * SECTOR_SIZE..7 * SECTOR_SIZE], &payload[..]);
}
