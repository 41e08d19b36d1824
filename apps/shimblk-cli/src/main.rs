use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use shimblk_core::{IoRequest, VirtualDevice, SECTOR_SIZE};
use shimblk_targets::RawDeviceTarget;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "shimblk-cli")]
#[command(about = "Bind a virtual block device and run a smoke round trip", long_about = None)]
#[command(group = ArgGroup::new("backing").args(["device", "ram"]).required(true))]
struct Args {
    /// Raw block device (or file) to bind and pass I/O through to
    #[arg(long, value_name = "PATH")]
    device: Option<PathBuf>,
    /// Run in local-emulation mode with this many sectors of RAM backing
    #[arg(long, value_name = "SECTORS")]
    ram: Option<u64>,
    /// Sector to target with the round trip
    #[arg(long, default_value_t = 0)]
    sector: u64,
    /// Round-trip transfer length in sectors
    #[arg(long, default_value_t = 8)]
    sectors: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let device = Arc::new(VirtualDevice::new());
    let capacity = match (&args.device, args.ram) {
        (Some(path), _) => {
            let target = RawDeviceTarget::open(path)
                .await
                .with_context(|| format!("open {}", path.display()))?;
            device
                .bind(Box::new(target))
                .await
                .with_context(|| format!("bind {}", path.display()))?
        }
        (None, Some(sectors)) => device.bind_ram(sectors).await.context("bind ram backing")?,
        (None, None) => unreachable!("clap enforces the backing group"),
    };
    let geometry = device.geometry().expect("bound device has geometry");
    info!(capacity, ?geometry, "device active");

    let payload: Vec<u8> = (0..args.sectors as usize * SECTOR_SIZE)
        .map(|i| i as u8)
        .collect();
    let (write, done) = IoRequest::write(args.sector, payload.clone());
    device.handle(write);
    let written = done
        .await
        .context("write completion dropped")?
        .context("write request")?;
    info!(sectors = written.sectors_transferred, "write complete");

    let (read, done) = IoRequest::read(args.sector, args.sectors);
    device.handle(read);
    let outcome = done
        .await
        .context("read completion dropped")?
        .context("read request")?;
    info!(sectors = outcome.sectors_transferred, "read complete");

    let moved = written.sectors_transferred.min(outcome.sectors_transferred) as usize * SECTOR_SIZE;
    anyhow::ensure!(
        outcome.segments[0].buf[..moved] == payload[..moved],
        "round trip mismatch"
    );
    info!("round trip verified");

    device.teardown().await;
    info!("device released");
    Ok(())
}
