//! Block device data-rate instrument.

use crate::{consts::DATA_RATE_SAMPLE_WINDOW, sysfs, telemetry::TelemetrySender};
use futures::future;
use std::path::PathBuf;
use tokio::time;

const SECTOR_SIZE: u64 = 512;

/// Sectors read and written per sample window, from `/sys/block/<dev>/stat`.
#[derive(Debug)]
pub struct DiskDataRate {
    devices: Vec<String>,
    sys_block: PathBuf,
}

impl DiskDataRate {
    pub(super) fn new(devices: Vec<String>, sys_block: PathBuf) -> Self {
        Self { devices, sys_block }
    }

    /// Publishes `rd/<dev>` and `wr/<dev>`: kilobytes transferred over the
    /// one-second sample window. Devices are sampled concurrently.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        future::join_all(
            self.devices.iter().map(|device| self.measure_device(device, sink)),
        )
        .await;
    }

    async fn measure_device(&self, device: &str, sink: &TelemetrySender) {
        let then = match sysfs::read_block_stats(&self.sys_block, device).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!("disk sampling of {device} failed: {err}");
                return;
            }
        };
        time::sleep(DATA_RATE_SAMPLE_WINDOW).await;
        let now = match sysfs::read_block_stats(&self.sys_block, device).await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!("disk sampling of {device} failed: {err}");
                return;
            }
        };
        if then.len() < 7 || now.len() < 7 {
            tracing::warn!("short block stat line for {device}");
            return;
        }
        let read = now[2].saturating_sub(then[2]) * SECTOR_SIZE;
        let written = now[6].saturating_sub(then[6]) * SECTOR_SIZE;
        #[allow(clippy::cast_precision_loss)]
        {
            sink.put(format!("rd/{device}"), read as f64 / 1000.0);
            sink.put(format!("wr/{device}"), written as f64 / 1000.0);
        }
    }
}
