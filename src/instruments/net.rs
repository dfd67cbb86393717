//! Network data-rate and Wi-Fi link instruments.

use crate::{consts::DATA_RATE_SAMPLE_WINDOW, shell, sysfs, telemetry::TelemetrySender};
use futures::future;
use std::path::{Path, PathBuf};
use tokio::time;

/// Per-device rx/tx byte rates from `/sys/class/net/<dev>/statistics`.
#[derive(Debug)]
pub struct NetworkDataRate {
    devices: Vec<String>,
    sys_class_net: PathBuf,
}

impl NetworkDataRate {
    pub(super) fn new(devices: Vec<String>, sys_class_net: PathBuf) -> Self {
        Self { devices, sys_class_net }
    }

    /// Publishes `tx/<dev>` and `rx/<dev>`: kilobytes transferred over the
    /// one-second sample window. Devices are sampled concurrently.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        future::join_all(
            self.devices.iter().map(|device| self.measure_device(device, sink)),
        )
        .await;
    }

    async fn measure_device(&self, device: &str, sink: &TelemetrySender) {
        let statistics = self.sys_class_net.join(device).join("statistics");
        let (rx_then, tx_then) = match read_counters(&statistics).await {
            Ok(counters) => counters,
            Err(err) => {
                tracing::warn!("network sampling of {device} failed: {err}");
                return;
            }
        };
        time::sleep(DATA_RATE_SAMPLE_WINDOW).await;
        let (rx_now, tx_now) = match read_counters(&statistics).await {
            Ok(counters) => counters,
            Err(err) => {
                tracing::warn!("network sampling of {device} failed: {err}");
                return;
            }
        };
        #[allow(clippy::cast_precision_loss)]
        {
            sink.put(format!("tx/{device}"), tx_now.saturating_sub(tx_then) as f64 / 1000.0);
            sink.put(format!("rx/{device}"), rx_now.saturating_sub(rx_then) as f64 / 1000.0);
        }
    }
}

async fn read_counters(statistics: &Path) -> eyre::Result<(u64, u64)> {
    let rx = sysfs::read_u64(statistics.join("rx_bytes")).await?;
    let tx = sysfs::read_u64(statistics.join("tx_bytes")).await?;
    Ok((rx, tx))
}

/// The Wi-Fi link metrics readable from `iw dev <dev> link`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WifiMetric {
    /// Transmit bitrate in MBit/s.
    TxBitrate,
    /// Receive bitrate in MBit/s.
    RxBitrate,
    /// Signal level in dBm.
    Signal,
}

impl WifiMetric {
    /// Line prefix and 1-based field position in iw's output.
    fn selector(self) -> (&'static str, usize) {
        match self {
            Self::TxBitrate => ("tx bitrate", 3),
            Self::RxBitrate => ("rx bitrate", 3),
            Self::Signal => ("signal", 2),
        }
    }

    fn topic_prefix(self) -> &'static str {
        match self {
            Self::TxBitrate => "tx_bitrate",
            Self::RxBitrate => "rx_bitrate",
            Self::Signal => "signal",
        }
    }
}

/// One Wi-Fi link metric of the active wireless device.
#[derive(Debug)]
pub struct WifiLink {
    device: String,
    metric: WifiMetric,
}

impl WifiLink {
    pub(super) fn new(device: String, metric: WifiMetric) -> Self {
        Self { device, metric }
    }

    /// Publishes `<metric>/<dev>`. A device without an active link is
    /// skipped silently; iw reports nothing to parse then.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let (prefix, field) = self.metric.selector();
        match shell::iw_link_field(&self.device, prefix, field).await {
            Ok(value) => {
                sink.put(format!("{}/{}", self.metric.topic_prefix(), self.device), value);
            }
            Err(err) => tracing::debug!("wifi {prefix} sampling failed: {err}"),
        }
    }
}
