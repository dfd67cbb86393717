//! Memory instrument.

use crate::{sysfs, telemetry::TelemetrySender};
use std::path::PathBuf;

/// Used RAM in kilobytes: `MemTotal - MemAvailable`.
#[derive(Debug)]
pub struct Ram {
    proc_mount: PathBuf,
}

impl Ram {
    pub(super) fn new(proc_mount: PathBuf) -> Self {
        Self { proc_mount }
    }

    /// Publishes `ram`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let meminfo = match sysfs::read_meminfo(&self.proc_mount).await {
            Ok(meminfo) => meminfo,
            Err(err) => {
                tracing::warn!("ram sampling failed: {err}");
                return;
            }
        };
        let (Some(total), Some(available)) =
            (meminfo.get("MemTotal"), meminfo.get("MemAvailable"))
        else {
            tracing::warn!("meminfo is missing MemTotal or MemAvailable");
            return;
        };
        #[allow(clippy::cast_precision_loss)]
        sink.put("ram", total.saturating_sub(*available) as f64);
    }
}
