//! CPU utilization, frequency, load, and process-count instruments.

use crate::{consts::CPU_UTIL_SAMPLE_WINDOW, sysfs, telemetry::TelemetrySender};
use std::path::PathBuf;
use tokio::time;

/// CPU utilization over a 500 ms sample window, in percent.
#[derive(Debug)]
pub struct CpuUtil {
    proc_mount: PathBuf,
}

impl CpuUtil {
    pub(super) fn new(proc_mount: PathBuf) -> Self {
        Self { proc_mount }
    }

    /// Publishes `cpu`: busy time (user + system) as a share of busy + idle
    /// time over the sample window.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let then = match sysfs::read_cpu_times(&self.proc_mount).await {
            Ok(times) => times,
            Err(err) => {
                tracing::warn!("cpu utilization sampling failed: {err}");
                return;
            }
        };
        time::sleep(CPU_UTIL_SAMPLE_WINDOW).await;
        let now = match sysfs::read_cpu_times(&self.proc_mount).await {
            Ok(times) => times,
            Err(err) => {
                tracing::warn!("cpu utilization sampling failed: {err}");
                return;
            }
        };
        if then.len() < 4 || now.len() < 4 {
            tracing::warn!("short /proc/stat cpu line");
            return;
        }
        let busy = (now[0] - then[0]) + (now[2] - then[2]);
        let total = busy + (now[3] - then[3]);
        if total <= 0.0 {
            return;
        }
        sink.put("cpu", busy * 100.0 / total);
    }
}

/// CPU frequency summed over all CPUs from cpufreq's `scaling_cur_freq`.
#[derive(Debug)]
pub struct ScalingFrequency {
    files: Vec<PathBuf>,
}

impl ScalingFrequency {
    /// The file list is discovered once; CPUs do not come and go.
    pub(super) fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Publishes `freq`: the sum of `scaling_cur_freq` across present CPUs.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let mut sum = 0;
        for file in &self.files {
            match sysfs::read_u64(file).await {
                Ok(value) => sum += value,
                Err(err) => {
                    tracing::warn!("cpu frequency sampling failed: {err}");
                    return;
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        sink.put("freq", sum as f64);
    }
}

/// CPU frequency summed from the `cpu MHz` lines of `/proc/cpuinfo`, for
/// kernels without cpufreq.
#[derive(Debug)]
pub struct CpuInfoFrequency {
    proc_mount: PathBuf,
}

impl CpuInfoFrequency {
    pub(super) fn new(proc_mount: PathBuf) -> Self {
        Self { proc_mount }
    }

    /// Publishes `freq`: the sum of the `cpu MHz` fields.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let path = self.proc_mount.join("cpuinfo");
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!("failed to read {}: {err}", path.display());
                return;
            }
        };
        sink.put("freq", cpuinfo_frequency_sum(&contents));
    }
}

/// Sums the `cpu MHz` fields of a `/proc/cpuinfo` dump. Unparsable values
/// are logged and skipped.
pub(super) fn cpuinfo_frequency_sum(contents: &str) -> f64 {
    let mut sum = 0.0;
    for line in contents.lines().filter(|line| line.starts_with("cpu MHz")) {
        match line.split(':').nth(1).map(str::trim) {
            Some(value) => match value.parse::<f64>() {
                Ok(mhz) => sum += mhz,
                Err(err) => tracing::warn!("could not parse cpu MHz value {value:?}: {err}"),
            },
            None => tracing::warn!("malformed cpuinfo line {line:?}"),
        }
    }
    sum
}

/// One- and five-minute load averages.
#[derive(Debug)]
pub struct Load {
    proc_mount: PathBuf,
}

impl Load {
    pub(super) fn new(proc_mount: PathBuf) -> Self {
        Self { proc_mount }
    }

    /// Publishes `load1` and `load5`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        match sysfs::read_loadavg(&self.proc_mount).await {
            Ok(load) => {
                sink.put("load1", load.load1);
                sink.put("load5", load.load5);
            }
            Err(err) => tracing::warn!("load sampling failed: {err}"),
        }
    }
}

/// Count of currently runnable tasks.
#[derive(Debug)]
pub struct Procs {
    proc_mount: PathBuf,
}

impl Procs {
    pub(super) fn new(proc_mount: PathBuf) -> Self {
        Self { proc_mount }
    }

    /// Publishes `procs`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        match sysfs::read_loadavg(&self.proc_mount).await {
            Ok(load) => sink.put("procs", load.running),
            Err(err) => tracing::warn!("procs sampling failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry;
    use std::fs;

    #[tokio::test]
    async fn scaling_frequency_sums_all_cpus() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for (cpu, freq) in [("cpu0", "1200000"), ("cpu1", "1400000")] {
            let path = dir.path().join(cpu);
            fs::create_dir(&path).unwrap();
            let file = path.join("scaling_cur_freq");
            fs::write(&file, format!("{freq}\n")).unwrap();
            files.push(file);
        }
        let (tx, mut rx) = telemetry::channel("edge-1");
        ScalingFrequency::new(files).measure_and_report(&tx).await;
        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.topic, "freq");
        assert!((reading.value - 2_600_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cpuinfo_sum_skips_garbage() {
        let contents = "processor\t: 0\ncpu MHz\t\t: 1200.042\nprocessor\t: 1\ncpu MHz\t\t: broken\ncpu MHz\t\t: 799.958\n";
        assert!((cpuinfo_frequency_sum(contents) - 2000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn load_and_procs_read_loadavg() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loadavg"), "0.52 0.58 0.59 3/467 9817\n").unwrap();
        let (tx, mut rx) = telemetry::channel("edge-1");

        Load::new(dir.path().to_path_buf()).measure_and_report(&tx).await;
        let load1 = rx.try_recv().unwrap();
        assert_eq!((load1.topic.as_str(), load1.value), ("load1", 0.52));
        let load5 = rx.try_recv().unwrap();
        assert_eq!((load5.topic.as_str(), load5.value), ("load5", 0.58));

        Procs::new(dir.path().to_path_buf()).measure_and_report(&tx).await;
        let procs = rx.try_recv().unwrap();
        assert_eq!((procs.topic.as_str(), procs.value), ("procs", 3.0));
    }

    #[tokio::test]
    async fn missing_files_emit_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = telemetry::channel("edge-1");
        Load::new(dir.path().to_path_buf()).measure_and_report(&tx).await;
        CpuUtil::new(dir.path().to_path_buf()).measure_and_report(&tx).await;
        assert!(rx.try_recv().is_err());
    }
}
