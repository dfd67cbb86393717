//! GPU instruments.
//!
//! On ARM64 the agent targets NVIDIA Jetson devices: the device-tree model
//! selects the devfreq folder, the utilization node, and the INA3221 power
//! rails. On x86 the measurements come from the external helper binaries
//! `list_gpus`, `gpu_freq`, `gpu_util`, and `gpu_power`. Other platforms get
//! no GPU readings.

use crate::{shell, sysfs, telemetry::TelemetrySender};
use std::path::PathBuf;

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";
const JETSON_GPU_DEVFREQ: &str = "/sys/devices/gpu.0/devfreq";
const JETSON_GPU_LOAD: &str = "/sys/devices/gpu.0/load";

/// Reads the Jetson device-tree model string, e.g. `NVIDIA Jetson Xavier NX
/// Developer Kit`.
#[must_use]
pub fn jetson_model() -> Option<String> {
    let raw = std::fs::read_to_string(DEVICE_TREE_MODEL).ok()?;
    Some(raw.trim_end_matches(['\0', '\n']).to_owned())
}

/// The devfreq folder of the model's GPU.
#[must_use]
pub fn devfreq_folder(model: &str) -> Option<&'static str> {
    if model.contains("quill") || model.contains("TX2") {
        Some("17000000.gp10b")
    } else if model.contains("Xavier NX") {
        Some("17000000.gv11b")
    } else if model.contains("Nano") && !model.contains("Orin") {
        Some("57000000.gpu")
    } else if model.contains("Orin") {
        Some("17000000.ga10b")
    } else {
        None
    }
}

/// Marketing name of the model's GPU, used in the discovery map.
#[must_use]
pub fn jetson_gpu_name(model: &str) -> Option<&'static str> {
    if model.contains("TK1") {
        Some("Jetson TK1")
    } else if model.contains("Nano") && !model.contains("Orin") {
        Some("Jetson Nano")
    } else if model.contains("quill") || model.contains("TX2") {
        Some("Jetson TX2")
    } else if model.contains("Xavier NX") {
        Some("Jetson Xavier NX")
    } else if model.contains("Orin") {
        Some("Jetson Orin Nano")
    } else {
        None
    }
}

/// One INA3221 power rail: either a single milliwatt node, or a millivolt
/// node plus a milliampere node whose product is the power.
#[derive(Clone, Debug)]
pub struct PowerRail {
    /// Rail name, e.g. `VDD_IN`. Becomes the topic suffix.
    pub name: &'static str,
    /// One or two sysfs nodes, as described above.
    pub paths: Vec<PathBuf>,
}

fn rail(name: &'static str, paths: &[&str]) -> PowerRail {
    PowerRail { name, paths: paths.iter().map(PathBuf::from).collect() }
}

/// The power rails of the model, with their sysfs nodes.
#[must_use]
pub fn power_rails(model: &str) -> Vec<PowerRail> {
    if model.contains("quill") || model.contains("TX2") {
        let dev0 = "/sys/bus/i2c/drivers/ina3221x/0-0040/iio:device0";
        let dev1 = "/sys/bus/i2c/drivers/ina3221x/0-0041/iio:device1";
        vec![
            rail("VDD_IN", &[&format!("{dev1}/in_power0_input")]),
            rail("VDD_SYS_CPU", &[&format!("{dev1}/in_power1_input")]),
            rail("VDD_SYS_DDR", &[&format!("{dev1}/in_power2_input")]),
            rail("VDD_SYS_GPU", &[&format!("{dev0}/in_power0_input")]),
            rail("VDD_SYS_SOC", &[&format!("{dev0}/in_power1_input")]),
        ]
    } else if model.contains("Xavier NX") {
        let hwmon = "/sys/bus/i2c/drivers/ina3221/7-0040/hwmon/hwmon4";
        vec![
            rail("VDD_IN", &[&format!("{hwmon}/in1_input"), &format!("{hwmon}/curr1_input")]),
            rail(
                "VDD_CPU_GPU_CV",
                &[&format!("{hwmon}/in2_input"), &format!("{hwmon}/curr2_input")],
            ),
            rail("VDD_SOC", &[&format!("{hwmon}/in3_input"), &format!("{hwmon}/curr3_input")]),
        ]
    } else if model.contains("Orin Nano") {
        let hwmon = "/sys/bus/i2c/drivers/ina3221/1-0040/hwmon/hwmon3";
        vec![
            rail("VDD_IN", &[&format!("{hwmon}/in1_input"), &format!("{hwmon}/curr1_input")]),
            rail(
                "VDD_CPU_GPU_CV",
                &[&format!("{hwmon}/in2_input"), &format!("{hwmon}/curr2_input")],
            ),
            rail("VDD_SOC", &[&format!("{hwmon}/in3_input"), &format!("{hwmon}/curr3_input")]),
        ]
    } else {
        Vec::new()
    }
}

/// Jetson GPU core frequency from the devfreq node.
#[derive(Debug)]
pub struct JetsonGpuFrequency {
    cur_freq: PathBuf,
}

impl JetsonGpuFrequency {
    /// The devfreq folder is fixed per chip generation.
    #[must_use]
    pub fn new(devfreq_folder: &str) -> Self {
        Self::with_path(
            PathBuf::from(JETSON_GPU_DEVFREQ).join(devfreq_folder).join("cur_freq"),
        )
    }

    pub(super) fn with_path(cur_freq: PathBuf) -> Self {
        Self { cur_freq }
    }

    /// Publishes `gpu_freq/0` in MHz.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        match sysfs::read_f64(&self.cur_freq).await {
            Ok(hz) => sink.put("gpu_freq/0", hz / 1_000_000.0),
            Err(err) => tracing::warn!("jetson gpu frequency sampling failed: {err}"),
        }
    }
}

/// Jetson GPU utilization from the load node, which reports tenths of a
/// percent.
#[derive(Debug)]
pub struct JetsonGpuUtil {
    load: PathBuf,
}

impl JetsonGpuUtil {
    /// Reads the load node shared by all Jetson generations.
    #[must_use]
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(JETSON_GPU_LOAD))
    }

    pub(super) fn with_path(load: PathBuf) -> Self {
        Self { load }
    }

    /// Publishes `gpu_util/0` in percent.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        match sysfs::read_f64(&self.load).await {
            Ok(load) => sink.put("gpu_util/0", load / 10.0),
            Err(err) => tracing::warn!("jetson gpu utilization sampling failed: {err}"),
        }
    }
}

impl Default for JetsonGpuUtil {
    fn default() -> Self {
        Self::new()
    }
}

/// Jetson power rails from the INA3221 monitors.
#[derive(Debug)]
pub struct JetsonPower {
    rails: Vec<PowerRail>,
}

impl JetsonPower {
    pub(super) fn new(rails: Vec<PowerRail>) -> Self {
        Self { rails }
    }

    /// Publishes `power/<rail>` in milliwatts. Rails with a voltage and a
    /// current node are multiplied out.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for rail in &self.rails {
            let value = match rail.paths.as_slice() {
                [power] => sysfs::read_f64(power).await,
                [voltage, current] => {
                    match (sysfs::read_f64(voltage).await, sysfs::read_f64(current).await) {
                        (Ok(mv), Ok(ma)) => Ok(mv * ma / 1000.0),
                        (Err(err), _) | (_, Err(err)) => Err(err),
                    }
                }
                _ => continue,
            };
            match value {
                Ok(mw) => sink.put(format!("power/{}", rail.name), mw),
                Err(err) => tracing::warn!("power rail {} sampling failed: {err}", rail.name),
            }
        }
    }
}

/// Measurements served by the x86 GPU helper binaries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum X86GpuMetric {
    /// `gpu_freq <id>` in MHz.
    Frequency,
    /// `gpu_util <id>` in percent.
    Utilization,
    /// `gpu_power <id>` in watts.
    Power,
}

impl X86GpuMetric {
    fn helper(self) -> &'static str {
        match self {
            Self::Frequency => "gpu_freq",
            Self::Utilization => "gpu_util",
            Self::Power => "gpu_power",
        }
    }

    fn topic_prefix(self) -> &'static str {
        match self {
            Self::Frequency => "gpu_freq",
            Self::Utilization => "gpu_util",
            Self::Power => "power",
        }
    }
}

/// One x86 GPU metric over the configured device ids.
#[derive(Debug)]
pub struct X86Gpu {
    metric: X86GpuMetric,
    devices: Vec<u32>,
}

impl X86Gpu {
    pub(super) fn new(metric: X86GpuMetric, devices: Vec<u32>) -> Self {
        Self { metric, devices }
    }

    /// Publishes `<metric>/<id>` for each device.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for id in &self.devices {
            let lines = match shell::gpu_helper(self.metric.helper(), &[&id.to_string()]).await
            {
                Ok(lines) => lines,
                Err(err) => {
                    tracing::warn!("gpu helper {} failed: {err}", self.metric.helper());
                    continue;
                }
            };
            let [line] = lines.as_slice() else {
                tracing::warn!(
                    "expected one measurement from {}, got {}",
                    self.metric.helper(),
                    lines.len()
                );
                continue;
            };
            match shell::parse_gpu_helper_line(line) {
                Some((_, value)) => {
                    sink.put(format!("{}/{id}", self.metric.topic_prefix()), value);
                }
                None => tracing::warn!("malformed gpu helper line {line:?}"),
            }
        }
    }
}

/// Discovers the GPUs of an x86 host with the `list_gpus` helper. Each line
/// has the form `<id>-<name>`.
pub async fn discover_x86_gpus() -> Vec<(u32, String)> {
    let lines = match shell::gpu_helper("list_gpus", &[]).await {
        Ok(lines) => lines,
        Err(err) => {
            tracing::debug!("no GPU support: {err}");
            return Vec::new();
        }
    };
    lines
        .iter()
        .filter_map(|line| {
            let (id, name) = line.split_once('-')?;
            Some((id.parse().ok()?, name.to_owned()))
        })
        .collect()
}
