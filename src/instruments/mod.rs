//! Measurement instruments.
//!
//! Every metric family is one instrument: a single sampling cycle pushes
//! zero or more readings into the telemetry sink and never fails the
//! pipeline. The set of instruments is a closed enum; [`build`] assembles
//! the configured set for the host's architecture and cgroup layout.

pub mod cgroup;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod mem;
pub mod net;
pub mod psi;

pub use self::cgroup::{detect_version, CgroupVersion};

use crate::{config::Config, consts, shell, sysfs, telemetry::TelemetrySender};
use std::{collections::HashMap, env, path::{Path, PathBuf}};

/// Names of all instruments the agent knows, as used in configuration and
/// as ticker keys.
pub const NAMES: &[&str] = &[
    "cpu",
    "freq",
    "load",
    "procs",
    "ram",
    "net",
    "disk",
    "psi_cpu",
    "psi_memory",
    "psi_io",
    "docker_cgrp_cpu",
    "docker_cgrp_blkio",
    "docker_cgrp_memory",
    "docker_cgrp_net",
    "kubernetes_cgrp_cpu",
    "kubernetes_cgrp_blkio",
    "kubernetes_cgrp_memory",
    "kubernetes_cgrp_net",
    "tx_bitrate",
    "rx_bitrate",
    "signal",
    "gpu_freq",
    "gpu_util",
    "power",
];

/// A measurement source. One `measure_and_report` call performs a single
/// sampling cycle.
#[derive(Debug)]
pub enum Instrument {
    /// CPU utilization in percent.
    CpuUtil(cpu::CpuUtil),
    /// Summed cpufreq scaling frequency.
    ScalingFrequency(cpu::ScalingFrequency),
    /// Summed `/proc/cpuinfo` frequency, for kernels without cpufreq.
    CpuInfoFrequency(cpu::CpuInfoFrequency),
    /// Load averages.
    Load(cpu::Load),
    /// Runnable task count.
    Procs(cpu::Procs),
    /// Used RAM.
    Ram(mem::Ram),
    /// Per-device network byte rates.
    NetworkDataRate(net::NetworkDataRate),
    /// Per-device block I/O rates.
    DiskDataRate(disk::DiskDataRate),
    /// Pressure stall information of one resource.
    Psi(psi::Psi),
    /// One Wi-Fi link metric.
    WifiLink(net::WifiLink),
    /// Docker per-container CPU time.
    DockerCpu(cgroup::DockerCpu),
    /// Docker per-container block I/O.
    DockerBlkio(cgroup::DockerBlkio),
    /// Docker per-container memory usage.
    DockerMemory(cgroup::DockerMemory),
    /// Docker per-container network counters.
    DockerNet(cgroup::DockerNet),
    /// Kubernetes per-container CPU time.
    KubernetesCpu(cgroup::KubernetesCpu),
    /// Kubernetes per-container block I/O.
    KubernetesBlkio(cgroup::KubernetesBlkio),
    /// Kubernetes per-container memory usage.
    KubernetesMemory(cgroup::KubernetesMemory),
    /// Kubernetes per-container network counters.
    KubernetesNet(cgroup::KubernetesNet),
    /// Jetson GPU frequency.
    JetsonGpuFrequency(gpu::JetsonGpuFrequency),
    /// Jetson GPU utilization.
    JetsonGpuUtil(gpu::JetsonGpuUtil),
    /// Jetson power rails.
    JetsonPower(gpu::JetsonPower),
    /// x86 GPU metric via helper binaries.
    X86Gpu(gpu::X86Gpu),
    /// Fixed reading; used by tests and deployment smoke checks.
    Constant {
        /// Topic the reading is published under.
        topic: String,
        /// The constant value.
        value: f64,
    },
    /// Instrument without a measurement on this platform.
    Noop,
}

impl Instrument {
    /// Performs one sampling cycle, pushing readings into the sink.
    ///
    /// Never fails: sources that cannot be read are logged and skipped.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        match self {
            Self::CpuUtil(instrument) => instrument.measure_and_report(sink).await,
            Self::ScalingFrequency(instrument) => instrument.measure_and_report(sink).await,
            Self::CpuInfoFrequency(instrument) => instrument.measure_and_report(sink).await,
            Self::Load(instrument) => instrument.measure_and_report(sink).await,
            Self::Procs(instrument) => instrument.measure_and_report(sink).await,
            Self::Ram(instrument) => instrument.measure_and_report(sink).await,
            Self::NetworkDataRate(instrument) => instrument.measure_and_report(sink).await,
            Self::DiskDataRate(instrument) => instrument.measure_and_report(sink).await,
            Self::Psi(instrument) => instrument.measure_and_report(sink).await,
            Self::WifiLink(instrument) => instrument.measure_and_report(sink).await,
            Self::DockerCpu(instrument) => instrument.measure_and_report(sink).await,
            Self::DockerBlkio(instrument) => instrument.measure_and_report(sink).await,
            Self::DockerMemory(instrument) => instrument.measure_and_report(sink).await,
            Self::DockerNet(instrument) => instrument.measure_and_report(sink).await,
            Self::KubernetesCpu(instrument) => instrument.measure_and_report(sink).await,
            Self::KubernetesBlkio(instrument) => instrument.measure_and_report(sink).await,
            Self::KubernetesMemory(instrument) => instrument.measure_and_report(sink).await,
            Self::KubernetesNet(instrument) => instrument.measure_and_report(sink).await,
            Self::JetsonGpuFrequency(instrument) => instrument.measure_and_report(sink).await,
            Self::JetsonGpuUtil(instrument) => instrument.measure_and_report(sink).await,
            Self::JetsonPower(instrument) => instrument.measure_and_report(sink).await,
            Self::X86Gpu(instrument) => instrument.measure_and_report(sink).await,
            Self::Constant { topic, value } => sink.put(topic.clone(), *value),
            Self::Noop => {}
        }
    }

    /// An instrument that always reports the same reading.
    #[must_use]
    pub fn constant(topic: impl Into<String>, value: f64) -> Self {
        Self::Constant { topic: topic.into(), value }
    }
}

/// Builds the configured instrument set for this host.
///
/// The default set is assembled per architecture and cgroup version, Wi-Fi
/// instruments are added when the default-route device is wireless, and the
/// enable/disable lists are applied on top: a non-empty disable list filters
/// the default set and takes precedence; the enable list applies only when
/// the disable list is empty.
pub async fn build(cfg: &Config) -> HashMap<String, Instrument> {
    let mut instruments = defaults(cfg, env::consts::ARCH).await;

    if !cfg.instruments.disable.is_empty() {
        tracing::info!("disabling instruments {:?}", cfg.instruments.disable);
        for name in &cfg.instruments.disable {
            if instruments.remove(name).is_none() {
                tracing::warn!("unknown instrument {name:?} in disable list");
            }
        }
    } else if !cfg.instruments.enable.is_empty() {
        tracing::info!("enabling instruments {:?}", cfg.instruments.enable);
        let mut enabled = HashMap::with_capacity(cfg.instruments.enable.len());
        for name in &cfg.instruments.enable {
            match instruments.remove(name) {
                Some(instrument) => {
                    enabled.insert(name.clone(), instrument);
                }
                None => tracing::warn!("unknown instrument {name:?} in enable list"),
            }
        }
        instruments = enabled;
    }
    instruments
}

async fn defaults(cfg: &Config, arch: &str) -> HashMap<String, Instrument> {
    let proc_mount = cfg.proc_mount.clone();
    let cgroup_root = PathBuf::from(consts::CGROUP_ROOT);
    let version = cgroup::detect_version(&cgroup_root);

    let mut instruments = HashMap::from([
        ("cpu".to_owned(), Instrument::CpuUtil(cpu::CpuUtil::new(proc_mount.clone()))),
        ("freq".to_owned(), frequency_instrument(&proc_mount)),
        ("load".to_owned(), Instrument::Load(cpu::Load::new(proc_mount.clone()))),
        ("procs".to_owned(), Instrument::Procs(cpu::Procs::new(proc_mount.clone()))),
        ("ram".to_owned(), Instrument::Ram(mem::Ram::new(proc_mount.clone()))),
        (
            "net".to_owned(),
            Instrument::NetworkDataRate(net::NetworkDataRate::new(
                cfg.instruments.net_devices.clone(),
                PathBuf::from(consts::SYS_CLASS_NET),
            )),
        ),
        (
            "disk".to_owned(),
            Instrument::DiskDataRate(disk::DiskDataRate::new(
                cfg.instruments.disk_devices.clone(),
                PathBuf::from(consts::SYS_BLOCK),
            )),
        ),
        (
            "psi_cpu".to_owned(),
            Instrument::Psi(psi::Psi::new(psi::PsiResource::Cpu, proc_mount.clone())),
        ),
        (
            "psi_memory".to_owned(),
            Instrument::Psi(psi::Psi::new(psi::PsiResource::Memory, proc_mount.clone())),
        ),
        (
            "psi_io".to_owned(),
            Instrument::Psi(psi::Psi::new(psi::PsiResource::Io, proc_mount.clone())),
        ),
        (
            "docker_cgrp_cpu".to_owned(),
            Instrument::DockerCpu(cgroup::DockerCpu::new(version, cgroup_root.clone())),
        ),
        (
            "docker_cgrp_blkio".to_owned(),
            Instrument::DockerBlkio(cgroup::DockerBlkio::new(version, cgroup_root.clone())),
        ),
        (
            "docker_cgrp_memory".to_owned(),
            Instrument::DockerMemory(cgroup::DockerMemory::new(version, cgroup_root.clone())),
        ),
        (
            "docker_cgrp_net".to_owned(),
            Instrument::DockerNet(cgroup::DockerNet::new(
                version,
                cgroup_root.clone(),
                proc_mount.clone(),
            )),
        ),
        (
            "kubernetes_cgrp_cpu".to_owned(),
            Instrument::KubernetesCpu(cgroup::KubernetesCpu::new(cgroup_root.clone())),
        ),
        (
            "kubernetes_cgrp_blkio".to_owned(),
            Instrument::KubernetesBlkio(cgroup::KubernetesBlkio::new(cgroup_root.clone())),
        ),
        (
            "kubernetes_cgrp_memory".to_owned(),
            Instrument::KubernetesMemory(cgroup::KubernetesMemory::new(cgroup_root.clone())),
        ),
        (
            "kubernetes_cgrp_net".to_owned(),
            Instrument::KubernetesNet(cgroup::KubernetesNet::new(
                cgroup_root,
                proc_mount.clone(),
            )),
        ),
    ]);

    if let Some(device) = active_wireless_device().await {
        tracing::info!("found wireless device {device}, enabling Wi-Fi instruments");
        instruments.insert(
            "tx_bitrate".to_owned(),
            Instrument::WifiLink(net::WifiLink::new(device.clone(), net::WifiMetric::TxBitrate)),
        );
        instruments.insert(
            "rx_bitrate".to_owned(),
            Instrument::WifiLink(net::WifiLink::new(device.clone(), net::WifiMetric::RxBitrate)),
        );
        instruments.insert(
            "signal".to_owned(),
            Instrument::WifiLink(net::WifiLink::new(device, net::WifiMetric::Signal)),
        );
    }

    let (gpu_freq, gpu_util, power) = gpu_instruments(cfg, arch).await;
    instruments.insert("gpu_freq".to_owned(), gpu_freq);
    instruments.insert("gpu_util".to_owned(), gpu_util);
    instruments.insert("power".to_owned(), power);

    instruments
}

/// Picks the CPU frequency source: cpufreq's `scaling_cur_freq` where the
/// kernel provides it, the `cpu MHz` fields of `/proc/cpuinfo` otherwise.
fn frequency_instrument(proc_mount: &Path) -> Instrument {
    let files = sysfs::scaling_freq_files(Path::new("/sys/devices/system/cpu"));
    if files.is_empty() {
        Instrument::CpuInfoFrequency(cpu::CpuInfoFrequency::new(proc_mount.to_path_buf()))
    } else {
        Instrument::ScalingFrequency(cpu::ScalingFrequency::new(files))
    }
}

/// Selects the GPU instrument variants for the architecture. Hosts without
/// a supported GPU stack get no-op instruments.
async fn gpu_instruments(cfg: &Config, arch: &str) -> (Instrument, Instrument, Instrument) {
    match arch {
        "aarch64" => match gpu::jetson_model() {
            Some(model) => {
                tracing::info!("detected Jetson device {model:?}");
                let freq = gpu::devfreq_folder(&model).map_or(Instrument::Noop, |folder| {
                    Instrument::JetsonGpuFrequency(gpu::JetsonGpuFrequency::new(folder))
                });
                let power = match gpu::power_rails(&model) {
                    rails if rails.is_empty() => Instrument::Noop,
                    rails => Instrument::JetsonPower(gpu::JetsonPower::new(rails)),
                };
                (freq, Instrument::JetsonGpuUtil(gpu::JetsonGpuUtil::new()), power)
            }
            None => (Instrument::Noop, Instrument::Noop, Instrument::Noop),
        },
        "x86_64" => {
            let discovered = gpu::discover_x86_gpus().await;
            let mut devices: Vec<u32> = discovered.iter().map(|(id, _)| *id).collect();
            if let Some(configured) = &cfg.instruments.gpu_devices {
                devices.retain(|id| configured.contains(id));
            }
            if devices.is_empty() {
                (Instrument::Noop, Instrument::Noop, Instrument::Noop)
            } else {
                for (id, name) in &discovered {
                    tracing::info!("found GPU {id}: {name}");
                }
                (
                    Instrument::X86Gpu(gpu::X86Gpu::new(
                        gpu::X86GpuMetric::Frequency,
                        devices.clone(),
                    )),
                    Instrument::X86Gpu(gpu::X86Gpu::new(
                        gpu::X86GpuMetric::Utilization,
                        devices.clone(),
                    )),
                    Instrument::X86Gpu(gpu::X86Gpu::new(gpu::X86GpuMetric::Power, devices)),
                )
            }
        }
        _ => (Instrument::Noop, Instrument::Noop, Instrument::Noop),
    }
}

/// The default-route network device, if it is wireless.
async fn active_wireless_device() -> Option<String> {
    let device = shell::default_route_device().await.ok()?;
    Path::new(consts::SYS_CLASS_NET)
        .join(&device)
        .join("wireless")
        .is_dir()
        .then_some(device)
}
