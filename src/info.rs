//! Node-info record.
//!
//! A descriptive hash written under `telemd.info:<node>` on startup and on
//! the `info` command, and deleted on graceful shutdown. Descriptors that
//! cannot be gathered are logged and left out; the remaining fields are
//! still written.

use crate::{
    consts::{self, NODE_INFO_KEY_PREFIX, SYS_BLOCK, SYS_CLASS_NET},
    shell, sysfs,
    transport::Bus,
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

/// Static descriptors of the node.
#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    /// CPU architecture, in the naming scheme consumers expect
    /// (`amd64`, `arm64`, ...).
    pub arch: String,
    /// Number of logical CPUs.
    pub cpus: Option<usize>,
    /// Total RAM in kilobytes.
    pub ram: Option<u64>,
    /// Boot time as Unix seconds.
    pub boot: Option<u64>,
    /// Block device names.
    pub disk: Vec<String>,
    /// Network device names.
    pub net: Vec<String>,
    /// Host name.
    pub hostname: Option<String>,
    /// Link speed of the active device: Mb/s from sysfs for Ethernet, the
    /// iw bitrate for Wi-Fi.
    pub ethspeed: Option<f64>,
}

impl NodeInfo {
    /// Gathers all descriptors. Failures are logged per field.
    pub async fn gather(proc_mount: &Path) -> Self {
        let mut info = Self {
            arch: wire_arch(std::env::consts::ARCH).to_owned(),
            disk: sysfs::block_devices(Path::new(SYS_BLOCK)),
            net: sysfs::network_devices(Path::new(SYS_CLASS_NET)),
            ..Self::default()
        };
        info.cpus = thread::available_parallelism().map(usize::from).ok();
        match sysfs::read_meminfo(proc_mount).await {
            Ok(meminfo) => info.ram = meminfo.get("MemTotal").copied(),
            Err(err) => tracing::warn!("could not read total RAM: {err}"),
        }
        match boot_time(proc_mount).await {
            Ok(boot) => info.boot = Some(boot),
            Err(err) => tracing::warn!("could not determine boot time: {err}"),
        }
        match nix::unistd::gethostname() {
            Ok(name) => info.hostname = name.into_string().ok(),
            Err(err) => tracing::warn!("could not read hostname: {err}"),
        }
        match link_speed().await {
            Ok(speed) => info.ethspeed = Some(speed),
            Err(err) => tracing::warn!("could not determine link speed: {err}"),
        }
        info
    }

    /// The hash fields in their wire form.
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("arch", self.arch.clone())];
        if let Some(boot) = self.boot {
            fields.push(("boot", boot.to_string()));
        }
        if let Some(hostname) = &self.hostname {
            fields.push(("hostname", hostname.clone()));
        }
        if let Some(ram) = self.ram {
            fields.push(("ram", ram.to_string()));
        }
        if let Some(cpus) = self.cpus {
            fields.push(("cpus", cpus.to_string()));
        }
        fields.push(("disk", self.disk.join(" ")));
        fields.push(("net", self.net.join(" ")));
        if let Some(speed) = self.ethspeed {
            fields.push(("ethspeed", format!("{speed}")));
        }
        fields
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in self.fields() {
            writeln!(f, "{field:9} {value}")?;
        }
        Ok(())
    }
}

/// Writes and removes the node-info record for one node.
#[derive(Clone)]
pub struct InfoWriter {
    node: String,
    proc_mount: PathBuf,
    bus: Arc<dyn Bus>,
}

impl InfoWriter {
    /// Creates a writer for the node.
    #[must_use]
    pub fn new(node: String, proc_mount: PathBuf, bus: Arc<dyn Bus>) -> Self {
        Self { node, proc_mount, bus }
    }

    /// Gathers the descriptors and writes the hash record.
    pub async fn write(&self) -> Result<(), crate::transport::TransportError> {
        let info = NodeInfo::gather(&self.proc_mount).await;
        self.bus.write_hash(&self.key(), &info.fields()).await
    }

    /// Deletes the hash record.
    pub async fn remove(&self) -> Result<(), crate::transport::TransportError> {
        self.bus.delete(&self.key()).await
    }

    fn key(&self) -> String {
        format!("{NODE_INFO_KEY_PREFIX}{}", self.node)
    }
}

/// Boot time: now minus `/proc/uptime`.
async fn boot_time(proc_mount: &Path) -> eyre::Result<u64> {
    let uptime = sysfs::read_uptime(proc_mount).await?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((now - uptime).max(0.0) as u64)
}

/// Link speed of the default-route device.
async fn link_speed() -> eyre::Result<f64> {
    let device = shell::default_route_device().await?;
    let class_net = Path::new(consts::SYS_CLASS_NET).join(&device);
    if class_net.join("wireless").is_dir() {
        shell::iw_link_field(&device, "tx bitrate", 3).await
    } else {
        sysfs::read_f64(class_net.join("speed")).await
    }
}

/// Maps the compiler's architecture names onto the ones consumers of the
/// info record expect.
fn wire_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
