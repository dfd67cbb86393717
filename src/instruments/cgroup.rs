//! Container instruments over the cgroup hierarchies.
//!
//! Docker containers are found under `<root>/<controller>/docker/<id>` on
//! cgroup v1 and `<root>/system.slice/docker-<id>.scope` on v2; Kubernetes
//! pods under `<root>/<controller>/kubepods/{besteffort,burstable,guaranteed}`.
//! The network instruments read `/proc/<pid>/net/dev` of one process of each
//! container and cache the container-id → pid mapping, refreshing it on a
//! lookup miss.

use crate::{sysfs, telemetry::TelemetrySender};
use dashmap::DashMap;
use eyre::{eyre, Result, WrapErr};
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};
use tokio::fs as afs;

/// Length of the short form of a container identifier.
const SHORT_ID_LEN: usize = 12;

const KUBEPODS_QOS_CLASSES: [&str; 3] = ["besteffort", "burstable", "guaranteed"];

/// The cgroup hierarchy layout of the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CgroupVersion {
    /// Split controller hierarchies.
    V1,
    /// Unified hierarchy.
    V2,
}

/// Detects the cgroup version: the unified hierarchy exposes
/// `cgroup.controllers` at its root. Runs once at instrument construction.
#[must_use]
pub fn detect_version(cgroup_root: &Path) -> CgroupVersion {
    if cgroup_root.join("cgroup.controllers").exists() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

/// First 12 characters of a container identifier.
fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Container id of a systemd scope folder name like `docker-<id>.scope`.
pub(super) fn scope_container_id(folder: &str) -> Option<&str> {
    folder.strip_prefix("docker-")?.strip_suffix(".scope")
}

/// Docker containers on a v1 hierarchy: `(id, data directory)` pairs under
/// the given controller.
fn docker_v1_containers(cgroup_root: &Path, controller: &str) -> Vec<(String, PathBuf)> {
    let root = cgroup_root.join(controller).join("docker");
    sysfs::list_dir(&root, |name| name != "." && name != "..")
        .into_iter()
        .map(|id| {
            let dir = root.join(&id);
            (id, dir)
        })
        .collect()
}

/// Docker containers on the unified hierarchy.
fn docker_v2_containers(cgroup_root: &Path) -> Vec<(String, PathBuf)> {
    let root = cgroup_root.join("system.slice");
    sysfs::list_dir(&root, |name| name.starts_with("docker-"))
        .into_iter()
        .filter_map(|folder| {
            let id = scope_container_id(&folder)?.to_owned();
            let dir = root.join(&folder);
            Some((id, dir))
        })
        .collect()
}

/// Kubernetes containers under `<root>/<controller>/kubepods`: iterates the
/// QoS classes, their `pod*` directories, and the 64-character container
/// directories inside.
fn kubepods_containers(cgroup_root: &Path, controller: &str) -> Vec<(String, PathBuf)> {
    let kubepods = cgroup_root.join(controller).join("kubepods");
    let mut containers = Vec::new();
    for class in KUBEPODS_QOS_CLASSES {
        let class_dir = kubepods.join(class);
        for pod in sysfs::list_dir(&class_dir, |name| name.contains("pod")) {
            let pod_dir = class_dir.join(pod);
            for id in sysfs::list_dir(&pod_dir, |name| name.len() == 64) {
                let dir = pod_dir.join(&id);
                containers.push((id, dir));
            }
        }
    }
    containers
}

/// Parses the `usage_usec` head line of a v2 `cpu.stat` file.
pub(super) fn parse_cpu_stat_usec(contents: &str) -> Result<u64> {
    let line = contents.lines().next().unwrap_or_default();
    let value = line
        .strip_prefix("usage_usec ")
        .ok_or_else(|| eyre!("unknown cpu.stat format: {line:?}"))?;
    value.trim().parse().wrap_err("bad usage_usec value")
}

/// Sums `rbytes` and `wbytes` over all device lines of a v2 `io.stat` file.
pub(super) fn parse_io_stat_bytes(contents: &str) -> Result<u64> {
    let mut total = 0;
    for line in contents.lines().filter(|line| !line.trim().is_empty()) {
        for field in line.split_whitespace().skip(1) {
            if let Some(value) = field.strip_prefix("rbytes=").or_else(|| field.strip_prefix("wbytes=")) {
                total += value.parse::<u64>().wrap_err_with(|| format!("bad io.stat field {field:?}"))?;
            }
        }
    }
    Ok(total)
}

/// The `Total` line of a v1 `blkio.throttle.io_service_bytes` file.
pub(super) fn parse_blkio_total(contents: &str) -> Result<u64> {
    let line = contents
        .lines()
        .find(|line| line.starts_with("Total"))
        .ok_or_else(|| eyre!("no Total line in blkio file"))?;
    line.split_whitespace()
        .nth(1)
        .ok_or_else(|| eyre!("malformed blkio Total line: {line:?}"))?
        .parse()
        .wrap_err("bad blkio total")
}

/// Extracts the container id from one process's `/proc/<pid>/cgroup` dump.
///
/// The first line naming a docker scope (v1 `…/docker/<id>`, v2
/// `…/docker-<id>.scope`) or a kubepods path (fifth slash-separated segment)
/// wins.
pub(super) fn container_id_from_cgroup(contents: &str) -> Option<String> {
    for line in contents.lines() {
        if line.contains("docker") {
            let basename = line.rsplit('/').next()?;
            let id = basename
                .strip_prefix("docker-")
                .unwrap_or(basename)
                .strip_suffix(".scope")
                .unwrap_or(basename);
            if !id.is_empty() {
                return Some(id.to_owned());
            }
        } else if line.contains("kubepods") {
            if let Some(id) = line.split('/').nth(4) {
                if !id.is_empty() {
                    return Some(id.to_owned());
                }
            }
        }
    }
    None
}

/// Walks `/proc` and maps container ids to one process id each. The first
/// process found for a container wins.
async fn container_pids(proc_mount: &Path) -> HashMap<String, String> {
    let pids = sysfs::list_dir(proc_mount, |name| {
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
    });
    let mut map = HashMap::new();
    for pid in pids {
        let Ok(contents) = afs::read_to_string(proc_mount.join(&pid).join("cgroup")).await
        else {
            continue;
        };
        if let Some(id) = container_id_from_cgroup(&contents) {
            map.entry(id).or_insert(pid);
        }
    }
    map
}

async fn read_cpu_nanos(version: CgroupVersion, dir: &Path) -> Result<u64> {
    match version {
        CgroupVersion::V1 => sysfs::read_u64(dir.join("cpuacct.usage")).await,
        CgroupVersion::V2 => {
            let contents = afs::read_to_string(dir.join("cpu.stat"))
                .await
                .wrap_err("failed to read cpu.stat")?;
            // usage_usec is microseconds; report nanoseconds like v1 does.
            Ok(parse_cpu_stat_usec(&contents)? * 1000)
        }
    }
}

async fn read_blkio_bytes(version: CgroupVersion, dir: &Path) -> Result<u64> {
    match version {
        CgroupVersion::V1 => {
            let contents = afs::read_to_string(dir.join("blkio.throttle.io_service_bytes"))
                .await
                .wrap_err("failed to read blkio.throttle.io_service_bytes")?;
            parse_blkio_total(&contents)
        }
        CgroupVersion::V2 => {
            let contents = afs::read_to_string(dir.join("io.stat"))
                .await
                .wrap_err("failed to read io.stat")?;
            parse_io_stat_bytes(&contents)
        }
    }
}

async fn read_memory_bytes(version: CgroupVersion, dir: &Path) -> Result<u64> {
    match version {
        CgroupVersion::V1 => sysfs::read_u64(dir.join("memory.usage_in_bytes")).await,
        CgroupVersion::V2 => sysfs::read_u64(dir.join("memory.current")).await,
    }
}

/// Cumulative CPU time of every Docker container, in nanoseconds.
#[derive(Debug)]
pub struct DockerCpu {
    version: CgroupVersion,
    cgroup_root: PathBuf,
}

impl DockerCpu {
    pub(super) fn new(version: CgroupVersion, cgroup_root: PathBuf) -> Self {
        Self { version, cgroup_root }
    }

    /// Publishes `docker_cgrp_cpu/<short-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for (id, dir) in self.containers() {
            match read_cpu_nanos(self.version, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => sink.put(format!("docker_cgrp_cpu/{}", short_id(&id)), value as f64),
                Err(err) => tracing::warn!("docker cpu of {}: {err}", short_id(&id)),
            }
        }
    }

    fn containers(&self) -> Vec<(String, PathBuf)> {
        match self.version {
            CgroupVersion::V1 => docker_v1_containers(&self.cgroup_root, "cpuacct"),
            CgroupVersion::V2 => docker_v2_containers(&self.cgroup_root),
        }
    }
}

/// Total block I/O bytes of every Docker container.
#[derive(Debug)]
pub struct DockerBlkio {
    version: CgroupVersion,
    cgroup_root: PathBuf,
}

impl DockerBlkio {
    pub(super) fn new(version: CgroupVersion, cgroup_root: PathBuf) -> Self {
        Self { version, cgroup_root }
    }

    /// Publishes `docker_cgrp_blkio/<short-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let containers = match self.version {
            CgroupVersion::V1 => docker_v1_containers(&self.cgroup_root, "blkio"),
            CgroupVersion::V2 => docker_v2_containers(&self.cgroup_root),
        };
        for (id, dir) in containers {
            match read_blkio_bytes(self.version, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => {
                    sink.put(format!("docker_cgrp_blkio/{}", short_id(&id)), value as f64);
                }
                Err(err) => tracing::warn!("docker blkio of {}: {err}", short_id(&id)),
            }
        }
    }
}

/// Current memory usage of every Docker container, in bytes.
#[derive(Debug)]
pub struct DockerMemory {
    version: CgroupVersion,
    cgroup_root: PathBuf,
}

impl DockerMemory {
    pub(super) fn new(version: CgroupVersion, cgroup_root: PathBuf) -> Self {
        Self { version, cgroup_root }
    }

    /// Publishes `docker_cgrp_memory/<short-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let containers = match self.version {
            CgroupVersion::V1 => docker_v1_containers(&self.cgroup_root, "memory"),
            CgroupVersion::V2 => docker_v2_containers(&self.cgroup_root),
        };
        for (id, dir) in containers {
            match read_memory_bytes(self.version, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => {
                    sink.put(format!("docker_cgrp_memory/{}", short_id(&id)), value as f64);
                }
                Err(err) => tracing::warn!("docker memory of {}: {err}", short_id(&id)),
            }
        }
    }
}

/// Network byte counters of every container, read from `/proc/<pid>/net/dev`
/// of one cached process per container.
#[derive(Debug)]
struct ContainerNet {
    topic_prefix: &'static str,
    proc_mount: PathBuf,
    pids: DashMap<String, String>,
}

impl ContainerNet {
    fn new(topic_prefix: &'static str, proc_mount: PathBuf) -> Self {
        Self { topic_prefix, proc_mount, pids: DashMap::new() }
    }

    async fn report(&self, container_id: &str, topic_id: &str, sink: &TelemetrySender) {
        let pid = match self.pids.get(container_id).map(|pid| pid.value().clone()) {
            Some(pid) => pid,
            None => {
                let refreshed = container_pids(&self.proc_mount).await;
                let pid = refreshed.get(container_id).cloned();
                for (id, pid) in refreshed {
                    self.pids.insert(id, pid);
                }
                match pid {
                    Some(pid) => pid,
                    None => {
                        tracing::warn!("no process found for container {topic_id}");
                        return;
                    }
                }
            }
        };
        let counters = match sysfs::read_process_net_dev(&self.proc_mount, &pid).await {
            Ok(counters) => counters,
            Err(err) => {
                let gone = err
                    .downcast_ref::<io::Error>()
                    .is_some_and(|io_err| io_err.kind() == io::ErrorKind::NotFound);
                if gone {
                    // The process exited; drop the mapping and let the next
                    // cycle refresh it.
                    self.pids.remove(container_id);
                } else {
                    tracing::warn!("network stats of pid {pid}: {err}");
                }
                return;
            }
        };
        let prefix = self.topic_prefix;
        let mut total = 0;
        #[allow(clippy::cast_precision_loss)]
        {
            for (device, (rx, tx)) in &counters {
                sink.put(format!("{prefix}/{topic_id}/{device}"), (rx + tx) as f64);
                sink.put(format!("{prefix}/{topic_id}/{device}/rx"), *rx as f64);
                sink.put(format!("{prefix}/{topic_id}/{device}/tx"), *tx as f64);
                total += rx + tx;
            }
            sink.put(format!("{prefix}/{topic_id}"), total as f64);
        }
    }
}

/// Per-container network counters of Docker containers.
#[derive(Debug)]
pub struct DockerNet {
    version: CgroupVersion,
    cgroup_root: PathBuf,
    net: ContainerNet,
}

impl DockerNet {
    pub(super) fn new(
        version: CgroupVersion,
        cgroup_root: PathBuf,
        proc_mount: PathBuf,
    ) -> Self {
        Self { version, cgroup_root, net: ContainerNet::new("docker_cgrp_net", proc_mount) }
    }

    /// Publishes `docker_cgrp_net/<short-id>[/<dev>[/rx|tx]]`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let containers = match self.version {
            CgroupVersion::V1 => docker_v1_containers(&self.cgroup_root, "cpuacct"),
            CgroupVersion::V2 => docker_v2_containers(&self.cgroup_root),
        };
        for (id, _dir) in containers {
            self.net.report(&id, short_id(&id), sink).await;
        }
    }
}

/// Cumulative CPU time of every Kubernetes container, in nanoseconds.
#[derive(Debug)]
pub struct KubernetesCpu {
    cgroup_root: PathBuf,
}

impl KubernetesCpu {
    pub(super) fn new(cgroup_root: PathBuf) -> Self {
        Self { cgroup_root }
    }

    /// Publishes `kubernetes_cgrp_cpu/<full-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for (id, dir) in kubepods_containers(&self.cgroup_root, "cpuacct") {
            match read_cpu_nanos(CgroupVersion::V1, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => sink.put(format!("kubernetes_cgrp_cpu/{id}"), value as f64),
                Err(err) => tracing::warn!("kubernetes cpu of {id}: {err}"),
            }
        }
    }
}

/// Total block I/O bytes of every Kubernetes container.
#[derive(Debug)]
pub struct KubernetesBlkio {
    cgroup_root: PathBuf,
}

impl KubernetesBlkio {
    pub(super) fn new(cgroup_root: PathBuf) -> Self {
        Self { cgroup_root }
    }

    /// Publishes `kubernetes_cgrp_blkio/<full-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for (id, dir) in kubepods_containers(&self.cgroup_root, "blkio") {
            match read_blkio_bytes(CgroupVersion::V1, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => sink.put(format!("kubernetes_cgrp_blkio/{id}"), value as f64),
                Err(err) => tracing::warn!("kubernetes blkio of {id}: {err}"),
            }
        }
    }
}

/// Current memory usage of every Kubernetes container, in bytes.
#[derive(Debug)]
pub struct KubernetesMemory {
    cgroup_root: PathBuf,
}

impl KubernetesMemory {
    pub(super) fn new(cgroup_root: PathBuf) -> Self {
        Self { cgroup_root }
    }

    /// Publishes `kubernetes_cgrp_memory/<full-id>`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for (id, dir) in kubepods_containers(&self.cgroup_root, "memory") {
            match read_memory_bytes(CgroupVersion::V1, &dir).await {
                #[allow(clippy::cast_precision_loss)]
                Ok(value) => sink.put(format!("kubernetes_cgrp_memory/{id}"), value as f64),
                Err(err) => tracing::warn!("kubernetes memory of {id}: {err}"),
            }
        }
    }
}

/// Per-container network counters of Kubernetes containers.
#[derive(Debug)]
pub struct KubernetesNet {
    cgroup_root: PathBuf,
    net: ContainerNet,
}

impl KubernetesNet {
    pub(super) fn new(cgroup_root: PathBuf, proc_mount: PathBuf) -> Self {
        Self { cgroup_root, net: ContainerNet::new("kubernetes_cgrp_net", proc_mount) }
    }

    /// Publishes `kubernetes_cgrp_net/<full-id>[/<dev>[/rx|tx]]`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        for (id, _dir) in kubepods_containers(&self.cgroup_root, "cpuacct") {
            self.net.report(&id, &id, sink).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry;
    use std::fs;

    const CONTAINER_ID: &str =
        "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn version_detection_checks_unified_marker() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_version(dir.path()), CgroupVersion::V1);
        fs::write(dir.path().join("cgroup.controllers"), "cpu io memory\n").unwrap();
        assert_eq!(detect_version(dir.path()), CgroupVersion::V2);
    }

    #[test]
    fn cpu_stat_takes_the_usage_head_line() {
        assert_eq!(parse_cpu_stat_usec("usage_usec 293\nuser_usec 211\n").unwrap(), 293);
        assert!(parse_cpu_stat_usec("user_usec 211\n").is_err());
    }

    #[test]
    fn io_stat_sums_read_and_write_bytes() {
        let contents = "259:0 rbytes=10113024 wbytes=4096 rios=149 wios=1 dbytes=0 dios=0\n8:0 rbytes=1000 wbytes=2000 rios=3 wios=4 dbytes=0 dios=0\n";
        assert_eq!(parse_io_stat_bytes(contents).unwrap(), 10_113_024 + 4096 + 1000 + 2000);
    }

    #[test]
    fn blkio_total_line_wins() {
        let contents = "8:0 Read 1000\n8:0 Write 2000\nTotal 3000\n";
        assert_eq!(parse_blkio_total(contents).unwrap(), 3000);
    }

    #[test]
    fn container_ids_from_proc_cgroup_lines() {
        // cgroup v1 docker path.
        let v1 = format!("12:pids:/docker/{CONTAINER_ID}\n11:cpuacct:/docker/{CONTAINER_ID}\n");
        assert_eq!(container_id_from_cgroup(&v1).as_deref(), Some(CONTAINER_ID));

        // cgroup v2 systemd scope.
        let v2 = format!("0::/system.slice/docker-{CONTAINER_ID}.scope\n");
        assert_eq!(container_id_from_cgroup(&v2).as_deref(), Some(CONTAINER_ID));

        // kubepods: the fifth slash-separated segment.
        let kube = format!("11:cpuacct:/kubepods/besteffort/pod1234/{CONTAINER_ID}\n");
        assert_eq!(container_id_from_cgroup(&kube).as_deref(), Some(CONTAINER_ID));

        assert_eq!(container_id_from_cgroup("0::/init.scope\n"), None);
    }

    #[test]
    fn scope_folders_strip_prefix_and_suffix() {
        assert_eq!(
            scope_container_id(&format!("docker-{CONTAINER_ID}.scope")),
            Some(CONTAINER_ID)
        );
        assert_eq!(scope_container_id("session-1.scope"), None);
    }

    #[tokio::test]
    async fn docker_cpu_v1_reads_cpuacct_usage() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("cpuacct/docker").join(CONTAINER_ID);
        fs::create_dir_all(&container).unwrap();
        fs::write(container.join("cpuacct.usage"), "293000\n").unwrap();

        let (tx, mut rx) = telemetry::channel("edge-1");
        DockerCpu::new(CgroupVersion::V1, dir.path().to_path_buf())
            .measure_and_report(&tx)
            .await;
        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.topic, format!("docker_cgrp_cpu/{}", &CONTAINER_ID[..12]));
        assert!((reading.value - 293_000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn docker_cpu_v2_scales_usec_to_nanos() {
        let dir = tempfile::tempdir().unwrap();
        let scope =
            dir.path().join("system.slice").join(format!("docker-{CONTAINER_ID}.scope"));
        fs::create_dir_all(&scope).unwrap();
        fs::write(scope.join("cpu.stat"), "usage_usec 293\nuser_usec 211\n").unwrap();

        let (tx, mut rx) = telemetry::channel("edge-1");
        DockerCpu::new(CgroupVersion::V2, dir.path().to_path_buf())
            .measure_and_report(&tx)
            .await;
        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.topic, format!("docker_cgrp_cpu/{}", &CONTAINER_ID[..12]));
        assert!((reading.value - 293_000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn kubernetes_memory_walks_qos_classes() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir
            .path()
            .join("memory/kubepods/burstable/pod7f6d")
            .join(CONTAINER_ID);
        fs::create_dir_all(&container).unwrap();
        fs::write(container.join("memory.usage_in_bytes"), "1048576\n").unwrap();

        let (tx, mut rx) = telemetry::channel("edge-1");
        KubernetesMemory::new(dir.path().to_path_buf()).measure_and_report(&tx).await;
        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.topic, format!("kubernetes_cgrp_memory/{CONTAINER_ID}"));
        assert!((reading.value - 1_048_576.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn docker_net_resolves_pids_and_sums_devices() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        let proc_mount = dir.path().join("proc");
        fs::create_dir_all(cgroup_root.join("cpuacct/docker").join(CONTAINER_ID)).unwrap();
        // One process belonging to the container.
        let pid_dir = proc_mount.join("4242");
        fs::create_dir_all(pid_dir.join("net")).unwrap();
        fs::write(
            pid_dir.join("cgroup"),
            format!("11:cpuacct:/docker/{CONTAINER_ID}\n"),
        )
        .unwrap();
        fs::write(
            pid_dir.join("net/dev"),
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n \
             eth0:     700     10    0    0    0     0          0         0      300      5    0    0    0     0       0          0\n",
        )
        .unwrap();

        let (tx, mut rx) = telemetry::channel("edge-1");
        let instrument = DockerNet::new(CgroupVersion::V1, cgroup_root, proc_mount);
        instrument.measure_and_report(&tx).await;

        let short = &CONTAINER_ID[..12];
        let sum = rx.try_recv().unwrap();
        assert_eq!((sum.topic.as_str(), sum.value), (format!("docker_cgrp_net/{short}/eth0").as_str(), 1000.0));
        let rx_reading = rx.try_recv().unwrap();
        assert_eq!(rx_reading.value, 700.0);
        let tx_reading = rx.try_recv().unwrap();
        assert_eq!(tx_reading.value, 300.0);
        let total = rx.try_recv().unwrap();
        assert_eq!((total.topic.as_str(), total.value), (format!("docker_cgrp_net/{short}").as_str(), 1000.0));
    }

    #[tokio::test]
    async fn vanished_process_drops_the_cached_pid() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup_root = dir.path().join("cgroup");
        let proc_mount = dir.path().join("proc");
        fs::create_dir_all(cgroup_root.join("cpuacct/docker").join(CONTAINER_ID)).unwrap();
        fs::create_dir_all(&proc_mount).unwrap();

        let instrument = DockerNet::new(CgroupVersion::V1, cgroup_root, proc_mount.clone());
        instrument.net.pids.insert(CONTAINER_ID.to_owned(), "314".to_owned());

        let (tx, mut rx) = telemetry::channel("edge-1");
        instrument.measure_and_report(&tx).await;
        assert!(rx.try_recv().is_err());
        assert!(instrument.net.pids.get(CONTAINER_ID).is_none());
    }
}
