//! Leaf readers and parsers for `/proc` and `/sys`.
//!
//! File access is async; the parsers are separated out and operate on plain
//! strings so they can be tested against captured fixtures.

use eyre::{eyre, Result, WrapErr};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tokio::fs as afs;

/// Reads the first line of a file, without the trailing newline.
pub async fn read_first_line(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let contents = afs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    Ok(contents.lines().next().unwrap_or_default().to_owned())
}

/// Reads a file whose first line is a single integer counter.
pub async fn read_u64(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let line = read_first_line(path).await?;
    line.trim()
        .parse()
        .wrap_err_with(|| format!("unparsable counter in {}", path.display()))
}

/// Reads a file whose first line is a single float.
pub async fn read_f64(path: impl AsRef<Path>) -> Result<f64> {
    let path = path.as_ref();
    let line = read_first_line(path).await?;
    line.trim()
        .parse()
        .wrap_err_with(|| format!("unparsable value in {}", path.display()))
}

/// Aggregate CPU times from the first line of `/proc/stat`:
/// user, nice, system, idle, and the remaining fields as read.
pub async fn read_cpu_times(proc_mount: &Path) -> Result<Vec<f64>> {
    let line = read_first_line(proc_mount.join("stat")).await?;
    parse_cpu_times(&line)
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_times(line: &str) -> Result<Vec<f64>> {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some("cpu") => {}
        _ => return Err(eyre!("unknown /proc/stat format: {line:?}")),
    }
    fields
        .map(|field| field.parse().wrap_err_with(|| format!("bad cpu time {field:?}")))
        .collect()
}

/// The five fields of `/proc/loadavg`.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadAvg {
    /// One-minute load average.
    pub load1: f64,
    /// Five-minute load average.
    pub load5: f64,
    /// Fifteen-minute load average.
    pub load15: f64,
    /// Currently runnable tasks (numerator of the fourth field).
    pub running: f64,
}

/// Reads and parses `/proc/loadavg`.
pub async fn read_loadavg(proc_mount: &Path) -> Result<LoadAvg> {
    let line = read_first_line(proc_mount.join("loadavg")).await?;
    parse_loadavg(&line)
}

/// Parses a `/proc/loadavg` line like `0.52 0.58 0.59 1/467 9817`.
pub fn parse_loadavg(line: &str) -> Result<LoadAvg> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[load1, load5, load15, procs, ..] = fields.as_slice() else {
        return Err(eyre!("unknown /proc/loadavg format: {line:?}"));
    };
    let running = procs
        .split('/')
        .next()
        .unwrap_or_default()
        .parse()
        .wrap_err_with(|| format!("bad runnable count in {line:?}"))?;
    Ok(LoadAvg {
        load1: load1.parse().wrap_err("bad load1")?,
        load5: load5.parse().wrap_err("bad load5")?,
        load15: load15.parse().wrap_err("bad load15")?,
        running,
    })
}

/// Reads `/proc/meminfo` into a map of kB values.
pub async fn read_meminfo(proc_mount: &Path) -> Result<HashMap<String, u64>> {
    let path = proc_mount.join("meminfo");
    let contents = afs::read_to_string(&path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    Ok(parse_meminfo(&contents))
}

/// Parses `/proc/meminfo` lines like `MemTotal:       16316412 kB`.
/// Unparsable lines are skipped.
#[must_use]
pub fn parse_meminfo(contents: &str) -> HashMap<String, u64> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_owned(), value))
        })
        .collect()
}

/// Pressure-stall totals of one resource from `/proc/pressure/<resource>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pressure {
    /// `total` of the `some` line, in microseconds.
    pub some_total: f64,
    /// `total` of the `full` line, absent for the cpu resource on older
    /// kernels.
    pub full_total: Option<f64>,
}

/// Reads pressure-stall information for one resource.
pub async fn read_pressure(proc_mount: &Path, resource: &str) -> Result<Pressure> {
    let path = proc_mount.join("pressure").join(resource);
    let contents = afs::read_to_string(&path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    parse_pressure(&contents)
}

/// Parses PSI lines like `some avg10=0.00 avg60=0.00 avg300=0.00 total=12345`.
pub fn parse_pressure(contents: &str) -> Result<Pressure> {
    let total_of = |kind: &str| -> Option<f64> {
        contents
            .lines()
            .find(|line| line.starts_with(kind))?
            .split_whitespace()
            .find_map(|field| field.strip_prefix("total="))?
            .parse()
            .ok()
    };
    let some_total =
        total_of("some").ok_or_else(|| eyre!("no `some` line in pressure file"))?;
    Ok(Pressure { some_total, full_total: total_of("full") })
}

/// Reads the counters of `/sys/block/<dev>/stat`.
///
/// Index 2 is sectors read, index 6 sectors written; see the kernel's
/// Documentation/block/stat.rst for the full list.
pub async fn read_block_stats(sys_block: &Path, device: &str) -> Result<Vec<u64>> {
    let line = read_first_line(sys_block.join(device).join("stat")).await?;
    line.split_whitespace()
        .map(|field| field.parse().wrap_err_with(|| format!("bad block stat {field:?}")))
        .collect()
}

/// Per-device rx/tx byte counters parsed from `/proc/<pid>/net/dev`.
#[must_use]
pub fn parse_net_dev(contents: &str) -> HashMap<String, (u64, u64)> {
    contents
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (device, counters) = line.split_once(':')?;
            let fields: Vec<&str> = counters.split_whitespace().collect();
            let rx = fields.first()?.parse().ok()?;
            let tx = fields.get(8)?.parse().ok()?;
            Some((device.trim().to_owned(), (rx, tx)))
        })
        .collect()
}

/// Reads the network byte counters of every device of a process.
pub async fn read_process_net_dev(
    proc_mount: &Path,
    pid: &str,
) -> Result<HashMap<String, (u64, u64)>> {
    let path = proc_mount.join(pid).join("net/dev");
    let contents = afs::read_to_string(&path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    Ok(parse_net_dev(&contents))
}

/// Network devices under `/sys/class/net`, except the loopback.
#[must_use]
pub fn network_devices(sys_class_net: &Path) -> Vec<String> {
    list_dir(sys_class_net, |name| name != "lo")
}

/// Block devices under `/sys/block`, except loop devices.
#[must_use]
pub fn block_devices(sys_block: &Path) -> Vec<String> {
    list_dir(sys_block, |name| !name.starts_with("loop"))
}

/// The per-CPU `scaling_cur_freq` files of all present CPUs.
#[must_use]
pub fn scaling_freq_files(cpu_root: &Path) -> Vec<PathBuf> {
    let mut files = list_dir(cpu_root, |name| {
        name.strip_prefix("cpu").is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    })
    .into_iter()
    .map(|name| cpu_root.join(name).join("cpufreq/scaling_cur_freq"))
    .filter(|path| path.exists())
    .collect::<Vec<_>>();
    files.sort();
    files
}

/// Sorted names of directory entries passing the filter. Unreadable
/// directories yield an empty list.
#[must_use]
pub fn list_dir(path: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().into_string().ok()?;
            keep(&name).then_some(name)
        })
        .collect();
    names.sort();
    names
}

/// Seconds since boot, from the first field of `/proc/uptime`.
pub async fn read_uptime(proc_mount: &Path) -> Result<f64> {
    let line = read_first_line(proc_mount.join("uptime")).await?;
    line.split_whitespace()
        .next()
        .ok_or_else(|| eyre!("empty /proc/uptime"))?
        .parse()
        .wrap_err("bad uptime value")
}
