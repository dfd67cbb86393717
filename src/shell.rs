//! External command invocation.
//!
//! The Wi-Fi instruments, the default-route lookup, and the x86 GPU helpers
//! shell out to small utilities. Execution is kept in thin wrappers here and
//! all output parsing lives in pure functions, so tests run against captured
//! command output.

use eyre::{eyre, Result, WrapErr};
use tokio::process::Command;

/// Runs a program and returns its stdout lines, without a trailing empty
/// line. A non-zero exit status is an error.
pub async fn output_lines(program: &str, args: &[&str]) -> Result<Vec<String>> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .wrap_err_with(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        return Err(eyre!("{program} exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect())
}

/// Returns the device carrying the default route, determined with
/// `route -n`. Best-effort: any failure is reported to the caller, which
/// treats it as "no active device".
pub async fn default_route_device() -> Result<String> {
    let lines = output_lines("route", &["-n"]).await?;
    parse_route_table(&lines).ok_or_else(|| eyre!("no default route"))
}

/// Picks the interface of the first `0.0.0.0` destination in a kernel
/// routing table listing.
#[must_use]
pub fn parse_route_table(lines: &[String]) -> Option<String> {
    lines.iter().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [destination, .., iface] if *destination == "0.0.0.0" => {
                Some((*iface).to_owned())
            }
            _ => None,
        }
    })
}

/// Runs `iw dev <device> link` and extracts one numeric field.
///
/// `prefix` selects the line (e.g. `tx bitrate`) and `field` the 1-based
/// whitespace-separated field to parse, matching the position the value has
/// in iw's output.
pub async fn iw_link_field(device: &str, prefix: &str, field: usize) -> Result<f64> {
    let lines = output_lines("iw", &["dev", device, "link"]).await?;
    parse_iw_field(&lines, prefix, field)
        .ok_or_else(|| eyre!("no {prefix:?} field in iw output for {device}"))
}

/// Extracts a numeric field from `iw dev <d> link` output.
#[must_use]
pub fn parse_iw_field(lines: &[String], prefix: &str, field: usize) -> Option<f64> {
    lines
        .iter()
        .map(|line| line.trim())
        .find(|line| line.starts_with(prefix))?
        .split_whitespace()
        .nth(field.checked_sub(1)?)?
        .parse()
        .ok()
}

/// Runs one of the GPU helper binaries (`list_gpus`, `gpu_freq`, `gpu_util`,
/// `gpu_power`). Each output line has the form `id-name-measure-value`.
pub async fn gpu_helper(helper: &str, args: &[&str]) -> Result<Vec<String>> {
    output_lines(helper, args).await
}

/// Splits a GPU helper line `id-name-measure-value` into the id and the
/// numeric value.
#[must_use]
pub fn parse_gpu_helper_line(line: &str) -> Option<(u32, f64)> {
    let fields: Vec<&str> = line.split('-').collect();
    if fields.len() < 4 {
        return None;
    }
    let id = fields[0].parse().ok()?;
    let value = fields[fields.len() - 1].parse().ok()?;
    Some((id, value))
}
