//! Pressure stall information instruments.

use crate::{sysfs, telemetry::TelemetrySender};
use std::path::PathBuf;

/// A PSI resource under `/proc/pressure`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PsiResource {
    /// `/proc/pressure/cpu`
    Cpu,
    /// `/proc/pressure/memory`
    Memory,
    /// `/proc/pressure/io`
    Io,
}

impl PsiResource {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Io => "io",
        }
    }
}

/// Cumulative stall time of one PSI resource.
#[derive(Debug)]
pub struct Psi {
    resource: PsiResource,
    proc_mount: PathBuf,
}

impl Psi {
    pub(super) fn new(resource: PsiResource, proc_mount: PathBuf) -> Self {
        Self { resource, proc_mount }
    }

    /// Publishes `psi_<resource>/some` and, where the kernel reports it,
    /// `psi_<resource>/full`.
    pub async fn measure_and_report(&self, sink: &TelemetrySender) {
        let resource = self.resource.as_str();
        match sysfs::read_pressure(&self.proc_mount, resource).await {
            Ok(pressure) => {
                sink.put(format!("psi_{resource}/some"), pressure.some_total);
                if let Some(full) = pressure.full_total {
                    sink.put(format!("psi_{resource}/full"), full);
                }
            }
            Err(err) => tracing::warn!("psi {resource} sampling failed: {err}"),
        }
    }
}
