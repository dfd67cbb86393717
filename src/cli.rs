//! Command Line Interface.

use clap::Parser;
use std::path::PathBuf;

/// Per-node telemetry agent: samples host and workload resource metrics and
/// publishes them to a Redis pub/sub bus.
#[derive(Parser, Debug)]
#[clap(about, version)]
pub struct Cli {
    /// Load configuration from an alternative INI file.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Override the node name from configuration.
    #[clap(short = 'n', long)]
    pub node_name: Option<String>,
    /// Gather the node-info record, print it, and exit.
    #[clap(long)]
    pub print_info: bool,
}
