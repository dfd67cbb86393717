#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::{Result, WrapErr as _};
use telemd::{
    async_main, cli::Cli, config::Config, daemon::Daemon, info::NodeInfo, logger,
    transport::RedisTransport,
};
use tokio::signal::ctrl_c;

fn main() -> Result<()> {
    async_main(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    logger::init();

    let mut cfg = Config::load(cli.config.as_deref()).wrap_err("invalid configuration")?;
    if let Some(node_name) = cli.node_name {
        cfg.node_name = node_name;
    }

    if cli.print_info {
        print!("{}", NodeInfo::gather(&cfg.proc_mount).await);
        return Ok(());
    }

    tracing::info!("starting telemd for node {}", cfg.node_name);
    let (transport, state_rx) =
        RedisTransport::connect(&cfg.redis.url, cfg.redis.retry_backoff)
            .wrap_err("could not create bus client")?;
    let daemon = Daemon::new(&cfg).await;

    tracing::info!("running daemon");
    daemon
        .run(transport, state_rx, async {
            let _ = ctrl_c().await;
        })
        .await?;
    tracing::info!("exiting");
    Ok(())
}
