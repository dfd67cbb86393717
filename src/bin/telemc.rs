#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]

//! Listener utility: subscribes to the telemetry topics of one node (or all
//! nodes) and prints the readings as they arrive.

use clap::Parser;
use eyre::{Result, WrapErr as _};
use futures::StreamExt;
use std::time::Duration;
use telemd::{
    async_main, consts, logger,
    transport::{Bus as _, RedisTransport},
};
use tokio::signal::ctrl_c;

/// Prints the telemetry stream of a node.
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Cli {
    /// Bus URL.
    #[clap(short = 'u', long, default_value = "redis://localhost")]
    url: String,
    /// Node to listen to; all nodes by default.
    #[clap(short = 'n', long, default_value = "*")]
    node: String,
}

fn main() -> Result<()> {
    async_main(run(Cli::parse()))
}

async fn run(cli: Cli) -> Result<()> {
    logger::init();

    let pattern = format!("{}/{}/*", consts::TELEMETRY_TOPIC_PREFIX, cli.node);
    let (transport, mut state_rx) =
        RedisTransport::connect(&cli.url, Duration::from_secs(1))
            .wrap_err("could not create bus client")?;
    // Drain state transitions so the limiter's log lines are the only
    // connection feedback.
    tokio::spawn(async move { while state_rx.recv().await.is_some() {} });

    let mut readings = transport.subscribe_pattern(&pattern).await?;
    tracing::info!("listening on {pattern}");
    loop {
        tokio::select! {
            _ = ctrl_c() => break,
            reading = readings.next() => {
                let Some((topic, payload)) = reading else {
                    tracing::warn!("subscription ended");
                    break;
                };
                println!("{topic} {payload}");
            }
        }
    }
    transport.close().await;
    Ok(())
}
