//! Node telemetry agent.
//!
//! `telemd` samples host and workload resource metrics on per-metric
//! schedules and publishes them to a Redis pub/sub bus. Consumers subscribe
//! to `telem/<node>/<metric>` topics; operators steer the agent through the
//! `telemcmd/<node>` topic.
//!
//! # Architecture
//!
//! Instruments ([`instruments`]) produce readings into the telemetry
//! channel ([`telemetry`]), driven by per-instrument tickers ([`ticker`]).
//! The reporter ([`reporter`]) drains the channel and publishes over the
//! reconnecting transport ([`transport`]). The daemon ([`daemon`]) owns the
//! tickers, reacts to transport connection-state transitions, and runs the
//! shutdown sequence.

#![warn(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod cli;
pub mod command;
pub mod config;
pub mod consts;
pub mod daemon;
pub mod info;
pub mod instruments;
pub mod logger;
pub mod reporter;
pub mod shell;
pub mod sysfs;
pub mod telemetry;
pub mod ticker;
pub mod transport;

use eyre::Result;
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A wrapper for the main function, which runs common initialization
/// routines and takes a future to execute as the main function.
#[allow(clippy::missing_panics_doc)]
pub fn async_main<F: Future<Output = Result<()>>>(f: F) -> Result<()> {
    color_eyre::install()?;
    let future = async {
        match f.await {
            Ok(()) => {
                // Detached measurement tasks may still be running; we are
                // done, it's safe to drop them.
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("fatal error: {err:?}");
                std::process::exit(1);
            }
        }
    };
    tokio::runtime::Builder::new_multi_thread()
        .thread_name_fn(|| {
            static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_ID.fetch_add(1, Ordering::Relaxed);
            format!("telemd-worker-{id}")
        })
        .enable_all()
        .build()
        .expect("failed to initialize async runtime")
        .block_on(future)
}
