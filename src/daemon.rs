//! Daemon lifecycle.
//!
//! The daemon owns the tickers and the command channel, reacts to the
//! transport's connection-state transitions, and drives the shutdown
//! sequence. Sampling is suspended while the transport is in a failure run
//! and resumed on recovery, unless an operator pause is in effect.

use crate::{
    command::{CommandServer, DaemonCommand},
    config::Config,
    consts::SHUTDOWN_DRAIN_WAIT,
    info::InfoWriter,
    instruments,
    reporter::Reporter,
    telemetry::{self, TelemetryReceiver, TelemetrySender},
    ticker::{TelemetryTicker, TickerHandle},
    transport::{Bus, ConnectionState, ConnectionStateReceiver},
};
use eyre::Result;
use std::{collections::HashMap, future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task, time};

const NODE_INFO_REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The sampling and reporting engine of one node.
pub struct Daemon {
    node_name: String,
    proc_mount: PathBuf,
    tickers: HashMap<String, TickerHandle>,
    pending: Vec<TelemetryTicker>,
    telemetry_tx: Option<TelemetrySender>,
    telemetry_rx: Option<TelemetryReceiver>,
    command_tx: mpsc::UnboundedSender<DaemonCommand>,
    command_rx: Option<mpsc::UnboundedReceiver<DaemonCommand>>,
    paused_by_command: bool,
}

impl Daemon {
    /// Builds the daemon: the configured instrument set, one ticker per
    /// instrument, and the telemetry channel.
    pub async fn new(cfg: &Config) -> Self {
        let (telemetry_tx, telemetry_rx) = telemetry::channel(&cfg.node_name);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut tickers = HashMap::new();
        let mut pending = Vec::new();
        for (name, instrument) in instruments::build(cfg).await {
            let period = cfg.period(&name);
            let (ticker, handle) =
                TelemetryTicker::new(instrument, telemetry_tx.clone(), period);
            tickers.insert(name, handle);
            pending.push(ticker);
        }
        tracing::info!("configured {} tickers", tickers.len());

        Self {
            node_name: cfg.node_name.clone(),
            proc_mount: cfg.proc_mount.clone(),
            tickers,
            pending,
            telemetry_tx: Some(telemetry_tx),
            telemetry_rx: Some(telemetry_rx),
            command_tx,
            command_rx: Some(command_rx),
            paused_by_command: false,
        }
    }

    /// Runs the daemon until the shutdown future resolves or the transport
    /// stops. Blocks until everything has shut down.
    pub async fn run(
        mut self,
        bus: Arc<dyn Bus>,
        mut state_rx: ConnectionStateReceiver,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let reporter = Reporter::new(
            self.telemetry_rx.take().expect("daemon run entered twice"),
            Arc::clone(&bus),
        );
        let info =
            InfoWriter::new(self.node_name.clone(), self.proc_mount.clone(), Arc::clone(&bus));
        let command_server = CommandServer::new(
            self.node_name.clone(),
            Arc::clone(&bus),
            self.command_tx.clone(),
            info.clone(),
        );

        let ticker_tasks: Vec<_> =
            self.pending.drain(..).map(|ticker| task::spawn(ticker.run())).collect();
        let mut command_rx = self.command_rx.take().expect("daemon run entered twice");

        // Initiate the connection; the first successful ping produces the
        // Connected state.
        spawn_ping(&bus);

        tokio::pin!(shutdown);
        let mut stopping = false;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("stopping daemon");
                    stopping = true;
                    command_server.stop();
                    match time::timeout(NODE_INFO_REMOVE_TIMEOUT, info.remove()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => tracing::warn!("could not remove node info: {err}"),
                        Err(_) => tracing::warn!("node info removal timed out"),
                    }
                    reporter.stop();
                    self.stop_tickers().await;
                    bus.close().await;
                    break;
                }
                state = state_rx.recv() => match state {
                    Some(ConnectionState::Connected) => {
                        task::spawn(command_server.clone().run());
                        task::spawn(reporter.clone().run());
                        let info = info.clone();
                        task::spawn(async move {
                            if let Err(err) = info.write().await {
                                tracing::error!("error initializing node info: {err}");
                            }
                        });
                    }
                    Some(ConnectionState::Failed) => {
                        self.pause_tickers().await;
                        command_server.stop();
                        reporter.stop();
                        // Probe until the connection recovers.
                        spawn_ping(&bus);
                    }
                    Some(ConnectionState::Recovered) => {
                        self.unpause_tickers().await;
                        task::spawn(command_server.clone().run());
                        task::spawn(reporter.clone().run());
                    }
                    Some(ConnectionState::Stopped) | None => break,
                },
                Some(command) = command_rx.recv() => self.handle_command(command).await,
            }
        }

        if !stopping {
            // The transport stopped underneath us; wind the components down.
            command_server.stop();
            reporter.stop();
            self.stop_tickers().await;
        }

        for ticker in ticker_tasks {
            let _ = ticker.await;
        }
        // Let in-flight measurements deliver their readings.
        time::sleep(SHUTDOWN_DRAIN_WAIT).await;
        tracing::info!("closing telemetry channel");
        drop(self.telemetry_tx.take());
        Ok(())
    }

    async fn handle_command(&mut self, command: DaemonCommand) {
        match command {
            DaemonCommand::Pause => {
                tracing::info!("pausing {} tickers", self.tickers.len());
                self.paused_by_command = true;
                self.pause_tickers().await;
            }
            DaemonCommand::Unpause => {
                tracing::info!("unpausing {} tickers", self.tickers.len());
                self.paused_by_command = false;
                self.unpause_tickers().await;
            }
        }
    }

    /// Pauses every ticker, regardless of the operator pause flag.
    async fn pause_tickers(&self) {
        for handle in self.tickers.values() {
            handle.pause().await;
        }
    }

    /// Resumes every ticker, unless an operator pause is in effect. The
    /// transport-recovery path never overrides an operator-issued pause.
    async fn unpause_tickers(&self) {
        if self.paused_by_command {
            return;
        }
        for handle in self.tickers.values() {
            handle.unpause().await;
        }
    }

    async fn stop_tickers(&self) {
        for (name, handle) in &self.tickers {
            tracing::info!("stopping ticker {name}");
            handle.stop().await;
        }
    }
}

fn spawn_ping(bus: &Arc<dyn Bus>) {
    let bus = Arc::clone(bus);
    task::spawn(async move {
        let _ = bus.ping().await;
    });
}
