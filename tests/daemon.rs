mod common;

use common::RecordingBus;
use std::{collections::HashMap, fs, path::Path, sync::Arc, time::Duration};
use telemd::{
    config::{Config, InstrumentsConfig, RedisConfig},
    consts,
    daemon::Daemon,
    instruments::Instrument,
    reporter::Reporter,
    telemetry,
    ticker::TelemetryTicker,
    transport::{Bus, ConnectionState},
};
use tokio::{
    sync::{mpsc, oneshot},
    task, time,
};

const NODE: &str = "edge-1";
const INFO_KEY: &str = "telemd.info:edge-1";

fn test_config(proc_mount: &Path, enable: &[&str], period: Duration) -> Config {
    let periods: HashMap<String, Duration> =
        enable.iter().map(|name| ((*name).to_owned(), period)).collect();
    Config {
        node_name: NODE.to_owned(),
        redis: RedisConfig {
            url: consts::DEFAULT_REDIS_URL.to_owned(),
            retry_backoff: Duration::from_millis(100),
        },
        instruments: InstrumentsConfig {
            enable: enable.iter().map(|name| (*name).to_owned()).collect(),
            periods,
            ..InstrumentsConfig::default()
        },
        proc_mount: proc_mount.to_path_buf(),
    }
}

struct RunningDaemon {
    bus: Arc<RecordingBus>,
    state_tx: mpsc::UnboundedSender<ConnectionState>,
    stop_tx: Option<oneshot::Sender<()>>,
    run: task::JoinHandle<eyre::Result<()>>,
}

impl RunningDaemon {
    async fn start(cfg: &Config) -> Self {
        let bus = RecordingBus::new();
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let daemon = Daemon::new(cfg).await;
        let run = task::spawn(daemon.run(
            Arc::clone(&bus) as Arc<dyn Bus>,
            state_rx,
            async move {
                let _ = stop_rx.await;
            },
        ));
        Self { bus, state_tx, stop_tx: Some(stop_tx), run }
    }

    fn state(&self, state: ConnectionState) {
        self.state_tx.send(state).unwrap();
    }

    async fn shutdown(mut self) {
        self.stop_tx.take().unwrap().send(()).unwrap();
        self.run.await.unwrap().unwrap();
    }
}

fn payload_value(payload: &str) -> f64 {
    payload.split(' ').nth(1).unwrap().parse().unwrap()
}

#[tokio::test]
async fn cpu_sample_reaches_the_bus() {
    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("stat"), "cpu 100 0 50 850 3 0 7 0 0 0\n").unwrap();

    let cfg = test_config(proc_dir.path(), &["cpu"], Duration::from_millis(500));
    let daemon = RunningDaemon::start(&cfg).await;
    daemon.state(ConnectionState::Connected);

    // The counters advance while the instrument sits in its sample window.
    time::sleep(Duration::from_millis(750)).await;
    fs::write(proc_dir.path().join("stat"), "cpu 200 0 100 1700 3 0 7 0 0 0\n").unwrap();

    let topic = format!("telem/{NODE}/cpu");
    assert!(
        daemon
            .bus
            .wait_until(Duration::from_millis(1100), |bus| {
                !bus.published_on(&topic).is_empty()
            })
            .await,
        "no cpu reading was published"
    );
    let payloads = daemon.bus.published_on(&topic);
    assert!((payload_value(&payloads[0]) - 15.0).abs() < 1e-9);

    daemon.shutdown().await;
}

#[tokio::test]
async fn pause_command_suspends_publishing() {
    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("loadavg"), "0.52 0.58 0.59 3/467 9817\n").unwrap();

    let cfg = test_config(proc_dir.path(), &["load", "procs"], Duration::from_millis(100));
    let daemon = RunningDaemon::start(&cfg).await;
    daemon.state(ConnectionState::Connected);

    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() >= 3)
            .await
    );

    daemon.bus.send(&format!("telemcmd/{NODE}"), "pause");
    // Give the pause time to propagate and in-flight measurements to land.
    time::sleep(Duration::from_millis(400)).await;
    let paused_count = daemon.bus.telemetry_count();
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(daemon.bus.telemetry_count(), paused_count, "readings published while paused");

    daemon.bus.send(&format!("telemcmd/{NODE}"), "unpause");
    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() > paused_count)
            .await,
        "publishing did not resume after unpause"
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn transport_failure_pauses_and_recovery_resumes() {
    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("loadavg"), "0.52 0.58 0.59 3/467 9817\n").unwrap();

    let cfg = test_config(proc_dir.path(), &["procs"], Duration::from_millis(100));
    let daemon = RunningDaemon::start(&cfg).await;
    daemon.state(ConnectionState::Connected);

    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() >= 2)
            .await
    );

    daemon.state(ConnectionState::Failed);
    time::sleep(Duration::from_millis(400)).await;
    let failed_count = daemon.bus.telemetry_count();
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(daemon.bus.telemetry_count(), failed_count, "sampling continued while failed");

    daemon.state(ConnectionState::Recovered);
    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() > failed_count)
            .await,
        "sampling did not resume after recovery"
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn recovery_respects_an_operator_pause() {
    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("loadavg"), "0.52 0.58 0.59 3/467 9817\n").unwrap();

    let cfg = test_config(proc_dir.path(), &["procs"], Duration::from_millis(100));
    let daemon = RunningDaemon::start(&cfg).await;
    daemon.state(ConnectionState::Connected);

    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() >= 1)
            .await
    );

    daemon.bus.send(&format!("telemcmd/{NODE}"), "pause");
    time::sleep(Duration::from_millis(400)).await;

    daemon.state(ConnectionState::Failed);
    time::sleep(Duration::from_millis(200)).await;
    daemon.state(ConnectionState::Recovered);

    let paused_count = daemon.bus.telemetry_count();
    time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        daemon.bus.telemetry_count(),
        paused_count,
        "recovery overrode the operator pause"
    );

    daemon.bus.send(&format!("telemcmd/{NODE}"), "unpause");
    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(1), |bus| bus.telemetry_count() > paused_count)
            .await
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn node_info_is_written_on_connect_and_deleted_on_shutdown() {
    let proc_dir = tempfile::tempdir().unwrap();
    fs::write(proc_dir.path().join("loadavg"), "0.52 0.58 0.59 3/467 9817\n").unwrap();
    fs::write(proc_dir.path().join("meminfo"), "MemTotal:       4030465 kB\n").unwrap();
    fs::write(proc_dir.path().join("uptime"), "100.25 354.52\n").unwrap();

    let cfg = test_config(proc_dir.path(), &["procs"], Duration::from_millis(200));
    let daemon = RunningDaemon::start(&cfg).await;
    daemon.state(ConnectionState::Connected);

    assert!(
        daemon
            .bus
            .wait_until(Duration::from_secs(2), |bus| bus.hash(INFO_KEY).is_some())
            .await,
        "node info was not written"
    );
    let fields = daemon.bus.hash(INFO_KEY).unwrap();
    let field = |name: &str| {
        fields.iter().find(|(f, _)| f == name).map(|(_, value)| value.clone())
    };
    assert!(field("arch").is_some());
    assert!(field("hostname").is_some());
    assert!(field("cpus").is_some());
    assert_eq!(field("ram").as_deref(), Some("4030465"));

    let bus = Arc::clone(&daemon.bus);
    daemon.shutdown().await;
    assert_eq!(bus.deleted(), [INFO_KEY.to_owned()]);
    assert!(bus.hash(INFO_KEY).is_none());
}

#[tokio::test]
async fn deterministic_instrument_round_trips_every_cycle() {
    let bus = RecordingBus::new();
    let (telemetry_tx, telemetry_rx) = telemetry::channel(NODE);
    let reporter = Reporter::new(telemetry_rx, Arc::clone(&bus) as Arc<dyn Bus>);
    let reporter_task = task::spawn(reporter.clone().run());

    let (ticker, handle) = TelemetryTicker::new(
        Instrument::constant("ticks", 42.0),
        telemetry_tx.clone(),
        Duration::from_millis(50),
    );
    let ticker_task = task::spawn(ticker.run());

    time::sleep(Duration::from_millis(500)).await;
    handle.stop().await;
    ticker_task.await.unwrap();
    drop(telemetry_tx);
    reporter_task.await.unwrap();

    let topic = format!("telem/{NODE}/ticks");
    let payloads = bus.published_on(&topic);
    assert!(
        (8..=12).contains(&payloads.len()),
        "expected ~10 publishes, got {}",
        payloads.len()
    );
    for payload in &payloads {
        assert!((payload_value(payload) - 42.0).abs() < f64::EPSILON);
    }
    // Nothing else was published.
    assert_eq!(bus.published().len(), payloads.len());
}
