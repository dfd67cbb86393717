//! Telemetry reporter.
//!
//! Drains the telemetry channel and publishes every reading on its bus
//! topic. The reporter task is started on `Connected`, stopped on `Failed`,
//! and restarted on `Recovered`; the receiver lives behind a mutex so
//! consecutive runs hand the channel over cleanly.

use crate::{
    telemetry::TelemetryReceiver,
    transport::{Bus, TransportError},
};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Publishes drained readings to the bus.
#[derive(Clone)]
pub struct Reporter {
    telemetry: Arc<Mutex<TelemetryReceiver>>,
    bus: Arc<dyn Bus>,
    stop: Arc<Notify>,
}

impl Reporter {
    /// Creates a reporter draining the given receiver.
    #[must_use]
    pub fn new(telemetry: TelemetryReceiver, bus: Arc<dyn Bus>) -> Self {
        Self {
            telemetry: Arc::new(Mutex::new(telemetry)),
            bus,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Drains readings until stopped, the channel closes, or the transport
    /// is closed.
    pub async fn run(self) {
        let mut telemetry = self.telemetry.lock().await;
        loop {
            tokio::select! {
                () = self.stop.notified() => return,
                reading = telemetry.recv() => {
                    let Some(reading) = reading else {
                        // Channel closed: all tickers have terminated.
                        return;
                    };
                    if reading.is_empty() {
                        continue;
                    }
                    match self.bus.publish(&reading.bus_topic(), &reading.wire_payload()).await {
                        Ok(_receivers) => {}
                        Err(TransportError::Closed) => {
                            tracing::info!("bus client closed, stopping reporter");
                            return;
                        }
                        Err(err) => {
                            tracing::error!("reporter failed to publish reading: {err}");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Signals the running drain loop to terminate. A stop issued while no
    /// loop is running is absorbed by the next one.
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}
