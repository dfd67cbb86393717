//! Periodic measurement driver.
//!
//! A [`TelemetryTicker`] owns one instrument and launches a measurement on
//! every tick. Measurements run in detached tasks, so a slow instrument does
//! not skew the cadence; samples from a long-running measurement may overlap
//! with later ones.

use crate::{instruments::Instrument, telemetry::TelemetrySender};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    task,
    time::{self, Instant, MissedTickBehavior},
};

/// Control handle to a running ticker.
///
/// Signals travel over capacity-one channels: a signal sent while a
/// previous one is still unprocessed waits for the ticker to catch up.
/// Signals sent to an already stopped ticker are absorbed.
#[derive(Debug)]
pub struct TickerHandle {
    pause_tx: mpsc::Sender<bool>,
    done_tx: mpsc::Sender<()>,
}

impl TickerHandle {
    /// Suspends measuring. A measurement already in flight still delivers
    /// its readings.
    pub async fn pause(&self) {
        let _ = self.pause_tx.send(true).await;
    }

    /// Resumes measuring with a fresh tick cadence.
    pub async fn unpause(&self) {
        let _ = self.pause_tx.send(false).await;
    }

    /// Stops the ticker permanently. Valid in any state.
    pub async fn stop(&self) {
        let _ = self.done_tx.send(()).await;
    }
}

/// Periodic driver bound to one instrument.
#[derive(Debug)]
pub struct TelemetryTicker {
    instrument: Arc<Instrument>,
    telemetry: TelemetrySender,
    period: Duration,
    pause_rx: mpsc::Receiver<bool>,
    done_rx: mpsc::Receiver<()>,
}

impl TelemetryTicker {
    /// Creates a ticker and its control handle.
    #[must_use]
    pub fn new(
        instrument: Instrument,
        telemetry: TelemetrySender,
        period: Duration,
    ) -> (Self, TickerHandle) {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(1);
        let ticker = Self {
            instrument: Arc::new(instrument),
            telemetry,
            period,
            pause_rx,
            done_rx,
        };
        (ticker, TickerHandle { pause_tx, done_tx })
    }

    /// Runs the tick loop until stopped.
    ///
    /// The first measurement is launched one period after the start, and
    /// unpausing restarts the cadence from the moment of the unpause.
    pub async fn run(mut self) {
        let mut interval = Self::interval(self.period);
        loop {
            tokio::select! {
                _ = self.done_rx.recv() => return,
                pause = self.pause_rx.recv() => match pause {
                    Some(true) => {
                        if !self.pausing().await {
                            return;
                        }
                        interval = Self::interval(self.period);
                    }
                    Some(false) => {}
                    // The handle is gone; nobody can stop us anymore.
                    None => return,
                },
                _ = interval.tick() => {
                    let instrument = Arc::clone(&self.instrument);
                    let sink = self.telemetry.clone();
                    task::spawn(async move {
                        instrument.measure_and_report(&sink).await;
                    });
                }
            }
        }
    }

    /// Waits in the paused state. Returns `false` when the ticker was
    /// stopped while paused.
    async fn pausing(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.done_rx.recv() => return false,
                pause = self.pause_rx.recv() => match pause {
                    Some(true) => {}
                    Some(false) => return true,
                    None => return false,
                },
            }
        }
    }

    fn interval(period: Duration) -> time::Interval {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instruments::Instrument, telemetry};
    use tokio::time::{advance, sleep};

    fn counting_ticker(
        period: Duration,
    ) -> (TelemetryTicker, TickerHandle, telemetry::TelemetryReceiver) {
        let (tx, rx) = telemetry::channel("test-node");
        let (ticker, handle) = TelemetryTicker::new(Instrument::constant("ticks", 1.0), tx, period);
        (ticker, handle, rx)
    }

    fn drain(rx: &mut telemetry::TelemetryReceiver) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_match_period() {
        let (ticker, handle, mut rx) = counting_ticker(Duration::from_millis(100));
        let run = task::spawn(ticker.run());
        advance(Duration::from_millis(1050)).await;
        // Let the spawned measurement tasks deliver.
        sleep(Duration::from_millis(1)).await;
        let count = drain(&mut rx);
        assert!((9..=11).contains(&count), "got {count} ticks");
        handle.stop().await;
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_ticker_does_not_measure() {
        let (ticker, handle, mut rx) = counting_ticker(Duration::from_millis(50));
        let run = task::spawn(ticker.run());
        handle.pause().await;
        advance(Duration::from_millis(500)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut rx), 0);
        handle.stop().await;
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unpause_resumes_after_repeated_pauses() {
        let (ticker, handle, mut rx) = counting_ticker(Duration::from_millis(50));
        let run = task::spawn(ticker.run());
        handle.pause().await;
        handle.pause().await;
        handle.unpause().await;
        advance(Duration::from_millis(120)).await;
        sleep(Duration::from_millis(1)).await;
        assert!(drain(&mut rx) >= 1);
        handle.stop().await;
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_terminates() {
        let (ticker, handle, _rx) = counting_ticker(Duration::from_millis(50));
        let run = task::spawn(ticker.run());
        handle.pause().await;
        handle.stop().await;
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_absorbing() {
        let (ticker, handle, _rx) = counting_ticker(Duration::from_millis(50));
        let run = task::spawn(ticker.run());
        handle.stop().await;
        run.await.unwrap();
        // A second stop must not block or panic.
        handle.stop().await;
        handle.pause().await;
    }
}
