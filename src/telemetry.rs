//! Telemetry readings and the channel that multiplexes them.
//!
//! Every instrument pushes its readings into a [`TelemetrySender`]; the
//! reporter drains the single [`TelemetryReceiver`] and publishes each
//! reading to the bus. The channel is unbounded, so producers never block:
//! a reading sent after the receiver has gone away is silently dropped,
//! which only happens during shutdown.

use crate::consts::TOPIC_SEPARATOR;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;

/// A single telemetry reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Telemetry {
    /// Name of the node that produced the reading.
    pub node: Arc<str>,
    /// Slash-separated metric topic, e.g. `rx/eth0`.
    pub topic: String,
    /// Wall-clock time the reading was taken.
    pub time: SystemTime,
    /// Metric value.
    pub value: f64,
}

impl Telemetry {
    /// Creates a reading stamped with the current wall-clock time.
    #[must_use]
    pub fn now(node: Arc<str>, topic: impl Into<String>, value: f64) -> Self {
        Self { node, topic: topic.into(), time: SystemTime::now(), value }
    }

    /// The zero-value reading. Never published; see [`Self::is_empty`].
    #[must_use]
    pub fn empty() -> Self {
        Self { node: Arc::from(""), topic: String::new(), time: UNIX_EPOCH, value: 0.0 }
    }

    /// Returns `true` for the all-zero reading that must never reach the bus.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Formats the timestamp for the wire payload as `<sec>.<frac>`.
    ///
    /// The fractional part is `unix_nanos % unix_secs`, not `% 1e9`. This
    /// reproduces the format emitted by previous deployments of the agent,
    /// which existing consumers already parse.
    #[must_use]
    pub fn wire_timestamp(&self) -> String {
        let elapsed = self.time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = elapsed.as_secs();
        if secs == 0 {
            return format!("0.{}", elapsed.subsec_nanos());
        }
        format!("{}.{}", secs, elapsed.as_nanos() % u128::from(secs))
    }

    /// Formats the wire payload: `<timestamp> <value>` with a six-decimal
    /// value.
    #[must_use]
    pub fn wire_payload(&self) -> String {
        format!("{} {:.6}", self.wire_timestamp(), self.value)
    }

    /// The bus topic this reading is published on.
    #[must_use]
    pub fn bus_topic(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            crate::consts::TELEMETRY_TOPIC_PREFIX,
            self.node,
            self.topic,
            sep = TOPIC_SEPARATOR
        )
    }
}

/// Producer half of the telemetry channel, shared by all measurement tasks.
///
/// The sender carries the node name, so instruments only provide a topic and
/// a value.
#[derive(Clone, Debug)]
pub struct TelemetrySender {
    node: Arc<str>,
    tx: mpsc::UnboundedSender<Telemetry>,
}

impl TelemetrySender {
    /// Records a reading under the given topic, stamped with the current
    /// time.
    pub fn put(&self, topic: impl Into<String>, value: f64) {
        let _ = self.tx.send(Telemetry::now(Arc::clone(&self.node), topic, value));
    }

    /// The node name readings are attributed to.
    #[must_use]
    pub fn node(&self) -> &Arc<str> {
        &self.node
    }
}

/// Consumer half of the telemetry channel.
pub type TelemetryReceiver = mpsc::UnboundedReceiver<Telemetry>;

/// Creates the telemetry channel for a node.
///
/// Dropping the sender (and all its clones) closes the channel; the receiver
/// then drains the remaining readings and yields `None`.
#[must_use]
pub fn channel(node: &str) -> (TelemetrySender, TelemetryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TelemetrySender { node: Arc::from(node), tx }, rx)
}
