//! Bus transport abstraction.
//!
//! The daemon, reporter, and command server talk to the message bus through
//! the [`Bus`] trait, so tests can substitute an in-memory implementation.
//! The production implementation is the reconnecting Redis transport in
//! [`redis`].

pub mod redis;

pub use self::redis::RedisTransport;

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use tokio::sync::mpsc;

/// Connection-state transitions surfaced by a transport.
///
/// The sequence delivered on the state channel always matches
/// `Connected (Failed Recovered)* Stopped?`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// The initial connection attempt succeeded.
    Connected,
    /// A failure run started. Emitted once per run.
    Failed,
    /// The connection came back after a failure run.
    Recovered,
    /// The transport was closed. Terminal.
    Stopped,
}

/// Receiver half of the connection-state channel.
pub type ConnectionStateReceiver = mpsc::UnboundedReceiver<ConnectionState>;

/// Errors surfaced by transport operations.
///
/// Most request failures never reach callers: the transport retries with
/// backoff until the operation succeeds or the transport is closed. `Closed`
/// is the regular shutdown signal for the reporter and command server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed; no further requests will be served.
    #[error("bus client is closed")]
    Closed,
    /// A request failed for a reason other than closure.
    #[error("bus request failed: {0}")]
    Request(String),
}

/// Abstract publisher / subscriber / hash writer.
///
/// All methods are best-effort against a flaky bus: implementations retry
/// internally and only return [`TransportError::Closed`] once the transport
/// has been shut down.
pub trait Bus: Send + Sync {
    /// Publishes a payload on a topic. Returns the number of receivers.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<i64, TransportError>>;

    /// Subscribes to a topic, yielding raw payloads. The stream ends when
    /// the underlying subscription is lost.
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, String>, TransportError>>;

    /// Writes all fields of a keyed hash record in one request.
    fn write_hash<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(&'static str, String)],
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Deletes a keyed record.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Probes the connection. Used to drive recovery detection while the
    /// transport is in a failure run.
    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Transitions the transport to `Stopped` and releases its resources.
    fn close(&self) -> BoxFuture<'_, ()>;
}
