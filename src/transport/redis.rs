//! Reconnecting Redis transport.
//!
//! Wraps a Redis client with unbounded retries: every request loops through
//! the backoff limiter until it succeeds or the transport is closed, so
//! higher-level components never retry themselves. The limiter tracks
//! failure runs and emits [`ConnectionState`] transitions on the state
//! channel.

use super::{Bus, ConnectionState, ConnectionStateReceiver, TransportError};
use eyre::{Result, WrapErr};
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use redis::{aio::MultiplexedConnection, Client, Cmd, FromRedisValue, Pipeline};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    time,
};

/// Reconnection bookkeeping shared by all requests.
///
/// `failures` is `-1` until the first request ever succeeds, so a node
/// booting against an unreachable bus keeps dialing without entering the
/// failure state.
#[derive(Debug)]
struct Limiter {
    backoff: Duration,
    failures: i64,
    dial_failed: bool,
    state_tx: Option<mpsc::UnboundedSender<ConnectionState>>,
}

impl Limiter {
    fn new(backoff: Duration, state_tx: mpsc::UnboundedSender<ConnectionState>) -> Self {
        Self { backoff, failures: -1, dial_failed: false, state_tx: Some(state_tx) }
    }

    /// Whether the next attempt should wait out the backoff first.
    fn backing_off(&self) -> bool {
        self.failures > 0 || self.dial_failed
    }

    fn report_success(&mut self) {
        if self.failures == -1 {
            tracing::info!("connected to the bus");
            self.emit(ConnectionState::Connected);
        } else if self.failures > 0 {
            tracing::info!("bus connection recovered from failure state");
            self.emit(ConnectionState::Recovered);
        }
        self.failures = 0;
        self.dial_failed = false;
    }

    fn report_failure(&mut self) {
        if self.failures == -1 {
            // Not connected yet; keep dialing without entering failed state.
            self.dial_failed = true;
            return;
        }
        self.failures += 1;
        if self.failures == 1 {
            tracing::warn!("bus connection entered failure state");
            self.emit(ConnectionState::Failed);
        }
    }

    fn stop(&mut self) {
        self.emit(ConnectionState::Stopped);
        self.state_tx = None;
    }

    fn emit(&self, state: ConnectionState) {
        if let Some(tx) = &self.state_tx {
            let _ = tx.send(state);
        }
    }
}

/// Redis-backed [`Bus`] with automatic reconnection.
pub struct RedisTransport {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    limiter: Mutex<Limiter>,
    closed: AtomicBool,
}

impl RedisTransport {
    /// Creates a transport for the given URL and returns it together with
    /// the connection-state channel.
    ///
    /// No connection is established yet; the first request (conventionally
    /// a ping) dials and produces `Connected`. An unparsable URL is a fatal
    /// configuration error.
    pub fn connect(
        url: &str,
        retry_backoff: Duration,
    ) -> Result<(Arc<Self>, ConnectionStateReceiver)> {
        let client = Client::open(url).wrap_err_with(|| format!("invalid bus URL {url:?}"))?;
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            client,
            conn: Mutex::new(None),
            limiter: Mutex::new(Limiter::new(retry_backoff, state_tx)),
            closed: AtomicBool::new(false),
        });
        Ok((transport, state_rx))
    }

    /// Gate consulted before every connection attempt. Sleeps the backoff
    /// when the previous attempt failed.
    async fn allow(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let backoff = {
            let limiter = self.limiter.lock().await;
            limiter.backing_off().then_some(limiter.backoff)
        };
        if let Some(backoff) = backoff {
            tracing::debug!("last connection attempt failed, backing off for {backoff:?}");
            time::sleep(backoff).await;
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
        }
        Ok(())
    }

    async fn report(&self, success: bool) {
        let mut limiter = self.limiter.lock().await;
        if success {
            limiter.report_success();
        } else {
            limiter.report_failure();
        }
    }

    /// Returns the cached connection or dials a new one. `None` means the
    /// dial failed and was reported.
    async fn connection(&self) -> Option<MultiplexedConnection> {
        if let Some(conn) = self.conn.lock().await.clone() {
            return Some(conn);
        }
        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *self.conn.lock().await = Some(conn.clone());
                Some(conn)
            }
            Err(err) => {
                tracing::warn!("bus dial failed: {err}");
                self.report(false).await;
                None
            }
        }
    }

    async fn drop_connection(&self) {
        *self.conn.lock().await = None;
    }

    /// Runs one command until it succeeds or the transport is closed.
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, TransportError> {
        loop {
            self.allow().await?;
            let Some(mut conn) = self.connection().await else {
                continue;
            };
            match cmd.query_async(&mut conn).await {
                Ok(value) => {
                    self.report(true).await;
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!("bus request failed: {err}");
                    self.drop_connection().await;
                    self.report(false).await;
                }
            }
        }
    }

    /// Like [`Self::query`], for pipelines.
    async fn exec_pipeline(&self, pipe: &Pipeline) -> Result<(), TransportError> {
        loop {
            self.allow().await?;
            let Some(mut conn) = self.connection().await else {
                continue;
            };
            match pipe.query_async::<()>(&mut conn).await {
                Ok(()) => {
                    self.report(true).await;
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!("bus pipeline failed: {err}");
                    self.drop_connection().await;
                    self.report(false).await;
                }
            }
        }
    }

    /// Pattern-subscribes, yielding `(topic, payload)` pairs. Used by the
    /// listener utility; the daemon itself only needs plain subscriptions.
    pub async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, (String, String)>, TransportError> {
        loop {
            self.allow().await?;
            let mut pubsub = match self.client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(err) => {
                    tracing::warn!("bus dial for subscription failed: {err}");
                    self.report(false).await;
                    continue;
                }
            };
            match pubsub.psubscribe(pattern).await {
                Ok(()) => {
                    self.report(true).await;
                    let stream = pubsub
                        .into_on_message()
                        .map(|msg| {
                            let topic = msg.get_channel_name().to_owned();
                            let payload = msg.get_payload::<String>().unwrap_or_default();
                            (topic, payload)
                        })
                        .boxed();
                    return Ok(stream);
                }
                Err(err) => {
                    tracing::warn!("pattern subscription failed: {err}");
                    self.report(false).await;
                }
            }
        }
    }
}

impl Bus for RedisTransport {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<i64, TransportError>> {
        Box::pin(async move {
            let mut cmd = redis::cmd("PUBLISH");
            cmd.arg(topic).arg(payload);
            self.query(&cmd).await
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, String>, TransportError>> {
        Box::pin(async move {
            loop {
                self.allow().await?;
                let mut pubsub = match self.client.get_async_pubsub().await {
                    Ok(pubsub) => pubsub,
                    Err(err) => {
                        tracing::warn!("bus dial for subscription failed: {err}");
                        self.report(false).await;
                        continue;
                    }
                };
                match pubsub.subscribe(topic).await {
                    Ok(()) => {
                        self.report(true).await;
                        let stream = pubsub
                            .into_on_message()
                            .map(|msg| msg.get_payload::<String>().unwrap_or_default())
                            .boxed();
                        return Ok(stream);
                    }
                    Err(err) => {
                        tracing::warn!("subscription failed: {err}");
                        self.report(false).await;
                    }
                }
            }
        })
    }

    fn write_hash<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(&'static str, String)],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (field, value) in fields {
                pipe.hset(key, *field, value);
            }
            self.exec_pipeline(&pipe).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(key);
            self.query::<i64>(&cmd).await?;
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.query::<String>(&redis::cmd("PING")).await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.drop_connection().await;
                self.limiter.lock().await.stop();
            }
        })
    }
}
