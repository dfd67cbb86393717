//! Shared test fixtures.

use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use telemd::transport::{Bus, TransportError};
use tokio::{sync::broadcast, time};
use tokio_stream::wrappers::BroadcastStream;

/// In-memory bus that records publishes and hash writes and lets tests
/// inject payloads into subscriptions.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, String)>>,
    hashes: Mutex<HashMap<String, Vec<(String, String)>>>,
    deleted: Mutex<Vec<String>>,
    subscriptions: Mutex<HashMap<String, broadcast::Sender<String>>>,
    closed: AtomicBool,
}

#[allow(dead_code)]
impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Injects a payload into the subscription on a topic.
    pub fn send(&self, topic: &str, payload: &str) {
        let _ = self.subscription(topic).send(payload.to_owned());
    }

    /// All recorded publishes, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// The payloads published on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter_map(|(t, payload)| (t == topic).then_some(payload))
            .collect()
    }

    /// Number of recorded publishes on telemetry topics.
    pub fn telemetry_count(&self) -> usize {
        self.published().iter().filter(|(topic, _)| topic.starts_with("telem/")).count()
    }

    /// The recorded fields of a hash key, if it was written.
    pub fn hash(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.hashes.lock().unwrap().get(key).cloned()
    }

    /// Keys passed to `delete`.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Polls until the condition holds or the timeout expires. Returns
    /// whether the condition held.
    pub async fn wait_until(
        &self,
        timeout: Duration,
        condition: impl Fn(&Self) -> bool,
    ) -> bool {
        let deadline = time::Instant::now() + timeout;
        while time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }

    fn subscription(&self, topic: &str) -> broadcast::Sender<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Bus for RecordingBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<i64, TransportError>> {
        Box::pin(async move {
            self.check_open()?;
            self.published.lock().unwrap().push((topic.to_owned(), payload.to_owned()));
            Ok(1)
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<BoxStream<'static, String>, TransportError>> {
        Box::pin(async move {
            self.check_open()?;
            let stream = BroadcastStream::new(self.subscription(topic).subscribe())
                .filter_map(|payload| async { payload.ok() })
                .boxed();
            Ok(stream)
        })
    }

    fn write_hash<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(&'static str, String)],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.check_open()?;
            self.hashes.lock().unwrap().insert(
                key.to_owned(),
                fields
                    .iter()
                    .map(|(field, value)| ((*field).to_owned(), value.clone()))
                    .collect(),
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.check_open()?;
            self.hashes.lock().unwrap().remove(key);
            self.deleted.lock().unwrap().push(key.to_owned());
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.check_open()?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
        })
    }
}
