//! Per-node command subscription.
//!
//! Listens on `telemcmd/<node>` and translates payloads into daemon
//! commands. Like the reporter, the server task is restarted across
//! transport failure runs.

use crate::{
    consts::{COMMAND_TOPIC_PREFIX, TOPIC_SEPARATOR},
    info::InfoWriter,
    transport::{Bus, TransportError},
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Commands an operator can issue to the daemon.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DaemonCommand {
    /// Suspend all tickers until `Unpause`.
    Pause,
    /// Resume all tickers.
    Unpause,
}

/// Subscribes to the command topic and forwards commands to the daemon.
#[derive(Clone)]
pub struct CommandServer {
    node: String,
    bus: Arc<dyn Bus>,
    commands: mpsc::UnboundedSender<DaemonCommand>,
    info: InfoWriter,
    stop: Arc<Notify>,
}

impl CommandServer {
    /// Creates a command server for the node.
    #[must_use]
    pub fn new(
        node: String,
        bus: Arc<dyn Bus>,
        commands: mpsc::UnboundedSender<DaemonCommand>,
        info: InfoWriter,
    ) -> Self {
        Self { node, bus, commands, info, stop: Arc::new(Notify::new()) }
    }

    /// Serves the command subscription until stopped or the subscription is
    /// lost.
    pub async fn run(self) {
        let topic = format!("{COMMAND_TOPIC_PREFIX}{TOPIC_SEPARATOR}{}", self.node);
        let mut payloads = match self.bus.subscribe(&topic).await {
            Ok(payloads) => payloads,
            Err(TransportError::Closed) => return,
            Err(err) => {
                tracing::error!("command subscription failed: {err}");
                return;
            }
        };
        loop {
            tokio::select! {
                () = self.stop.notified() => {
                    tracing::info!("closing command subscription");
                    return;
                }
                payload = payloads.next() => {
                    let Some(payload) = payload else {
                        tracing::warn!("command subscription ended");
                        return;
                    };
                    self.handle(&payload).await;
                }
            }
        }
    }

    /// Signals the running server to terminate. A stop issued while no
    /// server is running is absorbed by the next one.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    async fn handle(&self, payload: &str) {
        tracing::info!("received command {payload:?}");
        match payload {
            "pause" => {
                let _ = self.commands.send(DaemonCommand::Pause);
            }
            "unpause" => {
                let _ = self.commands.send(DaemonCommand::Unpause);
            }
            "info" => {
                if let Err(err) = self.info.write().await {
                    tracing::error!("error while updating node info: {err}");
                }
            }
            other => tracing::warn!("unhandled command {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{future::BoxFuture, stream::BoxStream};
    use std::{path::PathBuf, sync::Mutex as StdMutex};
    use tokio::sync::mpsc::UnboundedSender;

    /// Bus whose command-topic subscription is fed from a channel.
    struct ScriptedBus {
        payload_tx: StdMutex<Option<UnboundedSender<String>>>,
        payload_rx: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
        hash_writes: StdMutex<usize>,
    }

    impl ScriptedBus {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                payload_tx: StdMutex::new(Some(tx)),
                payload_rx: StdMutex::new(Some(rx)),
                hash_writes: StdMutex::new(0),
            }
        }

        fn sender(&self) -> UnboundedSender<String> {
            self.payload_tx.lock().unwrap().clone().unwrap()
        }
    }

    impl Bus for ScriptedBus {
        fn publish<'a>(
            &'a self,
            _topic: &'a str,
            _payload: &'a str,
        ) -> BoxFuture<'a, Result<i64, TransportError>> {
            Box::pin(async { Ok(0) })
        }

        fn subscribe<'a>(
            &'a self,
            _topic: &'a str,
        ) -> BoxFuture<'a, Result<BoxStream<'static, String>, TransportError>> {
            let rx = self.payload_rx.lock().unwrap().take().unwrap();
            Box::pin(async move {
                Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
                    as BoxStream<'static, String>)
            })
        }

        fn write_hash<'a>(
            &'a self,
            _key: &'a str,
            _fields: &'a [(&'static str, String)],
        ) -> BoxFuture<'a, Result<(), TransportError>> {
            *self.hash_writes.lock().unwrap() += 1;
            Box::pin(async { Ok(()) })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn ping(&self) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn payloads_map_to_daemon_commands() {
        let bus = Arc::new(ScriptedBus::new());
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let info =
            InfoWriter::new("edge-1".to_owned(), PathBuf::from("/proc"), Arc::clone(&bus) as _);
        let server =
            CommandServer::new("edge-1".to_owned(), Arc::clone(&bus) as _, command_tx, info);

        let payloads = bus.sender();
        let task = tokio::spawn(server.clone().run());
        payloads.send("pause".to_owned()).unwrap();
        payloads.send("something-else".to_owned()).unwrap();
        payloads.send("unpause".to_owned()).unwrap();

        assert_eq!(command_rx.recv().await, Some(DaemonCommand::Pause));
        assert_eq!(command_rx.recv().await, Some(DaemonCommand::Unpause));

        server.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn info_command_rewrites_the_record() {
        let bus = Arc::new(ScriptedBus::new());
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let info =
            InfoWriter::new("edge-1".to_owned(), PathBuf::from("/proc"), Arc::clone(&bus) as _);
        let server =
            CommandServer::new("edge-1".to_owned(), Arc::clone(&bus) as _, command_tx, info);

        let payloads = bus.sender();
        let task = tokio::spawn(server.clone().run());
        payloads.send("info".to_owned()).unwrap();
        drop(payloads);
        bus.payload_tx.lock().unwrap().take();
        task.await.unwrap();
        assert_eq!(*bus.hash_writes.lock().unwrap(), 1);
    }
}
