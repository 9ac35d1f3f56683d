//! SSE fan-out broker
//!
//! Many producers (one per in-flight install) feed many browser clients.
//! Each client gets a small bounded channel; emission is `try_send`, so a
//! slow client drops events instead of back-pressuring the download read
//! loop. Polling `/api/active` is the documented fallback for clients that
//! miss events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tooldock_core::{ProgressMessage, ProgressSink};

/// Per-client channel capacity
const CLIENT_BUFFER: usize = 10;

/// Progress fan-out to subscribed SSE clients
#[derive(Default)]
pub struct Broker {
    clients: RwLock<HashMap<u64, mpsc::Sender<ProgressMessage>>>,
    next_id: AtomicU64,
}

impl Broker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; the receiver drains its bounded channel
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<ProgressMessage>) {
        let (sender, receiver) = mpsc::channel(CLIENT_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .write()
            .expect("broker clients poisoned")
            .insert(id, sender);
        tracing::debug!(client = id, "sse client subscribed");
        (id, receiver)
    }

    /// Remove a client (disconnect or stream drop)
    pub fn unsubscribe(&self, id: u64) {
        self.clients
            .write()
            .expect("broker clients poisoned")
            .remove(&id);
        tracing::debug!(client = id, "sse client unsubscribed");
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.read().expect("broker clients poisoned").len()
    }
}

#[async_trait::async_trait]
impl ProgressSink for Broker {
    async fn emit(&self, message: ProgressMessage) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let clients = self.clients.read().expect("broker clients poisoned");
            for (id, sender) in clients.iter() {
                match sender.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(client = id, "sse client slow, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut clients = self.clients.write().expect("broker clients poisoned");
            for id in closed {
                clients.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tooldock_core::{DownloadStatus, InstallKey};

    fn message(status: DownloadStatus) -> ProgressMessage {
        ProgressMessage::status_only(&InstallKey::new("jq", "1.7"), status)
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_clients() {
        let broker = Broker::new();
        let (_a, mut rx_a) = broker.subscribe();
        let (_b, mut rx_b) = broker.subscribe();
        assert_eq!(broker.client_count(), 2);

        broker.emit(message(DownloadStatus::Downloading)).await;
        assert_eq!(rx_a.recv().await.unwrap().status, DownloadStatus::Downloading);
        assert_eq!(rx_b.recv().await.unwrap().status, DownloadStatus::Downloading);
    }

    #[tokio::test]
    async fn test_slow_client_drops_but_does_not_block() {
        let broker = Broker::new();
        let (_id, mut receiver) = broker.subscribe();

        // Overfill the bounded channel; emit must never await
        for _ in 0..(CLIENT_BUFFER + 5) {
            broker.emit(message(DownloadStatus::Downloading)).await;
        }
        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, CLIENT_BUFFER);
    }

    #[tokio::test]
    async fn test_disconnected_client_is_pruned() {
        let broker = Broker::new();
        let (_id, receiver) = broker.subscribe();
        drop(receiver);

        broker.emit(message(DownloadStatus::Completed)).await;
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_client() {
        let broker = Broker::new();
        let (id, _receiver) = broker.subscribe();
        broker.unsubscribe(id);
        assert_eq!(broker.client_count(), 0);
    }
}
