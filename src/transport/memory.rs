use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{self, error::SendTimeoutError},
    Mutex as AsyncMutex,
};

use crate::{
    config::TransportConfig,
    error::{LeaseError, Result},
    interface::{ChannelId, Delivery, Transport},
};

struct Channel {
    tx: mpsc::Sender<Bytes>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Bytes>>>,
}

/// In-process named channels backed by bounded tokio queues.
///
/// Share one instance (behind an `Arc`) between a server and its clients to
/// run the whole protocol inside a single binary.
pub struct MemoryTransport {
    config: TransportConfig,
    channels: Mutex<HashMap<ChannelId, Channel>>,
}

impl MemoryTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `channel` is currently open.
    pub fn contains(&self, channel: &ChannelId) -> bool {
        self.channels.lock().contains_key(channel)
    }

    fn sender(&self, channel: &ChannelId) -> Result<mpsc::Sender<Bytes>> {
        self.channels
            .lock()
            .get(channel)
            .map(|c| c.tx.clone())
            .ok_or_else(|| LeaseError::ChannelNotFound {
                channel: channel.to_string(),
            })
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_channel(&self, channel: &ChannelId) -> Result<()> {
        let capacity = self.config.queue_capacity;
        self.channels.lock().entry(channel.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(capacity);
            Channel {
                tx,
                rx: Arc::new(AsyncMutex::new(rx)),
            }
        });
        Ok(())
    }

    async fn close_channel(&self, channel: &ChannelId) -> Result<()> {
        self.channels
            .lock()
            .remove(channel)
            .map(|_| ())
            .ok_or_else(|| LeaseError::ChannelNotFound {
                channel: channel.to_string(),
            })
    }

    async fn resolve(&self, channel: &ChannelId) -> Result<()> {
        self.sender(channel).map(|_| ())
    }

    async fn deliver(
        &self,
        channel: &ChannelId,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Delivery> {
        if payload.len() > self.config.max_message_size {
            return Err(LeaseError::MessageTooLarge {
                size: payload.len(),
                limit: self.config.max_message_size,
            });
        }

        let tx = self.sender(channel)?;
        let closed = || LeaseError::ChannelClosed {
            channel: channel.to_string(),
        };
        match timeout {
            None => tx.send(payload).await.map(|_| Delivery::Delivered).map_err(|_| closed()),
            Some(timeout) => match tx.send_timeout(payload, timeout).await {
                Ok(()) => Ok(Delivery::Delivered),
                Err(SendTimeoutError::Timeout(_)) => Ok(Delivery::TimedOut),
                Err(SendTimeoutError::Closed(_)) => Err(closed()),
            },
        }
    }

    async fn receive(&self, channel: &ChannelId) -> Result<Bytes> {
        let rx = self
            .channels
            .lock()
            .get(channel)
            .map(|c| c.rx.clone())
            .ok_or_else(|| LeaseError::ChannelNotFound {
                channel: channel.to_string(),
            })?;
        let mut rx = rx.lock().await;
        rx.recv().await.ok_or_else(|| LeaseError::ChannelClosed {
            channel: channel.to_string(),
        })
    }
}
