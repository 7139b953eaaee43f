use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UnixDatagram;

use crate::{
    config::TransportConfig,
    error::{LeaseError, Result},
    interface::{ChannelId, Delivery, Transport},
};

/// Named channels between processes, one Unix datagram socket per channel.
///
/// Channel `/name` lives at `<socket_dir>/name`. Queue depth is the kernel's
/// datagram backlog rather than [`TransportConfig::queue_capacity`].
pub struct UnixDatagramTransport {
    config: TransportConfig,
    bound: Mutex<HashMap<ChannelId, Arc<UnixDatagram>>>,
}

impl UnixDatagramTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub fn socket_path(&self, channel: &ChannelId) -> PathBuf {
        self.config
            .socket_dir
            .join(channel.as_str().trim_start_matches('/'))
    }

    fn missing_or(channel: &ChannelId, operation: &'static str, e: io::Error) -> LeaseError {
        match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                LeaseError::ChannelNotFound {
                    channel: channel.to_string(),
                }
            }
            _ => LeaseError::channel_io(channel, operation)(e),
        }
    }

    fn connect(&self, channel: &ChannelId) -> Result<UnixDatagram> {
        let socket =
            UnixDatagram::unbound().map_err(LeaseError::channel_io(channel, "create socket"))?;
        socket
            .connect(self.socket_path(channel))
            .map_err(|e| Self::missing_or(channel, "connect", e))?;
        Ok(socket)
    }
}

#[async_trait]
impl Transport for UnixDatagramTransport {
    async fn open_channel(&self, channel: &ChannelId) -> Result<()> {
        if self.bound.lock().contains_key(channel) {
            return Ok(());
        }

        fs::create_dir_all(&self.config.socket_dir)
            .map_err(LeaseError::channel_io(channel, "create socket directory"))?;
        let path = self.socket_path(channel);
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(%channel, "replaced stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LeaseError::channel_io(channel, "remove stale socket")(e)),
        }
        let socket = UnixDatagram::bind(&path).map_err(LeaseError::channel_io(channel, "bind"))?;
        self.bound.lock().insert(channel.clone(), Arc::new(socket));
        Ok(())
    }

    async fn close_channel(&self, channel: &ChannelId) -> Result<()> {
        self.bound.lock().remove(channel);
        fs::remove_file(self.socket_path(channel)).map_err(|e| Self::missing_or(channel, "unlink", e))
    }

    async fn resolve(&self, channel: &ChannelId) -> Result<()> {
        self.connect(channel).map(|_| ())
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

        let socket = self.connect(channel)?;
        let send = socket.send(&payload);
        let sent = match timeout {
            None => send.await,
            Some(timeout) => match tokio::time::timeout(timeout, send).await {
                Ok(sent) => sent,
                Err(_) => return Ok(Delivery::TimedOut),
            },
        };
        sent.map_err(|e| Self::missing_or(channel, "send", e))?;
        Ok(Delivery::Delivered)
    }

    async fn receive(&self, channel: &ChannelId) -> Result<Bytes> {
        let socket = self
            .bound
            .lock()
            .get(channel)
            .cloned()
            .ok_or_else(|| LeaseError::ChannelNotFound {
                channel: channel.to_string(),
            })?;

        // One spare byte so an oversized datagram shows up as the wrong size.
        let mut buf = vec![0u8; self.config.max_message_size + 1];
        let n = socket
            .recv(&mut buf)
            .await
            .map_err(LeaseError::channel_io(channel, "receive"))?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }
}

impl Drop for UnixDatagramTransport {
    fn drop(&mut self) {
        let bound = self.bound.lock();
        for channel in bound.keys() {
            let _ = fs::remove_file(self.socket_path(channel));
        }
    }
}
