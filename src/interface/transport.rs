use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{config::REQUEST_CHANNEL, error::Result};

/// Name of a message channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The shared inbound request channel.
    pub fn requests() -> Self {
        Self::new(REQUEST_CHANNEL)
    }

    /// The private reply channel of the client listening on `port`.
    pub fn reply(port: u8) -> Self {
        Self(format!("/client_{}", port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a time-bounded send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    TimedOut,
}

/// Named, message-oriented channels.
///
/// Channels preserve message boundaries and are bounded: a send to a full
/// channel waits for room.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Creates `channel` for receiving. Opening an existing channel is not an
    /// error and keeps any messages already queued on it.
    async fn open_channel(&self, channel: &ChannelId) -> Result<()>;

    /// Destroys `channel`. Pending messages are dropped.
    async fn close_channel(&self, channel: &ChannelId) -> Result<()>;

    /// Checks that `channel` exists and can be written to.
    async fn resolve(&self, channel: &ChannelId) -> Result<()>;

    /// Sends `payload`, waiting at most `timeout` for room when one is given.
    async fn deliver(
        &self,
        channel: &ChannelId,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Delivery>;

    /// Waits for the next message on `channel`.
    async fn receive(&self, channel: &ChannelId) -> Result<Bytes>;

    async fn send(&self, channel: &ChannelId, payload: Bytes) -> Result<()> {
        self.deliver(channel, payload, None).await.map(|_| ())
    }

    async fn send_timeout(
        &self,
        channel: &ChannelId,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Delivery> {
        self.deliver(channel, payload, Some(timeout)).await
    }
}
