//! Client side of the lease protocol.
//!
//! A client owns one private reply channel named after its reply port. Every
//! request goes out on the shared request channel; the client then reads its
//! reply channel until a response for that exact requester and token shows up.
//! Anything else on the channel (leftovers from an earlier run on the same
//! port, or garbage) is dropped.

use std::sync::Arc;

use bytes::Bytes;
use futures_retry::FutureRetry;

use crate::{
    config::ClientConfig,
    error::{LeaseError, Result},
    interface::{ChannelId, LeaseRequest, LeaseResponse, RequesterId, Transport},
    util::{clock::Clock, retry::FixedCountWithDelayStrategy},
};

pub mod session;

pub use session::{ClientSession, RandomSource, SeededRandom, SessionReport};

pub struct LeaseClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    requester: RequesterId,
    reply_port: u8,
    reply_channel: ChannelId,
    request_channel: ChannelId,
}

impl LeaseClient {
    /// Opens the reply channel for `reply_port`.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
        requester: RequesterId,
        reply_port: u8,
    ) -> Result<Self> {
        let reply_channel = ChannelId::reply(reply_port);
        transport.open_channel(&reply_channel).await?;
        tracing::info!(requester, reply_port, "client starting");

        let request_channel = ChannelId::new(config.request_channel.clone());
        Ok(Self {
            transport,
            clock,
            config,
            requester,
            reply_port,
            reply_channel,
            request_channel,
        })
    }

    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    pub fn reply_port(&self) -> u8 {
        self.reply_port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Requests a lease on `token` and waits for the matching answer.
    ///
    /// Takes `&mut self` so a client can never have two requests in flight.
    pub async fn request(&mut self, token: u16) -> Result<LeaseResponse> {
        let request =
            LeaseRequest::token(token, self.requester, self.reply_port, self.clock.now());
        tracing::info!(requester = self.requester, token, "requesting token");
        send_with_retry(
            self.transport.as_ref(),
            &self.request_channel,
            request.encode(),
            &self.config,
        )
        .await?;

        match self.config.reply_timeout {
            None => self.await_reply(&request).await,
            Some(timeout) => tokio::time::timeout(timeout, self.await_reply(&request))
                .await
                .map_err(|_| LeaseError::ReplyTimeout { token, timeout })?,
        }
    }

    async fn await_reply(&self, request: &LeaseRequest) -> Result<LeaseResponse> {
        loop {
            let bytes = self.transport.receive(&self.reply_channel).await?;
            match LeaseResponse::decode(&bytes) {
                Ok(response) if response.answers(request) => return Ok(response),
                Ok(response) => tracing::info!(
                    requester = self.requester,
                    token = response.token,
                    addressed_to = response.requester,
                    "discarding a message"
                ),
                Err(e) => tracing::debug!(
                    requester = self.requester,
                    error = %e,
                    "discarding a malformed message"
                ),
            }
        }
    }

    /// Destroys this client's reply channel.
    pub async fn release(self) -> Result<()> {
        self.transport.close_channel(&self.reply_channel).await?;
        tracing::info!(requester = self.requester, "client closing");
        Ok(())
    }
}

/// Asks the server to drain and shut down. Does not wait for an answer.
pub async fn send_close(
    transport: &dyn Transport,
    clock: &dyn Clock,
    config: &ClientConfig,
    requester: RequesterId,
) -> Result<()> {
    let request = LeaseRequest::close(requester, clock.now());
    tracing::info!(requester, "requesting server shutdown");
    send_with_retry(
        transport,
        &ChannelId::new(config.request_channel.clone()),
        request.encode(),
        config,
    )
    .await
}

async fn send_with_retry(
    transport: &dyn Transport,
    channel: &ChannelId,
    payload: Bytes,
    config: &ClientConfig,
) -> Result<()> {
    FutureRetry::new(
        || transport.send(channel, payload.clone()),
        FixedCountWithDelayStrategy::new(config.connect_attempts, config.connect_delay),
    )
    .await
    .map(|_| ())
    .map_err(|(e, attempts)| {
        tracing::debug!(%channel, attempts, "giving up on send");
        e
    })
}
