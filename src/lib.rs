//! A token-lease server.
//!
//! Clients ask for exclusive, time-bounded ownership of a `u16` token. The
//! server checks a persistent record of who holds each token, grants or denies
//! the lease, and answers on the client's private reply channel.
//!
//! ```text
//! client ──► request channel ──► LeaseServer ──► WorkerPool slot ──► LeaseStore
//!    ▲                                                   │
//!    └─────────────────── reply channel ◄────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;

use config::ServerConfig;
use error::{LeaseError, Result};
use interface::{ChannelId, LeaseRequest, RequestKind, Transport};
use lease::LeaseStore;
use util::clock::Clock;
use worker::{LeaseWorker, WorkerPool};

pub mod client;
pub mod config;
pub mod error;
pub mod interface;
pub mod lease;
pub mod transport;
pub mod util;
pub mod worker;

/// Where the request router is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Running,
    Closing,
}

/// What the server handled before it shut down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    /// `TOKEN` requests handed to a worker.
    pub dispatched: u64,
    /// Messages dropped as malformed or of unknown kind.
    pub discarded: u64,
}

/// Owns the lease store and the request channel for the life of the server.
pub struct LeaseServer {
    store: Arc<LeaseStore>,
    transport: Arc<dyn Transport>,
    requests: ChannelId,
    pool: WorkerPool,
    state: RouterState,
    stats: ServerStats,
}

impl LeaseServer {
    /// Creates the request channel and opens (or rebuilds) the store.
    pub async fn open(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        tracing::info!(
            store = %config.store_path.display(),
            workers = config.workers,
            ttl = config.lease_ttl,
            "starting the server"
        );

        let requests = ChannelId::new(config.request_channel.clone());
        transport.open_channel(&requests).await?;

        let ServerConfig {
            store_path,
            workers,
            lease_ttl,
            ..
        } = config;
        let store = tokio::task::spawn_blocking(move || LeaseStore::open(store_path, lease_ttl, clock))
            .await
            .map_err(|source| LeaseError::TaskJoin {
                operation: "open store",
                source,
            })??;

        tracing::info!(channel = %requests, "the server is ready to receive requests");
        Ok(Self {
            store: Arc::new(store),
            transport,
            requests,
            pool: WorkerPool::new(workers),
            state: RouterState::Running,
            stats: ServerStats::default(),
        })
    }

    pub fn store(&self) -> &Arc<LeaseStore> {
        &self.store
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Serves requests until a `CLOSE` arrives, then drains and tears down.
    ///
    /// Returns early with the first fatal error from the channel or from any
    /// worker.
    pub async fn run(mut self) -> Result<ServerStats> {
        while self.state == RouterState::Running {
            let message = tokio::select! {
                received = self.transport.receive(&self.requests) => received?,
                Some(fatal) = self.pool.next_fatal() => return Err(fatal),
            };
            self.route(message).await?;
        }
        self.close().await
    }

    async fn route(&mut self, message: Bytes) -> Result<()> {
        let request = match LeaseRequest::decode(&message) {
            Ok(request) => request,
            Err(e) => {
                self.stats.discarded += 1;
                tracing::warn!(error = %e, "server received an unknown request");
                return Ok(());
            }
        };

        match request.kind {
            RequestKind::Token => {
                tracing::info!(
                    token = request.token,
                    requester = request.requester,
                    reply_port = request.reply_port,
                    "server received a TOKEN request"
                );
                let worker = LeaseWorker::new(request, self.store.clone(), self.transport.clone());
                let slot = self
                    .pool
                    .submit(async move { worker.run().await.map(|_| ()) })
                    .await?;
                self.stats.dispatched += 1;
                tracing::trace!(slot, token = request.token, "dispatched");
            }
            RequestKind::Close => {
                tracing::info!(requester = request.requester, "server received a CLOSE request");
                self.state = RouterState::Closing;
            }
        }
        Ok(())
    }

    async fn close(mut self) -> Result<ServerStats> {
        tracing::info!("server is closing");
        self.pool.drain_all().await?;
        tracing::info!("server's workers have been closed");

        self.transport.close_channel(&self.requests).await?;
        tracing::info!(channel = %self.requests, "request channel removed");

        drop(self.store);
        tracing::info!(
            dispatched = self.stats.dispatched,
            discarded = self.stats.discarded,
            "server closed"
        );
        Ok(self.stats)
    }
}
