//! Execution of one lease transaction.

use std::{sync::Arc, time::Duration};

use crate::{
    error::{LeaseError, Result},
    interface::{ChannelId, Delivery, LeaseRequest, LeaseResponse, Transport},
    lease::LeaseStore,
};

pub mod pool;

pub use pool::{SlotId, WorkerPool};

/// Handles one `TOKEN` request end-to-end: resolve the reply channel, run the
/// store transaction, then deliver the answer before the lease would expire.
pub(crate) struct LeaseWorker {
    request: LeaseRequest,
    store: Arc<LeaseStore>,
    transport: Arc<dyn Transport>,
}

impl LeaseWorker {
    pub(crate) fn new(
        request: LeaseRequest,
        store: Arc<LeaseStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            request,
            store,
            transport,
        }
    }

    pub(crate) async fn run(self) -> Result<LeaseResponse> {
        let LeaseRequest {
            token,
            requester,
            reply_port,
            issued_at,
            ..
        } = self.request;
        let deadline = self.store.clock().now().saturating_add(self.store.ttl());

        let reply = ChannelId::reply(reply_port);
        self.transport.resolve(&reply).await?;

        let store = self.store.clone();
        let acquisition = tokio::task::spawn_blocking(move || {
            store.try_acquire(token, requester, issued_at)
        })
        .await
        .map_err(|source| LeaseError::TaskJoin {
            operation: "store transaction",
            source,
        })??;

        let response = LeaseResponse::new(acquisition.into(), token, requester);
        tracing::info!(
            token,
            requester,
            response = %response.kind,
            "responding to TOKEN request"
        );

        let remaining = deadline.saturating_sub(self.store.clock().now()).max(0);
        let wait = Duration::from_secs(remaining as u64);
        match self
            .transport
            .send_timeout(&reply, response.encode(), wait)
            .await?
        {
            Delivery::Delivered => {
                tracing::debug!(token, requester, "response delivered");
            }
            Delivery::TimedOut => {
                tracing::warn!(
                    token,
                    requester,
                    channel = %reply,
                    "response delivery timed out"
                );
            }
        }

        Ok(response)
    }
}
