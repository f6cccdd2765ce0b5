use crate::blockchain::client::{ChainEndpoint, ClientError, HeadSubscription};
use crate::blockchain::models::{BlockTag, RpcBlock, RpcReceipt};
use crate::config::Config;
use alloy_primitives::B256;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Historical,
    Live,
}

/// Separate FIFO gates per lane; the optional rate limit covers both.
#[derive(Clone)]
pub struct ConcurrencyGates {
    historical: Arc<Semaphore>,
    live: Arc<Semaphore>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl ConcurrencyGates {
    pub fn new(historical: usize, live: usize, rate_limit: Option<u32>) -> Self {
        let rate_limiter = rate_limit
            .and_then(NonZeroU32::new)
            .map(|per_second| Arc::new(RateLimiter::direct(Quota::per_second(per_second))));

        Self {
            historical: Arc::new(Semaphore::new(historical.max(1))),
            live: Arc::new(Semaphore::new(live.max(1))),
            rate_limiter,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.historical_rpc_concurrency,
            config.live_rpc_concurrency,
            config.rpc_rate_limit,
        )
    }

    fn gate(&self, lane: Lane) -> &Arc<Semaphore> {
        match lane {
            Lane::Historical => &self.historical,
            Lane::Live => &self.live,
        }
    }

    /// `None` only if the gate was closed; the call then runs ungated.
    pub async fn admit(&self, lane: Lane) -> Option<OwnedSemaphorePermit> {
        let permit = self.gate(lane).clone().acquire_owned().await.ok();
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
        permit
    }

    pub fn available(&self, lane: Lane) -> usize {
        self.gate(lane).available_permits()
    }
}

#[derive(Clone)]
pub struct RpcGateway {
    endpoint: Arc<dyn ChainEndpoint>,
    gates: ConcurrencyGates,
}

impl RpcGateway {
    pub fn new(endpoint: Arc<dyn ChainEndpoint>, gates: ConcurrencyGates) -> Self {
        Self { endpoint, gates }
    }

    async fn admit<T, F, Fut>(&self, lane: Lane, call: F) -> Result<T, ClientError>
    where
        F: FnOnce(Arc<dyn ChainEndpoint>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let _permit = self.gates.admit(lane).await;
        call(self.endpoint.clone()).await
    }

    pub async fn get_block(
        &self,
        lane: Lane,
        tag: BlockTag,
        include_bodies: bool,
    ) -> Result<RpcBlock, ClientError> {
        self.admit(lane, |endpoint| async move {
            endpoint.get_block(tag, include_bodies).await
        })
        .await
    }

    pub async fn get_receipt(&self, lane: Lane, hash: B256) -> Result<RpcReceipt, ClientError> {
        self.admit(lane, |endpoint| async move {
            endpoint.get_transaction_receipt(hash).await
        })
        .await
    }

    pub async fn get_block_receipts(
        &self,
        lane: Lane,
        tag: BlockTag,
    ) -> Result<Vec<RpcReceipt>, ClientError> {
        self.admit(lane, |endpoint| async move {
            endpoint.get_block_receipts(tag).await
        })
        .await
    }

    /// Head polls behind the subscription are gated by the endpoint itself.
    pub async fn subscribe_new_heads(&self) -> Result<HeadSubscription, ClientError> {
        self.admit(Lane::Live, |endpoint| async move {
            endpoint.subscribe_new_heads().await
        })
        .await
    }

    pub async fn chain_head(&self, lane: Lane) -> Result<u64, ClientError> {
        Ok(self.get_block(lane, BlockTag::Latest, false).await?.number)
    }
}
