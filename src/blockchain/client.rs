use crate::blockchain::gateway::{ConcurrencyGates, Lane};
use crate::blockchain::models::{BlockTag, RpcBlock, RpcReceipt};
use alloy_primitives::B256;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heads further behind than this on a single poll are left to the backfill.
const MAX_HEAD_CATCHUP: u64 = 64;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to decode {method} response: {source}")]
    Decode {
        method: &'static str,
        source: serde_json::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Head subscription closed")]
    SubscriptionClosed,
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Stream of new head block numbers. Dropping it unsubscribes.
#[derive(Debug)]
pub struct HeadSubscription {
    receiver: mpsc::Receiver<u64>,
    stop: CancellationToken,
}

impl HeadSubscription {
    pub fn new(receiver: mpsc::Receiver<u64>, stop: CancellationToken) -> Self {
        Self { receiver, stop }
    }

    pub async fn next(&mut self) -> Option<u64> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(&mut self) {
        self.stop.cancel();
        self.receiver.close();
    }
}

impl Drop for HeadSubscription {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    async fn get_block(&self, tag: BlockTag, include_bodies: bool) -> Result<RpcBlock, ClientError>;

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, ClientError>;

    async fn get_block_receipts(&self, tag: BlockTag) -> Result<Vec<RpcReceipt>, ClientError>;

    async fn subscribe_new_heads(&self) -> Result<HeadSubscription, ClientError>;
}

/// JSON-RPC 2.0 client over HTTP.
#[derive(Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    head_poll_interval: Duration,
    head_gates: Option<ConcurrencyGates>,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration, head_poll_interval: Duration) -> Result<Self, ClientError> {
        info!("Initializing JSON-RPC client with endpoint: {}", url);

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: url.to_string(),
            head_poll_interval,
            head_gates: None,
        })
    }

    /// Head polls wait on the live lane and the shared rate limit.
    pub fn with_head_gates(mut self, gates: ConcurrencyGates) -> Self {
        self.head_gates = Some(gates);
        self
    }

    async fn poll_head(&self) -> Result<u64, ClientError> {
        let _permit = match &self.head_gates {
            Some(gates) => gates.admit(Lane::Live).await,
            None => None,
        };
        self.block_number().await
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, ClientError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(ClientError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
        what: impl FnOnce() -> String,
    ) -> Result<T, ClientError> {
        let result = self.call(method, params).await?;
        if result.is_null() {
            return Err(ClientError::NotFound(what()));
        }
        serde_json::from_value(result).map_err(|source| ClientError::Decode { method, source })
    }

    pub async fn block_number(&self) -> Result<u64, ClientError> {
        let raw: String = self
            .call_typed("eth_blockNumber", json!([]), || "head".to_string())
            .await?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        u64::from_str_radix(digits, 16).map_err(|_| ClientError::Rpc {
            code: 0,
            message: format!("malformed block number {:?}", raw),
        })
    }
}

#[async_trait]
impl ChainEndpoint for JsonRpcClient {
    async fn get_block(&self, tag: BlockTag, include_bodies: bool) -> Result<RpcBlock, ClientError> {
        self.call_typed(
            "eth_getBlockByNumber",
            json!([tag.to_param(), include_bodies]),
            || format!("block {}", tag),
        )
        .await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, ClientError> {
        self.call_typed(
            "eth_getTransactionReceipt",
            json!([format!("0x{:x}", hash)]),
            || format!("receipt 0x{:x}", hash),
        )
        .await
    }

    async fn get_block_receipts(&self, tag: BlockTag) -> Result<Vec<RpcReceipt>, ClientError> {
        self.call_typed(
            "eth_getBlockReceipts",
            json!([tag.to_param()]),
            || format!("receipts for block {}", tag),
        )
        .await
    }

    async fn subscribe_new_heads(&self) -> Result<HeadSubscription, ClientError> {
        let mut last = self.block_number().await?;
        let (sender, receiver) = mpsc::channel(MAX_HEAD_CATCHUP as usize);
        let stop = CancellationToken::new();

        let client = self.clone();
        let poller_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.head_poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = poller_stop.cancelled() => break,
                }

                let head = match client.poll_head().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!("Failed to poll head block number: {}", e);
                        continue;
                    }
                };
                if head <= last {
                    continue;
                }

                let from = (last + 1).max(head.saturating_sub(MAX_HEAD_CATCHUP - 1));
                for number in from..=head {
                    if sender.send(number).await.is_err() {
                        debug!("Head subscriber dropped, stopping poller");
                        return;
                    }
                }
                last = head;
            }
            debug!("Head poller stopped");
        });

        Ok(HeadSubscription::new(receiver, stop))
    }
}
