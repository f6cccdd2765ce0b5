//! Shared fixtures: a scripted in-memory chain and throwaway SQLite stores.

use crate::blockchain::client::{ChainEndpoint, ClientError, HeadSubscription};
use crate::blockchain::gateway::{ConcurrencyGates, RpcGateway};
use crate::blockchain::models::{BlockTag, BlockTransaction, RpcBlock, RpcReceipt};
use crate::config::Config;
use crate::db::{connection, Database, RetryPolicy};
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const GENESIS_TIMESTAMP: u64 = 1_686_789_347;

pub fn test_config() -> Config {
    Config {
        live_workers: 2,
        backfill_batch_delay: Duration::from_millis(1),
        backfill_rescan_interval: Duration::from_millis(50),
        processor_idle_delay: Duration::from_millis(10),
        processor_block_delay: Duration::from_millis(1),
        head_poll_interval: Duration::from_millis(10),
        ..Config::default()
    }
}

/// Fresh file-backed store; keep the `TempDir` alive for the test's duration.
pub async fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = Config {
        database_url: format!("sqlite://{}", dir.path().join("indexer.db").display()),
        ..test_config()
    };
    let pool = connection::establish_connection(&config)
        .await
        .expect("Failed to connect to database");
    let db = Database::new(pool).with_retry_policy(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
    });
    (dir, db)
}

pub fn gateway(chain: &Arc<MockChain>) -> RpcGateway {
    RpcGateway::new(chain.clone(), ConcurrencyGates::new(50, 500, None))
}

pub async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .expect("count query")
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

pub fn block_hash(number: u64) -> B256 {
    B256::left_padding_from(&(number + 1).to_be_bytes())
}

pub fn tx_hash(number: u64, index: u64) -> B256 {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&(number + 1).to_be_bytes());
    bytes[8..].copy_from_slice(&(index + 1).to_be_bytes());
    B256::left_padding_from(&bytes)
}

pub fn header(number: u64, tx_count: u64) -> RpcBlock {
    RpcBlock {
        number,
        hash: block_hash(number),
        parent_hash: if number == 0 {
            B256::ZERO
        } else {
            block_hash(number - 1)
        },
        timestamp: GENESIS_TIMESTAMP + number * 2,
        transactions: (0..tx_count)
            .map(|index| BlockTransaction::Hash(tx_hash(number, index)))
            .collect(),
    }
}

/// One scripted transaction outcome.
#[derive(Debug, Clone)]
pub struct Tx {
    pub from: Address,
    pub to: Option<Address>,
    pub created: Option<Address>,
    pub gas_used: u64,
    pub gas_price: U256,
}

pub fn call(from: Address, to: Address, gas_used: u64, gas_price: u64) -> Tx {
    Tx {
        from,
        to: Some(to),
        created: None,
        gas_used,
        gas_price: U256::from(gas_price),
    }
}

pub fn deploy(from: Address, created: Address) -> Tx {
    Tx {
        from,
        to: None,
        created: Some(created),
        gas_used: 120_000,
        gas_price: U256::from(1_000_000_000u64),
    }
}

pub fn receipts(number: u64, txs: &[Tx]) -> Vec<RpcReceipt> {
    txs.iter()
        .enumerate()
        .map(|(index, tx)| RpcReceipt {
            transaction_hash: tx_hash(number, index as u64),
            transaction_index: index as u64,
            block_hash: block_hash(number),
            block_number: number,
            from: tx.from,
            to: tx.to,
            contract_address: tx.created,
            gas_used: tx.gas_used,
            effective_gas_price: Some(tx.gas_price),
            status: Some(1),
        })
        .collect()
}

#[derive(Default)]
struct ChainState {
    head: u64,
    blocks: HashMap<u64, RpcBlock>,
    receipts: HashMap<u64, Vec<RpcReceipt>>,
    failing: HashSet<u64>,
}

/// In-memory `ChainEndpoint` driven entirely by the test.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
    heads: Mutex<Option<mpsc::Sender<u64>>>,
    call_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub block_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call takes `delay`, so overlapping calls can be observed.
    pub fn with_call_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            call_delay: delay,
            ..Self::default()
        })
    }

    /// Add a block with the given transactions and raise the head to it.
    pub fn add_block(&self, number: u64, txs: &[Tx]) {
        let mut state = self.state.lock().expect("mock state");
        state.blocks.insert(number, header(number, txs.len() as u64));
        state.receipts.insert(number, receipts(number, txs));
        state.head = state.head.max(number);
    }

    /// Block whose header lists transactions but whose receipts come back empty.
    pub fn add_block_without_receipts(&self, number: u64, tx_count: u64) {
        let mut state = self.state.lock().expect("mock state");
        state.blocks.insert(number, header(number, tx_count));
        state.receipts.insert(number, Vec::new());
        state.head = state.head.max(number);
    }

    /// Lose the last receipt of a block so its count no longer matches.
    pub fn drop_last_receipt(&self, number: u64) {
        let mut state = self.state.lock().expect("mock state");
        if let Some(receipts) = state.receipts.get_mut(&number) {
            receipts.pop();
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().expect("mock state").head = head;
    }

    pub fn fail_block(&self, number: u64) {
        self.state.lock().expect("mock state").failing.insert(number);
    }

    pub fn recover_block(&self, number: u64) {
        self.state.lock().expect("mock state").failing.remove(&number);
    }

    /// Push a head notification once a subscriber is registered.
    pub async fn announce(&self, number: u64) {
        let mut sender = None;
        wait_until("a head subscriber", || {
            sender = self.heads.lock().expect("mock heads").clone();
            let subscribed = sender.is_some();
            async move { subscribed }
        })
        .await;
        if let Some(sender) = sender {
            sender.send(number).await.expect("head subscriber alive");
        }
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        guard
    }

    fn unavailable(number: u64) -> ClientError {
        ClientError::Rpc {
            code: -32000,
            message: format!("block {} unavailable", number),
        }
    }
}

#[async_trait]
impl ChainEndpoint for MockChain {
    async fn get_block(&self, tag: BlockTag, _include_bodies: bool) -> Result<RpcBlock, ClientError> {
        let _guard = self.enter().await;
        self.block_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().expect("mock state");
        let number = match tag {
            BlockTag::Number(number) => number,
            BlockTag::Latest => state.head,
        };
        if state.failing.contains(&number) {
            return Err(Self::unavailable(number));
        }
        match state.blocks.get(&number) {
            Some(block) => Ok(block.clone()),
            None if tag == BlockTag::Latest => Ok(header(number, 0)),
            None => Err(ClientError::NotFound(format!("block {}", tag))),
        }
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, ClientError> {
        let _guard = self.enter().await;
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().expect("mock state");
        state
            .receipts
            .values()
            .flatten()
            .find(|receipt| receipt.transaction_hash == hash)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("receipt {:#x}", hash)))
    }

    async fn get_block_receipts(&self, tag: BlockTag) -> Result<Vec<RpcReceipt>, ClientError> {
        let _guard = self.enter().await;
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().expect("mock state");
        let number = match tag {
            BlockTag::Number(number) => number,
            BlockTag::Latest => state.head,
        };
        if state.failing.contains(&number) {
            return Err(Self::unavailable(number));
        }
        state
            .receipts
            .get(&number)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("receipts for block {}", tag)))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadSubscription, ClientError> {
        let (sender, receiver) = mpsc::channel(64);
        *self.heads.lock().expect("mock heads") = Some(sender);
        Ok(HeadSubscription::new(receiver, CancellationToken::new()))
    }
}
