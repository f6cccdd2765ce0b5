use crate::blockchain::gateway::{Lane, RpcGateway};
use crate::blockchain::models::{extract_records, BlockTag};
use crate::blockchain::worker_pool::WorkerPool;
use crate::config::Config;
use crate::db::claim::{self, ClaimOrder};
use crate::db::store::now_unix;
use crate::db::{block, contract, interaction, Database, DbError, UnitOfWork};
use crate::error::IndexerError;
use crate::models::{DerivedRecords, NewBlock, NewContract};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Historical,
    /// Highest block first, receipts derived on the worker pool.
    Live,
}

impl ProcessingMode {
    pub fn lane(self) -> Lane {
        match self {
            Self::Historical => Lane::Historical,
            Self::Live => Lane::Live,
        }
    }

    pub fn claim_order(self) -> ClaimOrder {
        match self {
            Self::Historical => ClaimOrder::Lowest,
            Self::Live => ClaimOrder::Highest,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub live_batch_size: usize,
    pub live_workers: usize,
    pub idle_delay: Duration,
    pub block_delay: Duration,
    pub claim_lease: Duration,
    pub claim_retry_delay: Duration,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            live_batch_size: config.live_batch_size,
            live_workers: config.live_workers,
            idle_delay: config.processor_idle_delay,
            block_delay: config.processor_block_delay,
            claim_lease: config.claim_lease,
            claim_retry_delay: config.claim_retry_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub transactions: u64,
    pub contracts: usize,
    pub interactions: usize,
}

pub struct BlockProcessor {
    mode: ProcessingMode,
    gateway: RpcGateway,
    db: Database,
    workers: Option<WorkerPool>,
    config: ProcessorConfig,
    claimant: String,
}

impl BlockProcessor {
    pub fn new(
        mode: ProcessingMode,
        gateway: RpcGateway,
        db: Database,
        config: ProcessorConfig,
    ) -> Self {
        let workers = match mode {
            ProcessingMode::Live => Some(WorkerPool::new(config.live_workers)),
            ProcessingMode::Historical => None,
        };
        let claimant = format!("{}-{}", mode.name(), std::process::id());

        Self {
            mode,
            gateway,
            db,
            workers,
            config,
            claimant,
        }
    }

    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    /// A block in progress is always finished before the loop stops. The
    /// worker pool is shut down once it has.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), IndexerError> {
        info!("Starting {} block processor as {}", self.mode.name(), self.claimant);

        while !shutdown.is_cancelled() {
            let delay = match self.process_next().await? {
                Some(_) => self.config.block_delay,
                None => {
                    debug!("{} processor: no blocks to process", self.mode.name());
                    self.config.idle_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Stopping {} block processor", self.mode.name());
        if let Some(pool) = &self.workers {
            pool.shutdown().await;
        }
        Ok(())
    }

    /// A block that fails is logged and kept reserved for the retry cooldown.
    /// Only storage failures outside the block's unit of work are returned.
    pub async fn process_next(&self) -> Result<Option<u64>, IndexerError> {
        let claimed = claim::claim_next(
            &self.db,
            self.mode.claim_order(),
            &self.claimant,
            self.config.claim_lease,
        )
        .await?;

        let Some(number) = claimed else {
            return Ok(None);
        };

        let started = Instant::now();
        match self.process_block(number).await {
            Ok(summary) => {
                let elapsed = started.elapsed();
                match self.mode {
                    ProcessingMode::Live => info!(
                        block = number,
                        "Processed {} transactions ({} contracts, {} interactions) in {:?}",
                        summary.transactions,
                        summary.contracts,
                        summary.interactions,
                        elapsed
                    ),
                    ProcessingMode::Historical => debug!(
                        block = number,
                        "Processed {} transactions in {:?}", summary.transactions, elapsed
                    ),
                }
            }
            Err(e) => {
                match &e {
                    IndexerError::Client(client) if client.is_not_found() => {
                        warn!(block = number, "Block not available yet: {}", e)
                    }
                    IndexerError::EmptyReceipts(_) => warn!(block = number, "{}", e),
                    _ => error!(block = number, "Failed to process block: {}", e),
                }
                claim::defer_claim(
                    &self.db,
                    number,
                    &self.claimant,
                    self.config.claim_retry_delay,
                )
                .await?;
            }
        }

        Ok(Some(number))
    }

    pub async fn process_block(&self, number: u64) -> Result<BlockSummary, IndexerError> {
        let lane = self.mode.lane();
        let tag = BlockTag::Number(number);

        // Genesis carries no ordinary transactions on this chain.
        if number == 0 {
            let header = self.gateway.get_block(lane, tag, false).await?;
            return self
                .persist(&header.full_row(), &DerivedRecords::default())
                .await;
        }

        let (header, receipts) = tokio::try_join!(
            self.gateway.get_block(lane, tag, false),
            self.gateway.get_block_receipts(lane, tag),
        )?;

        if receipts.is_empty() {
            return Err(IndexerError::EmptyReceipts(number));
        }
        if receipts.len() != header.transactions.len() {
            return Err(IndexerError::ReceiptCountMismatch {
                number,
                expected: header.transactions.len(),
                actual: receipts.len(),
            });
        }
        if receipts.iter().any(|receipt| receipt.block_hash != header.hash) {
            return Err(IndexerError::BlockHashMismatch(number));
        }

        let context = header.context();
        let records = match &self.workers {
            Some(pool) => {
                pool.derive(context, receipts, self.config.live_batch_size)
                    .await?
            }
            None => extract_records(&context, &receipts),
        };

        self.persist(&header.full_row(), &records).await
    }

    async fn persist(
        &self,
        header: &NewBlock,
        records: &DerivedRecords,
    ) -> Result<BlockSummary, IndexerError> {
        let contracts = records.merged_contracts();
        let mut uow = self.db.begin().await?;

        if let Err(e) = write_block(&mut uow, header, &contracts, records, &self.claimant).await {
            if let Err(rollback) = uow.rollback().await {
                warn!(block = header.number, "Rollback failed: {}", rollback);
            }
            error!(block = header.number, "Rolled back block unit of work: {}", e);
            return Err(e.into());
        }
        uow.commit().await?;

        Ok(BlockSummary {
            number: header.number,
            transactions: header.transactions_count.unwrap_or(0),
            contracts: contracts.len(),
            interactions: records.interactions.len(),
        })
    }
}

async fn write_block(
    uow: &mut UnitOfWork,
    header: &NewBlock,
    contracts: &[NewContract],
    records: &DerivedRecords,
    claimant: &str,
) -> Result<(), DbError> {
    block::upsert_block(uow, header).await?;
    contract::upsert_contracts(uow, contracts).await?;
    interaction::insert_interactions(uow, &records.interactions).await?;
    block::mark_processed(uow, header.number, now_unix()).await?;
    claim::complete_claim(uow, header.number, claimant).await?;
    Ok(())
}
