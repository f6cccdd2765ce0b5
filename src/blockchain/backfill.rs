
use crate::blockchain::gateway::{Lane, RpcGateway};
use crate::blockchain::models::BlockTag;
use crate::config::Config;
use crate::db::{block, Database, DbError};
use crate::error::IndexerError;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub batch_size: u64,
    pub batch_delay: Duration,
    pub rescan_interval: Duration,
    pub start_block: u64,
}

impl BackfillConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.backfill_batch_size,
            batch_delay: config.backfill_batch_delay,
            rescan_interval: config.backfill_rescan_interval,
            start_block: config.start_block,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub head: u64,
    pub gap_start: Option<u64>,
    pub inserted: u64,
    pub already_present: u64,
    pub failed: u64,
}

enum FetchOutcome {
    Inserted,
    AlreadyPresent,
    Failed,
}

pub struct BackfillScheduler {
    gateway: RpcGateway,
    db: Database,
    config: BackfillConfig,
}

impl BackfillScheduler {
    pub fn new(gateway: RpcGateway, db: Database, config: BackfillConfig) -> Self {
        Self {
            gateway,
            db,
            config,
        }
    }

    pub async fn find_gap(&self, head: u64) -> Result<Option<u64>, DbError> {
        block::find_gap_start(&self.db, self.config.start_block, head).await
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), IndexerError> {
        info!("Starting backfill scheduler from block {}", self.config.start_block);

        while !shutdown.is_cancelled() {
            match self.run_once(&shutdown).await {
                Ok(report) => info!(
                    "Backfill pass up to head {}: {} inserted, {} already present, {} failed",
                    report.head, report.inserted, report.already_present, report.failed
                ),
                Err(IndexerError::Client(e)) => warn!("Backfill pass skipped: {}", e),
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.rescan_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Stopping backfill scheduler");
        Ok(())
    }

    /// Blocks that fail to fetch stay missing and show up as the next gap.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Result<BackfillReport, IndexerError> {
        let head = self.gateway.chain_head(Lane::Historical).await?;
        let mut report = BackfillReport {
            head,
            ..Default::default()
        };

        let Some(gap) = self.find_gap(head).await? else {
            debug!("No gaps up to head {}", head);
            return Ok(report);
        };
        report.gap_start = Some(gap);
        info!("Backfilling blocks {} to {}", gap, head);

        let batch_size = self.config.batch_size.max(1);
        let mut start = gap;

        while start <= head && !shutdown.is_cancelled() {
            let end = start.saturating_add(batch_size - 1).min(head);

            let stored: HashSet<u64> = block::existing_numbers(&self.db, start, end)
                .await?
                .into_iter()
                .collect();
            let missing: Vec<u64> = (start..=end).filter(|n| !stored.contains(n)).collect();
            report.already_present += (end - start + 1) - missing.len() as u64;

            let outcomes = join_all(missing.iter().map(|&number| self.fetch_block(number))).await;
            for outcome in outcomes {
                match outcome? {
                    FetchOutcome::Inserted => report.inserted += 1,
                    FetchOutcome::AlreadyPresent => report.already_present += 1,
                    FetchOutcome::Failed => report.failed += 1,
                }
            }
            debug!("Completed backfill batch {}..={}", start, end);

            start = end + 1;
            if start <= head {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.batch_delay) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        Ok(report)
    }

    async fn fetch_block(&self, number: u64) -> Result<FetchOutcome, IndexerError> {
        let header = match self
            .gateway
            .get_block(Lane::Historical, BlockTag::Number(number), true)
            .await
        {
            Ok(header) => header,
            Err(e) if e.is_not_found() => {
                warn!(block = number, "Block not found during backfill");
                return Ok(FetchOutcome::Failed);
            }
            Err(e) => {
                error!(block = number, "Error fetching block: {}", e);
                return Ok(FetchOutcome::Failed);
            }
        };

        if block::insert_block_if_absent(&self.db, &header.bare_row()).await? {
            Ok(FetchOutcome::Inserted)
        } else {
            Ok(FetchOutcome::AlreadyPresent)
        }
    }
}
