use crate::db::{Database, DbError, SqlValue, UnitOfWork};
use crate::models::{hex_string, Block, NewBlock};
use serde::Serialize;
use sqlx::Row;

const INSERT_BARE_BLOCK: &str = "
    INSERT INTO blocks (number, hash, parent_hash, block_timestamp)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(number) DO NOTHING";

const INSERT_COUNTED_BLOCK: &str = "
    INSERT INTO blocks (number, hash, parent_hash, block_timestamp, transactions_count)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(number) DO NOTHING";

const UPSERT_BLOCK: &str = "
    INSERT INTO blocks (number, hash, parent_hash, block_timestamp, transactions_count)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(number) DO UPDATE SET
        hash = excluded.hash,
        parent_hash = excluded.parent_hash,
        block_timestamp = excluded.block_timestamp,
        transactions_count = excluded.transactions_count";

// Smallest number in [?1, ?2] without a row: either ?1 itself, or the first
// stored number whose successor is missing.
const FIND_GAP_START: &str = "
    SELECT CASE
        WHEN NOT EXISTS (SELECT 1 FROM blocks WHERE number = ?1) THEN ?1
        ELSE (
            SELECT MIN(b.number) + 1 FROM blocks b
            WHERE b.number >= ?1 AND b.number < ?2
              AND NOT EXISTS (SELECT 1 FROM blocks n WHERE n.number = b.number + 1)
        )
    END AS gap_start";

fn block_params(block: &NewBlock) -> Vec<SqlValue> {
    let mut params = vec![
        SqlValue::from(block.number),
        SqlValue::from(hex_string(&block.hash)),
        SqlValue::from(hex_string(&block.parent_hash)),
        SqlValue::from(block.timestamp),
    ];
    if let Some(count) = block.transactions_count {
        params.push(SqlValue::from(count));
    }
    params
}

/// Returns whether a row was written.
pub async fn insert_block_if_absent(db: &Database, block: &NewBlock) -> Result<bool, DbError> {
    let sql = match block.transactions_count {
        Some(_) => INSERT_COUNTED_BLOCK,
        None => INSERT_BARE_BLOCK,
    };
    let inserted = db.execute(sql, &block_params(block)).await?;
    Ok(inserted > 0)
}

pub async fn upsert_block(uow: &mut UnitOfWork, block: &NewBlock) -> Result<(), DbError> {
    let params = block_params(&NewBlock {
        transactions_count: Some(block.transactions_count.unwrap_or(0)),
        ..block.clone()
    });
    uow.execute(UPSERT_BLOCK, &params).await?;
    Ok(())
}

/// Set `processed_at` unless an earlier pass already did.
pub async fn mark_processed(
    uow: &mut UnitOfWork,
    number: u64,
    processed_at: i64,
) -> Result<u64, DbError> {
    uow.execute(
        "UPDATE blocks SET processed_at = COALESCE(processed_at, ?) WHERE number = ?",
        &[processed_at.into(), number.into()],
    )
    .await
}

/// First block number in `[lower, head]` with no stored row.
pub async fn find_gap_start(db: &Database, lower: u64, head: u64) -> Result<Option<u64>, DbError> {
    if lower > head {
        return Ok(None);
    }
    let row = db
        .fetch_optional(FIND_GAP_START, &[lower.into(), head.into()])
        .await?;
    let gap = match row {
        Some(row) => row.try_get::<Option<i64>, _>("gap_start")?,
        None => None,
    };
    Ok(gap.map(|g| g as u64).filter(|g| *g <= head))
}

pub async fn existing_numbers(db: &Database, from: u64, to: u64) -> Result<Vec<u64>, DbError> {
    let rows = db
        .fetch_all(
            "SELECT number FROM blocks WHERE number BETWEEN ? AND ? ORDER BY number",
            &[from.into(), to.into()],
        )
        .await?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("number").map(|n| n as u64))
        .collect::<Result<_, _>>()
        .map_err(DbError::from)
}

pub async fn get_block(db: &Database, number: u64) -> Result<Option<Block>, DbError> {
    let mut blocks: Vec<Block> = db
        .fetch_all_as(
            "SELECT number, hash, parent_hash, block_timestamp, transactions_count, processed_at
             FROM blocks WHERE number = ?",
            &[number.into()],
        )
        .await?;
    Ok(blocks.pop())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub blocks: i64,
    pub processed_blocks: i64,
    pub unprocessed_blocks: i64,
    pub highest_block: Option<i64>,
    pub lowest_unprocessed_block: Option<i64>,
    pub contracts: i64,
    pub pending_contracts: i64,
    pub interactions: i64,
}

pub async fn pipeline_stats(db: &Database) -> Result<PipelineStats, DbError> {
    let row = db
        .fetch_optional(
            "SELECT
                (SELECT COUNT(*) FROM blocks) AS blocks,
                (SELECT COUNT(*) FROM blocks WHERE processed_at IS NOT NULL) AS processed_blocks,
                (SELECT MAX(number) FROM blocks) AS highest_block,
                (SELECT MIN(number) FROM blocks WHERE processed_at IS NULL) AS lowest_unprocessed_block,
                (SELECT COUNT(*) FROM contracts) AS contracts,
                (SELECT COUNT(*) FROM contracts WHERE is_pending) AS pending_contracts,
                (SELECT COUNT(*) FROM contract_interactions) AS interactions",
            &[],
        )
        .await?;

    let Some(row) = row else {
        return Ok(PipelineStats::default());
    };

    let blocks: i64 = row.try_get("blocks")?;
    let processed_blocks: i64 = row.try_get("processed_blocks")?;
    Ok(PipelineStats {
        blocks,
        processed_blocks,
        unprocessed_blocks: blocks - processed_blocks,
        highest_block: row.try_get("highest_block")?,
        lowest_unprocessed_block: row.try_get("lowest_unprocessed_block")?,
        contracts: row.try_get("contracts")?,
        pending_contracts: row.try_get("pending_contracts")?,
        interactions: row.try_get("interactions")?,
    })
}
