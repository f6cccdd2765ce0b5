use crate::db::store::now_unix;
use crate::db::{Database, DbError, UnitOfWork};
use sqlx::Row;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOrder {
    Lowest,
    Highest,
}

const CLAIM_LOWEST: &str = "
    INSERT INTO block_claims (block_number, claimed_by, claimed_at, expires_at)
    SELECT b.number, ?1, ?2, ?3 FROM blocks b
    WHERE b.processed_at IS NULL
      AND NOT EXISTS (
          SELECT 1 FROM block_claims c WHERE c.block_number = b.number AND c.expires_at > ?2
      )
    ORDER BY b.number ASC
    LIMIT 1
    ON CONFLICT(block_number) DO UPDATE SET
        claimed_by = excluded.claimed_by,
        claimed_at = excluded.claimed_at,
        expires_at = excluded.expires_at
    WHERE block_claims.expires_at <= excluded.claimed_at
    RETURNING block_number";

const CLAIM_HIGHEST: &str = "
    INSERT INTO block_claims (block_number, claimed_by, claimed_at, expires_at)
    SELECT b.number, ?1, ?2, ?3 FROM blocks b
    WHERE b.processed_at IS NULL
      AND NOT EXISTS (
          SELECT 1 FROM block_claims c WHERE c.block_number = b.number AND c.expires_at > ?2
      )
    ORDER BY b.number DESC
    LIMIT 1
    ON CONFLICT(block_number) DO UPDATE SET
        claimed_by = excluded.claimed_by,
        claimed_at = excluded.claimed_at,
        expires_at = excluded.expires_at
    WHERE block_claims.expires_at <= excluded.claimed_at
    RETURNING block_number";

/// Picks and writes the claim in one statement. Expired claims are taken over.
pub async fn claim_next(
    db: &Database,
    order: ClaimOrder,
    claimant: &str,
    lease: Duration,
) -> Result<Option<u64>, DbError> {
    let now = now_unix();
    let sql = match order {
        ClaimOrder::Lowest => CLAIM_LOWEST,
        ClaimOrder::Highest => CLAIM_HIGHEST,
    };
    let row = db
        .fetch_optional(
            sql,
            &[
                claimant.into(),
                now.into(),
                (now + lease.as_secs() as i64).into(),
            ],
        )
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get::<i64, _>("block_number")? as u64)),
        None => Ok(None),
    }
}

/// A claim another processor has since taken over is left in place.
pub async fn complete_claim(
    uow: &mut UnitOfWork,
    number: u64,
    claimant: &str,
) -> Result<(), DbError> {
    uow.execute(
        "DELETE FROM block_claims WHERE block_number = ? AND claimed_by = ?",
        &[number.into(), claimant.into()],
    )
    .await?;
    Ok(())
}

pub async fn defer_claim(
    db: &Database,
    number: u64,
    claimant: &str,
    retry_after: Duration,
) -> Result<(), DbError> {
    db.execute(
        "UPDATE block_claims SET expires_at = ? WHERE block_number = ? AND claimed_by = ?",
        &[
            (now_unix() + retry_after.as_secs() as i64).into(),
            number.into(),
            claimant.into(),
        ],
    )
    .await?;
    Ok(())
}
