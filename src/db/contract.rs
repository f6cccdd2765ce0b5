use crate::db::{Database, DbError, UnitOfWork};
use crate::models::{hex_string, Contract, NewContract};
use alloy_primitives::Address;
use sqlx::{QueryBuilder, Sqlite};

// 7 binds per row keeps each statement well under SQLite's parameter limit.
const ROWS_PER_STATEMENT: usize = 1000;

// Deployment columns only ever get filled in; is_pending only goes true -> false.
const ON_CONFLICT_FILL_IN: &str = "
    ON CONFLICT(address) DO UPDATE SET
        block_number = COALESCE(excluded.block_number, contracts.block_number),
        transaction_hash = COALESCE(excluded.transaction_hash, contracts.transaction_hash),
        deployer_address = COALESCE(excluded.deployer_address, contracts.deployer_address),
        deployment_timestamp = COALESCE(excluded.deployment_timestamp, contracts.deployment_timestamp),
        first_seen_at = MIN(contracts.first_seen_at, excluded.first_seen_at),
        is_pending = contracts.is_pending AND excluded.is_pending";

/// Bulk upsert of contract rows. Pending rows create the address if unseen;
/// deployment rows fill in the deployment fields and clear the pending flag.
pub async fn upsert_contracts(
    uow: &mut UnitOfWork,
    contracts: &[NewContract],
) -> Result<u64, DbError> {
    let mut affected = 0;

    for chunk in contracts.chunks(ROWS_PER_STATEMENT) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO contracts (address, block_number, transaction_hash, deployer_address, \
             deployment_timestamp, first_seen_at, is_pending) ",
        );
        builder.push_values(chunk, |mut row, contract| {
            let deployment = contract.deployment.as_ref();
            row.push_bind(hex_string(&contract.address))
                .push_bind(deployment.map(|d| d.block_number as i64))
                .push_bind(deployment.map(|d| hex_string(&d.transaction_hash)))
                .push_bind(deployment.map(|d| hex_string(&d.deployer)))
                .push_bind(deployment.map(|d| d.timestamp as i64))
                .push_bind(contract.first_seen_at as i64)
                .push_bind(contract.is_pending());
        });
        builder.push(ON_CONFLICT_FILL_IN);

        affected += builder
            .build()
            .execute(uow.connection())
            .await?
            .rows_affected();
    }

    Ok(affected)
}

pub async fn get_contract(db: &Database, address: &Address) -> Result<Option<Contract>, DbError> {
    let mut rows: Vec<Contract> = db
        .fetch_all_as(
            "SELECT address, block_number, transaction_hash, deployer_address,
                    deployment_timestamp, first_seen_at, is_pending
             FROM contracts WHERE address = ?",
            &[hex_string(address).into()],
        )
        .await?;
    Ok(rows.pop())
}

pub async fn list_contracts(db: &Database) -> Result<Vec<Contract>, DbError> {
    db.fetch_all_as(
        "SELECT address, block_number, transaction_hash, deployer_address,
                deployment_timestamp, first_seen_at, is_pending
         FROM contracts ORDER BY address",
        &[],
    )
    .await
}
