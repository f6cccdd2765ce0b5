use crate::db::{Database, DbError, UnitOfWork};
use crate::models::{hex_string, ContractInteraction, NewInteraction};
use sqlx::{QueryBuilder, Sqlite};

const ROWS_PER_STATEMENT: usize = 1000;

/// Bulk insert; a transaction hash that is already recorded is left untouched.
pub async fn insert_interactions(
    uow: &mut UnitOfWork,
    interactions: &[NewInteraction],
) -> Result<u64, DbError> {
    let mut inserted = 0;

    for chunk in interactions.chunks(ROWS_PER_STATEMENT) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO contract_interactions (contract_address, block_number, transaction_hash, \
             from_address, gas_used, gas_price, total_fee, interaction_timestamp) ",
        );
        builder.push_values(chunk, |mut row, interaction| {
            row.push_bind(hex_string(&interaction.contract_address))
                .push_bind(interaction.block_number as i64)
                .push_bind(hex_string(&interaction.transaction_hash))
                .push_bind(hex_string(&interaction.from_address))
                .push_bind(interaction.gas_used as i64)
                .push_bind(interaction.gas_price.to_string())
                .push_bind(interaction.total_fee.to_string())
                .push_bind(interaction.timestamp as i64);
        });
        builder.push(" ON CONFLICT(transaction_hash) DO NOTHING");

        inserted += builder
            .build()
            .execute(uow.connection())
            .await?
            .rows_affected();
    }

    Ok(inserted)
}

pub async fn interactions_for_block(
    db: &Database,
    block_number: u64,
) -> Result<Vec<ContractInteraction>, DbError> {
    db.fetch_all_as(
        "SELECT id, contract_address, block_number, transaction_hash, from_address,
                gas_used, gas_price, total_fee, interaction_timestamp
         FROM contract_interactions WHERE block_number = ? ORDER BY id",
        &[block_number.into()],
    )
    .await
}
