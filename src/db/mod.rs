pub mod block;
pub mod claim;
pub mod connection;
pub mod contract;
pub mod interaction;
pub mod store;

pub use store::{Database, RetryPolicy, SqlValue, UnitOfWork};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database still unavailable after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: usize, source: sqlx::Error },
}

pub const INIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    number INTEGER PRIMARY KEY,
    hash TEXT NOT NULL,
    parent_hash TEXT NOT NULL,
    block_timestamp INTEGER NOT NULL,
    transactions_count INTEGER NOT NULL DEFAULT 0,
    processed_at INTEGER
);

CREATE TABLE IF NOT EXISTS contracts (
    address TEXT PRIMARY KEY,
    block_number INTEGER REFERENCES blocks(number),
    transaction_hash TEXT,
    deployer_address TEXT,
    deployment_timestamp INTEGER,
    first_seen_at INTEGER NOT NULL,
    is_pending BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS contract_interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_address TEXT NOT NULL,
    block_number INTEGER NOT NULL REFERENCES blocks(number),
    transaction_hash TEXT NOT NULL UNIQUE,
    from_address TEXT NOT NULL,
    gas_used INTEGER NOT NULL,
    gas_price TEXT NOT NULL,
    total_fee TEXT NOT NULL,
    interaction_timestamp INTEGER NOT NULL
);

-- Processor reservations; a row lives only while a block is being worked on
CREATE TABLE IF NOT EXISTS block_claims (
    block_number INTEGER PRIMARY KEY,
    claimed_by TEXT NOT NULL,
    claimed_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_processed_at ON blocks(processed_at);
CREATE INDEX IF NOT EXISTS idx_blocks_block_timestamp ON blocks(block_timestamp);
CREATE INDEX IF NOT EXISTS idx_contracts_block_number ON contracts(block_number);
CREATE INDEX IF NOT EXISTS idx_contracts_deployer ON contracts(deployer_address);
CREATE INDEX IF NOT EXISTS idx_contracts_pending ON contracts(is_pending);
CREATE INDEX IF NOT EXISTS idx_contract_interactions_contract ON contract_interactions(contract_address);
CREATE INDEX IF NOT EXISTS idx_contract_interactions_block ON contract_interactions(block_number);
CREATE INDEX IF NOT EXISTS idx_contract_interactions_from ON contract_interactions(from_address);
CREATE INDEX IF NOT EXISTS idx_contract_interactions_timestamp ON contract_interactions(interaction_timestamp);
"#;
