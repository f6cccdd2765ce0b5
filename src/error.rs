use crate::blockchain::client::ClientError;
use crate::db::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Client(#[from] ClientError),

    #[error("Storage error: {0}")]
    Database(#[from] DbError),

    #[error("Block {0} returned no receipts")]
    EmptyReceipts(u64),

    #[error("Block {number} lists {expected} transactions but {actual} receipts were returned")]
    ReceiptCountMismatch {
        number: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Receipts for block {0} belong to a different block hash")]
    BlockHashMismatch(u64),

    #[error("Worker pool is closed")]
    WorkerPoolClosed,
}

impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(DbError::from(err))
    }
}
