pub mod backfill;
pub mod client;
pub mod gateway;
pub mod listener;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod worker_pool;

// Re-exports for convenience
pub use client::{ChainEndpoint, ClientError, JsonRpcClient};
pub use gateway::{ConcurrencyGates, Lane, RpcGateway};
pub use pipeline::Pipeline;
