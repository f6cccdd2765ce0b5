pub mod api;
pub mod blockchain;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod models;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use api::route::create_router;
pub use blockchain::pipeline::Pipeline;
pub use config::Config;
pub use db::connection;
pub use db::Database;
pub use error::IndexerError;
pub use health::HealthRegistry;
