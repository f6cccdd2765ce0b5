// Configuration for the indexer:
// - Store location and pool sizing
// - Chain endpoint URLs per role (listener, backfill, processor)
// - RPC concurrency gates and optional rate limit
// - Backfill and processor pacing
// - Health server address

use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub server_host: String,
    pub server_port: u16,
    pub listener_rpc_url: String,
    pub backfill_rpc_url: String,
    pub processor_rpc_url: String,
    pub rpc_timeout_secs: u64,
    pub rpc_rate_limit: Option<u32>,
    pub historical_rpc_concurrency: usize,
    pub live_rpc_concurrency: usize,
    pub head_poll_interval: Duration,
    pub backfill_batch_size: u64,
    pub backfill_batch_delay: Duration,
    pub backfill_rescan_interval: Duration,
    pub start_block: u64,
    pub live_batch_size: usize,
    pub live_workers: usize,
    pub processor_idle_delay: Duration,
    pub processor_block_delay: Duration,
    pub claim_lease: Duration,
    pub claim_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let rpc_url = "https://mainnet.base.org".to_string();
        Self {
            database_url: "sqlite://indexer.db".to_string(),
            db_max_connections: 20,
            db_acquire_timeout: Duration::from_secs(10),
            db_busy_timeout: Duration::from_secs(15),
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            listener_rpc_url: rpc_url.clone(),
            backfill_rpc_url: rpc_url.clone(),
            processor_rpc_url: rpc_url,
            rpc_timeout_secs: 30,
            rpc_rate_limit: None,
            historical_rpc_concurrency: 50,
            live_rpc_concurrency: 500,
            head_poll_interval: Duration::from_millis(1000),
            backfill_batch_size: 10,
            backfill_batch_delay: Duration::from_millis(2000),
            backfill_rescan_interval: Duration::from_secs(60),
            start_block: 0,
            live_batch_size: 2,
            live_workers: num_cpus::get(),
            processor_idle_delay: Duration::from_millis(1000),
            processor_block_delay: Duration::from_millis(100),
            claim_lease: Duration::from_secs(300),
            claim_retry_delay: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = Self::default();

        let rpc_url = env::var("BASE_RPC_URL").unwrap_or(defaults.listener_rpc_url);
        let role_url = |key: &str| env::var(key).unwrap_or_else(|_| rpc_url.clone());

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            db_acquire_timeout: secs_or("DB_ACQUIRE_TIMEOUT_SECS", defaults.db_acquire_timeout),
            db_busy_timeout: secs_or("DB_BUSY_TIMEOUT_SECS", defaults.db_busy_timeout),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
            listener_rpc_url: role_url("LISTENER_RPC_URL"),
            backfill_rpc_url: role_url("BACKFILL_RPC_URL"),
            processor_rpc_url: role_url("PROCESSOR_RPC_URL"),
            rpc_timeout_secs: parse_or("RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs),
            rpc_rate_limit: env::var("RPC_RATE_LIMIT").ok().and_then(|v| v.parse().ok()),
            historical_rpc_concurrency: parse_or(
                "HISTORICAL_RPC_CONCURRENCY",
                defaults.historical_rpc_concurrency,
            ),
            live_rpc_concurrency: parse_or("LIVE_RPC_CONCURRENCY", defaults.live_rpc_concurrency),
            head_poll_interval: millis_or("HEAD_POLL_INTERVAL_MS", defaults.head_poll_interval),
            backfill_batch_size: parse_or("BACKFILL_BATCH_SIZE", defaults.backfill_batch_size),
            backfill_batch_delay: millis_or("BACKFILL_BATCH_DELAY_MS", defaults.backfill_batch_delay),
            backfill_rescan_interval: secs_or("BACKFILL_RESCAN_SECS", defaults.backfill_rescan_interval),
            start_block: parse_or("START_BLOCK", defaults.start_block),
            live_batch_size: parse_or("LIVE_BATCH_SIZE", defaults.live_batch_size),
            live_workers: parse_or("LIVE_WORKERS", defaults.live_workers),
            processor_idle_delay: millis_or("PROCESSOR_IDLE_DELAY_MS", defaults.processor_idle_delay),
            processor_block_delay: millis_or(
                "PROCESSOR_BLOCK_DELAY_MS",
                defaults.processor_block_delay,
            ),
            claim_lease: secs_or("CLAIM_LEASE_SECS", defaults.claim_lease),
            claim_retry_delay: secs_or("CLAIM_RETRY_SECS", defaults.claim_retry_delay),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn millis_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
