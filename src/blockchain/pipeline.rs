use crate::blockchain::backfill::{BackfillConfig, BackfillScheduler};
use crate::blockchain::client::{ChainEndpoint, ClientError, JsonRpcClient};
use crate::blockchain::gateway::{ConcurrencyGates, RpcGateway};
use crate::blockchain::listener::HeadListener;
use crate::blockchain::processor::{BlockProcessor, ProcessingMode, ProcessorConfig};
use crate::config::Config;
use crate::db::Database;
use crate::health::HealthRegistry;
use crate::supervisor::supervise;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// The four ingestion loops, each with its own endpoint but sharing one set of
/// concurrency gates.
pub struct Pipeline {
    listener: Arc<HeadListener>,
    backfill: Arc<BackfillScheduler>,
    historical: Arc<BlockProcessor>,
    live: Arc<BlockProcessor>,
}

impl Pipeline {
    pub fn from_config(config: &Config, db: Database) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(config.rpc_timeout_secs);
        let gates = ConcurrencyGates::from_config(config);
        let connect = |url: &str| -> Result<Arc<dyn ChainEndpoint>, ClientError> {
            let client = JsonRpcClient::new(url, timeout, config.head_poll_interval)?
                .with_head_gates(gates.clone());
            let client: Arc<dyn ChainEndpoint> = Arc::new(client);
            Ok(client)
        };

        Ok(Self::with_endpoints(
            connect(&config.listener_rpc_url)?,
            connect(&config.backfill_rpc_url)?,
            connect(&config.processor_rpc_url)?,
            gates.clone(),
            db,
            config,
        ))
    }

    pub fn with_endpoints(
        listener_endpoint: Arc<dyn ChainEndpoint>,
        backfill_endpoint: Arc<dyn ChainEndpoint>,
        processor_endpoint: Arc<dyn ChainEndpoint>,
        gates: ConcurrencyGates,
        db: Database,
        config: &Config,
    ) -> Self {
        let processor_gateway = RpcGateway::new(processor_endpoint, gates.clone());
        let processor_config = ProcessorConfig::from_config(config);

        Self {
            listener: Arc::new(HeadListener::new(
                RpcGateway::new(listener_endpoint, gates.clone()),
                db.clone(),
            )),
            backfill: Arc::new(BackfillScheduler::new(
                RpcGateway::new(backfill_endpoint, gates),
                db.clone(),
                BackfillConfig::from_config(config),
            )),
            historical: Arc::new(BlockProcessor::new(
                ProcessingMode::Historical,
                processor_gateway.clone(),
                db.clone(),
                processor_config.clone(),
            )),
            live: Arc::new(BlockProcessor::new(
                ProcessingMode::Live,
                processor_gateway,
                db,
                processor_config,
            )),
        }
    }

    pub fn spawn(self, tracker: &TaskTracker, health: &HealthRegistry, shutdown: &CancellationToken) {
        let listener = self.listener;
        tracker.spawn(supervise(
            "head_listener",
            health.clone(),
            shutdown.clone(),
            move |token| {
                let listener = listener.clone();
                async move { listener.run(token).await }
            },
        ));

        let backfill = self.backfill;
        tracker.spawn(supervise(
            "backfill",
            health.clone(),
            shutdown.clone(),
            move |token| {
                let backfill = backfill.clone();
                async move { backfill.run(token).await }
            },
        ));

        for (name, processor) in [
            ("historical_processor", self.historical),
            ("live_processor", self.live),
        ] {
            tracker.spawn(supervise(
                name,
                health.clone(),
                shutdown.clone(),
                move |token| {
                    let processor = processor.clone();
                    async move { processor.run(token).await }
                },
            ));
        }

        info!("Ingestion pipeline started");
    }
}
