use crate::blockchain::client::ClientError;
use crate::blockchain::gateway::{Lane, RpcGateway};
use crate::blockchain::models::BlockTag;
use crate::db::{block, Database};
use crate::error::IndexerError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HeadListener {
    gateway: RpcGateway,
    db: Database,
}

impl HeadListener {
    pub fn new(gateway: RpcGateway, db: Database) -> Self {
        Self { gateway, db }
    }

    /// A head being handled when the stop arrives is finished first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), IndexerError> {
        info!("Starting head listener");
        let mut subscription = self.gateway.subscribe_new_heads().await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                head = subscription.next() => match head {
                    Some(number) => {
                        self.handle_head(number).await?;
                    }
                    None => return Err(ClientError::SubscriptionClosed.into()),
                },
            }
        }

        subscription.unsubscribe();
        info!("Stopping head listener");
        Ok(())
    }

    /// Unknown heads and RPC failures are logged and skipped.
    pub async fn handle_head(&self, number: u64) -> Result<bool, IndexerError> {
        let header = match self
            .gateway
            .get_block(Lane::Live, BlockTag::Number(number), true)
            .await
        {
            Ok(header) => header,
            Err(e) if e.is_not_found() => {
                warn!(block = number, "Announced head not found on endpoint yet");
                return Ok(false);
            }
            Err(e) => {
                warn!(block = number, "Failed to fetch announced head: {}", e);
                return Ok(false);
            }
        };

        let inserted = block::insert_block_if_absent(&self.db, &header.bare_row()).await?;
        if inserted {
            info!(block = number, "Added new block to database");
        } else {
            debug!(block = number, "Head already stored");
        }
        Ok(inserted)
    }
}
