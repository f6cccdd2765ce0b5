use base_indexer::{
    blockchain::{
        client::{ChainEndpoint, JsonRpcClient},
        models::{extract_records, BlockTag},
    },
    config::Config,
    models::total_fee,
};
use std::time::Duration;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting endpoint smoke test...");

    // 1. Setup
    let config = Config::from_env();
    let client = JsonRpcClient::new(
        &config.processor_rpc_url,
        Duration::from_secs(config.rpc_timeout_secs),
        config.head_poll_interval,
    )?;

    // 2. Head
    let head = client.block_number().await?;
    info!("✅ Current head: {}", head);

    // 3. Header with transaction hashes
    let block = client.get_block(BlockTag::Number(head), false).await?;
    info!(
        "✅ Block {} ({:#x}) has {} transactions",
        block.number,
        block.hash,
        block.transactions.len()
    );

    // 4. Receipts
    let receipts = match client.get_block_receipts(BlockTag::Number(head)).await {
        Ok(receipts) => receipts,
        Err(e) => {
            error!("❌ Failed to get receipts: {}", e);
            return Ok(());
        }
    };
    info!("✅ Retrieved {} receipts", receipts.len());
    if receipts.len() != block.transactions.len() {
        error!(
            "❌ Receipt count {} does not match transaction count {}",
            receipts.len(),
            block.transactions.len()
        );
    }

    if let Some(first) = block.transactions.first() {
        match client.get_transaction_receipt(first.hash()).await {
            Ok(receipt) => info!(
                "✅ Single receipt lookup: {:#x} used {} gas",
                receipt.transaction_hash, receipt.gas_used
            ),
            Err(e) => error!("❌ Failed to get receipt {:#x}: {}", first.hash(), e),
        }
    }

    // 5. Derivation
    let records = extract_records(&block.context(), &receipts);
    let contracts = records.merged_contracts();
    info!(
        "✅ Derived {} contracts ({} deployments) and {} interactions",
        contracts.len(),
        contracts.iter().filter(|c| !c.is_pending()).count(),
        records.interactions.len()
    );

    for interaction in records.interactions.iter().take(3) {
        info!(
            "   {:#x} -> {:#x}: fee {}",
            interaction.from_address,
            interaction.contract_address,
            total_fee(interaction.gas_used, interaction.gas_price)
        );
    }

    info!("Endpoint smoke test completed!");
    Ok(())
}
