
use crate::models::{
    total_fee, BlockContext, Deployment, DerivedRecords, NewBlock, NewContract, NewInteraction,
};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    pub fn to_param(&self) -> String {
        match self {
            Self::Number(number) => format!("0x{:x}", number),
            Self::Latest => "latest".to_string(),
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{}", number),
            Self::Latest => f.write_str("latest"),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,
    /// Hashes, or full bodies when requested with `include_bodies`.
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

impl RpcBlock {
    pub fn context(&self) -> BlockContext {
        BlockContext {
            number: self.number,
            timestamp: self.timestamp,
        }
    }

    pub fn bare_row(&self) -> NewBlock {
        NewBlock {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            transactions_count: None,
        }
    }

    pub fn full_row(&self) -> NewBlock {
        NewBlock {
            transactions_count: Some(self.transactions.len() as u64),
            ..self.bare_row()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Hash(B256),
    Full(RpcTransaction),
}

impl BlockTransaction {
    pub fn hash(&self) -> B256 {
        match self {
            Self::Hash(hash) => *hash,
            Self::Full(tx) => tx.hash,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub transaction_index: u64,
    pub block_hash: B256,
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub block_number: u64,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(deserialize_with = "deserialize_hex_u64")]
    pub gas_used: u64,
    /// Absent on some deposit receipts; treated as zero.
    #[serde(default, deserialize_with = "deserialize_hex_u256_opt")]
    pub effective_gas_price: Option<U256>,
    #[serde(default, deserialize_with = "deserialize_hex_u64_opt")]
    pub status: Option<u64>,
}

impl RpcReceipt {
    pub fn gas_price(&self) -> U256 {
        self.effective_gas_price.unwrap_or(U256::ZERO)
    }
}

/// Call targets also get a pending contract row until their deployment is seen.
pub fn extract_records(context: &BlockContext, receipts: &[RpcReceipt]) -> DerivedRecords {
    let mut records = DerivedRecords::default();

    for receipt in receipts {
        if let Some(address) = receipt.contract_address {
            records.contracts.push(NewContract::deployed(
                address,
                Deployment {
                    block_number: context.number,
                    transaction_hash: receipt.transaction_hash,
                    deployer: receipt.from,
                    timestamp: context.timestamp,
                },
            ));
        }

        if let Some(target) = receipt.to {
            let gas_price = receipt.gas_price();
            records
                .contracts
                .push(NewContract::pending(target, context.timestamp));
            records.interactions.push(NewInteraction {
                contract_address: target,
                block_number: context.number,
                transaction_hash: receipt.transaction_hash,
                from_address: receipt.from,
                gas_used: receipt.gas_used,
                gas_price,
                total_fee: total_fee(receipt.gas_used, gas_price),
                timestamp: context.timestamp,
            });
        }
    }

    records
}

// Hex quantity helpers

fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(format!("empty hex quantity: {:?}", s));
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity {:?}: {}", s, e))
}

fn parse_hex_u256(s: &str) -> Result<U256, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity {:?}: {}", s, e))
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_u64(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => parse_hex_u256(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
