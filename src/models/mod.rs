// Stored rows (blocks, contracts, contract_interactions) and the records
// derived from one block's receipts before they are written.

use alloy_primitives::{Address, B256, U256, U512};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::LowerHex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Block {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub block_timestamp: i64,
    pub transactions_count: i64,
    pub processed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Contract {
    pub address: String,
    pub block_number: Option<i64>,
    pub transaction_hash: Option<String>,
    pub deployer_address: Option<String>,
    pub deployment_timestamp: Option<i64>,
    pub first_seen_at: i64,
    pub is_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ContractInteraction {
    pub id: i64,
    pub contract_address: String,
    pub block_number: i64,
    pub transaction_hash: String,
    pub from_address: String,
    pub gas_used: i64,
    pub gas_price: String,
    pub total_fee: String,
    pub interaction_timestamp: i64,
}

/// Header fields of a block as written to `blocks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    /// `None` leaves the column at its default; the processor fills it in.
    pub transactions_count: Option<u64>,
}

/// Block-level values every derived record of that block shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub deployer: Address,
    pub timestamp: u64,
}

/// A contract address observed in a block, either deployed there or only
/// called (pending until its deployment is seen).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub address: Address,
    pub deployment: Option<Deployment>,
    pub first_seen_at: u64,
}

impl NewContract {
    pub fn deployed(address: Address, deployment: Deployment) -> Self {
        let first_seen_at = deployment.timestamp;
        Self {
            address,
            deployment: Some(deployment),
            first_seen_at,
        }
    }

    pub fn pending(address: Address, first_seen_at: u64) -> Self {
        Self {
            address,
            deployment: None,
            first_seen_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deployment.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInteraction {
    pub contract_address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub from_address: Address,
    pub gas_used: u64,
    pub gas_price: U256,
    pub total_fee: U512,
    pub timestamp: u64,
}

/// Everything derived from one block's receipts (or a slice of them).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedRecords {
    pub contracts: Vec<NewContract>,
    pub interactions: Vec<NewInteraction>,
}

impl DerivedRecords {
    pub fn extend(&mut self, other: DerivedRecords) {
        self.contracts.extend(other.contracts);
        self.interactions.extend(other.interactions);
    }

    /// One row per address. A deployment wins over a pending sighting and the
    /// earliest sighting time is kept.
    pub fn merged_contracts(&self) -> Vec<NewContract> {
        let mut merged: BTreeMap<Address, NewContract> = BTreeMap::new();
        for contract in &self.contracts {
            match merged.get_mut(&contract.address) {
                None => {
                    merged.insert(contract.address, contract.clone());
                }
                Some(existing) => {
                    let first_seen_at = existing.first_seen_at.min(contract.first_seen_at);
                    if existing.is_pending() && !contract.is_pending() {
                        *existing = contract.clone();
                    }
                    existing.first_seen_at = first_seen_at;
                }
            }
        }
        merged.into_values().collect()
    }
}

/// gas used x gas price, widened so no product can overflow.
pub fn total_fee(gas_used: u64, gas_price: U256) -> U512 {
    U512::from(gas_used) * U512::from(gas_price)
}

/// Lowercase `0x`-prefixed hex, the storage encoding for addresses and hashes.
pub fn hex_string<T: LowerHex>(value: &T) -> String {
    format!("0x{:x}", value)
}
