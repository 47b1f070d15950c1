// model.rs - HTTP wire types exchanged between a sender's and a receiver's gateway

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Body of a `402 Payment Required` response: tells the sender who to pay,
/// how much, and where to POST the resulting signed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub receiver: Address,
    pub price: U256,
    pub gateway: String,
    pub meta: Option<String>,
    pub contract_address: Address,
}

/// Returned by the receiver's gateway on successful payment acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseChannelRequest {
    pub channel_id: alloy::primitives::B256,
}

/// Wire-friendly projection of `paychan_core::TxResult` (`B256`/`u64` serialize
/// as hex/number natively, but we pin the field names for the API contract).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResultView {
    pub tx_hash: alloy::primitives::B256,
    pub block_number: u64,
}

impl From<paychan_core::TxResult> for TxResultView {
    fn from(tx: paychan_core::TxResult) -> Self {
        Self { tx_hash: tx.tx_hash, block_number: tx.block_number }
    }
}
