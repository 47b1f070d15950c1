//! Data model for the payment channel protocol.
//!
//! Types here are the Rust-native shape of the records described by the
//! channel protocol: a channel's on-chain-anchored state, and the signed
//! off-chain payment promises that spend against it.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// 32-byte channel identifier, freshly random at open time, opaque elsewhere.
pub type ChannelId = B256;

/// On-chain reconciled channel state. Discriminants fixed to match the
/// contract's derived state (`ABSENT` when `sender == 0`, `SETTLING` when
/// `settlingUntil != 0`, `OPEN` otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelState {
    Open = 0,
    Settling = 1,
    Absent = 2,
}

/// Which on-chain contract governs a channel: the native-coin variant, or a
/// specific ERC20 token contract. Drives both ABI dispatch in the contract
/// adapter and whether the payment digest includes a token contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    Native,
    Token(Address),
}

impl ContractKind {
    pub fn token_contract(&self) -> Address {
        match self {
            ContractKind::Native => Address::ZERO,
            ContractKind::Token(addr) => *addr,
        }
    }
}

/// Local record of a payment channel, reconciled against on-chain state on
/// read. `(sender, receiver, channel_id)` uniquely identifies a record;
/// `channel_id` alone is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub channel_id: ChannelId,
    pub sender: Address,
    pub receiver: Address,
    /// Total deposited on-chain. Non-decreasing during the channel's life.
    pub value: U256,
    /// Highest cumulative payment issued (sender side) or accepted
    /// (receiver side). Write-monotonic: `0 <= spent <= value`.
    pub spent: U256,
    pub state: ChannelState,
    pub contract_address: Address,
    pub contract_kind: ContractKind,
}

impl PaymentChannel {
    pub fn remaining(&self) -> U256 {
        self.value.saturating_sub(self.spent)
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn is_settling(&self) -> bool {
        self.state == ChannelState::Settling
    }

    pub fn is_absent(&self) -> bool {
        self.state == ChannelState::Absent
    }
}

/// An off-chain signed payment promise. The signature recovers to `sender`
/// over the digest of `(contract_address, channel_id, cumulative, token_contract)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub channel_id: ChannelId,
    pub sender: Address,
    pub receiver: Address,
    pub contract_address: Address,
    /// Channel's current deposit (informational).
    pub value: U256,
    /// Incremental amount paid by this promise.
    pub price: U256,
    /// Snapshot of deposit at signing time.
    pub channel_value: U256,
    /// Cumulative amount this promise authorizes (the digest input).
    pub cumulative: U256,
    /// 65-byte (r, s, v) signature over the payment digest, hex-encoded.
    pub signature: String,
    /// Opaque caller-supplied tag.
    pub meta: Option<String>,
    /// Opaque receipt issued by the receiver upon acceptance.
    pub token: Option<String>,
}

/// Result of a submitted on-chain transaction: the minimal fields callers
/// of the Contract Adapter need to continue the protocol.
#[derive(Debug, Clone)]
pub struct TxResult {
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Full on-chain channel record as returned by `channelById`.
#[derive(Debug, Clone)]
pub struct OnChainChannel {
    pub sender: Address,
    pub receiver: Address,
    pub value: U256,
    pub settling_period: u64,
    pub settling_until: u64,
    pub token_contract: Address,
}

impl OnChainChannel {
    pub fn derived_state(&self) -> ChannelState {
        if self.sender == Address::ZERO {
            ChannelState::Absent
        } else if self.settling_until != 0 {
            ChannelState::Settling
        } else {
            ChannelState::Open
        }
    }
}
