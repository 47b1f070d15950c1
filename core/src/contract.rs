//! Channel Contract Adapter: a typed facade over the on-chain contract's
//! calls and state queries.
//!
//! Uses the standard `sol!` binding plus `ProviderBuilder`/`EthereumWallet`
//! idiom: `.send().await`/`.watch().await` for transactions, `.call().await`
//! for views. Two ABI bodies are generated, one per
//! [`ContractKind`](crate::model::ContractKind): the native-coin variant and
//! the ERC20 variant (`transferFrom`-based `open`/`deposit`).

use std::sync::Arc;

use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::model::{ChannelId, ChannelState, ContractKind, OnChainChannel, TxResult};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract NativeChannelManager {
        event DidOpen(bytes32 indexed channelId, address indexed sender, address indexed receiver, uint256 value, address tokenContract);
        event DidDeposit(bytes32 indexed channelId, uint256 deposit);
        event DidClaim(bytes32 indexed channelId);
        event DidStartSettling(bytes32 indexed channelId);
        event DidSettle(bytes32 indexed channelId);

        function open(bytes32 channelId, address receiver, uint32 settlingPeriod, address tokenContract, uint256 value) external payable;
        function deposit(bytes32 channelId, uint256 value) external payable;
        function claim(bytes32 channelId, uint256 payment, bytes calldata signature) external;
        function startSettling(bytes32 channelId) external;
        function settle(bytes32 channelId) external;
        function paymentDigest(bytes32 channelId, uint256 payment, address tokenContract) external view returns (bytes32);
        function canClaim(bytes32 channelId, uint256 payment, address origin, bytes calldata signature) external view returns (bool);
        function isAbsent(bytes32 channelId) external view returns (bool);
        function isPresent(bytes32 channelId) external view returns (bool);
        function isSettling(bytes32 channelId) external view returns (bool);
        function isOpen(bytes32 channelId) external view returns (bool);
        function channels(bytes32 channelId) external view returns (address sender, address receiver, uint256 value, uint32 settlingPeriod, uint256 settlingUntil, address tokenContract);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract TokenChannelManager {
        event DidOpen(bytes32 indexed channelId, address indexed sender, address indexed receiver, uint256 value, address tokenContract);
        event DidDeposit(bytes32 indexed channelId, uint256 deposit);
        event DidClaim(bytes32 indexed channelId);
        event DidStartSettling(bytes32 indexed channelId);
        event DidSettle(bytes32 indexed channelId);

        function open(bytes32 channelId, address receiver, uint32 settlingPeriod, address tokenContract, uint256 value) external;
        function deposit(bytes32 channelId, uint256 value) external;
        function claim(bytes32 channelId, uint256 payment, bytes calldata signature) external;
        function startSettling(bytes32 channelId) external;
        function settle(bytes32 channelId) external;
        function paymentDigest(bytes32 channelId, uint256 payment, address tokenContract) external view returns (bytes32);
        function canClaim(bytes32 channelId, uint256 payment, address origin, bytes calldata signature) external view returns (bool);
        function isAbsent(bytes32 channelId) external view returns (bool);
        function isPresent(bytes32 channelId) external view returns (bool);
        function isSettling(bytes32 channelId) external view returns (bool);
        function isOpen(bytes32 channelId) external view returns (bool);
        function channels(bytes32 channelId) external view returns (address sender, address receiver, uint256 value, uint32 settlingPeriod, uint256 settlingUntil, address tokenContract);

        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// Typed facade over the on-chain channel-manager contract. One
/// implementation per [`ContractKind`]; the manager picks the concrete
/// contract from a channel's own `contract_address`/`contract_kind`.
#[async_trait]
pub trait ContractAdapter: Send + Sync {
    async fn open(
        &self,
        sender: &PrivateKeySigner,
        channel_id: ChannelId,
        receiver: Address,
        settling_period: u32,
        value: U256,
        token_contract: Address,
    ) -> Result<TxResult>;

    async fn deposit(
        &self,
        sender: &PrivateKeySigner,
        channel_id: ChannelId,
        value: U256,
    ) -> Result<TxResult>;

    async fn claim(
        &self,
        receiver: &PrivateKeySigner,
        channel_id: ChannelId,
        cumulative: U256,
        signature: &str,
    ) -> Result<TxResult>;

    async fn start_settling(&self, sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult>;

    async fn settle(&self, sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult>;

    async fn get_state(&self, channel_id: ChannelId) -> Result<ChannelState>;

    async fn channel_by_id(&self, channel_id: ChannelId) -> Result<OnChainChannel>;

    /// Current block number, used by callers to compare against a
    /// channel's `settlingUntil`.
    async fn current_block(&self) -> Result<u64>;
}

/// `alloy`-backed implementation over a JSON-RPC provider, generic over the
/// [`ContractKind`] it was constructed for.
pub struct AlloyContractAdapter {
    rpc_url: String,
    contract_address: Address,
    kind: ContractKind,
    read_provider: Arc<RootProvider>,
}

impl AlloyContractAdapter {
    pub fn new(
        rpc_url: String,
        contract_address: Address,
        kind: ContractKind,
        read_provider: Arc<RootProvider>,
    ) -> Self {
        Self { rpc_url, contract_address, kind, read_provider }
    }

    fn sig_bytes(signature: &str) -> Result<Vec<u8>> {
        let trimmed = signature.strip_prefix("0x").unwrap_or(signature);
        hex::decode(trimmed).map_err(|e| CoreError::InvalidPayment(format!("invalid signature hex: {e}")))
    }
}

#[async_trait]
impl ContractAdapter for AlloyContractAdapter {
    async fn open(
        &self,
        sender: &PrivateKeySigner,
        channel_id: ChannelId,
        receiver: Address,
        settling_period: u32,
        value: U256,
        token_contract: Address,
    ) -> Result<TxResult> {
        let wallet = EthereumWallet::from(sender.clone());
        let url = self.rpc_url.parse().map_err(|e| CoreError::ChainError(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::<_, _, Ethereum>::new().wallet(wallet).connect_http(url);

        let tx_hash = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .open(channel_id, receiver, settling_period, token_contract, value)
                    .value(value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("open transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("open confirmation failed: {e}")))?
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, &provider);
                let approve_tx = contract
                    .approve(self.contract_address, value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("approve transaction failed: {e}")))?;
                approve_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("approve confirmation failed: {e}")))?;

                let pending_tx = contract
                    .open(channel_id, receiver, settling_period, token_contract, value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("open transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("open confirmation failed: {e}")))?
            }
        };

        Ok(TxResult { tx_hash, block_number: self.current_block().await? })
    }

    async fn deposit(&self, sender: &PrivateKeySigner, channel_id: ChannelId, value: U256) -> Result<TxResult> {
        let wallet = EthereumWallet::from(sender.clone());
        let url = self.rpc_url.parse().map_err(|e| CoreError::ChainError(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::<_, _, Ethereum>::new().wallet(wallet).connect_http(url);

        let tx_hash = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .deposit(channel_id, value)
                    .value(value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("deposit transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("deposit confirmation failed: {e}")))?
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, &provider);
                let approve_tx = contract
                    .approve(self.contract_address, value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("approve transaction failed: {e}")))?;
                approve_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("approve confirmation failed: {e}")))?;

                let pending_tx = contract
                    .deposit(channel_id, value)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("deposit transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("deposit confirmation failed: {e}")))?
            }
        };

        Ok(TxResult { tx_hash, block_number: self.current_block().await? })
    }

    async fn claim(
        &self,
        receiver: &PrivateKeySigner,
        channel_id: ChannelId,
        cumulative: U256,
        signature: &str,
    ) -> Result<TxResult> {
        let sig = Self::sig_bytes(signature)?;
        let wallet = EthereumWallet::from(receiver.clone());
        let url = self.rpc_url.parse().map_err(|e| CoreError::ChainError(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::<_, _, Ethereum>::new().wallet(wallet).connect_http(url);

        let tx_hash = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .claim(channel_id, cumulative, sig.into())
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("claim transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("claim confirmation failed: {e}")))?
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .claim(channel_id, cumulative, sig.into())
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("claim transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("claim confirmation failed: {e}")))?
            }
        };

        Ok(TxResult { tx_hash, block_number: self.current_block().await? })
    }

    async fn start_settling(&self, sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult> {
        let wallet = EthereumWallet::from(sender.clone());
        let url = self.rpc_url.parse().map_err(|e| CoreError::ChainError(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::<_, _, Ethereum>::new().wallet(wallet).connect_http(url);

        let tx_hash = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .startSettling(channel_id)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("startSettling transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("startSettling confirmation failed: {e}")))?
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .startSettling(channel_id)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("startSettling transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("startSettling confirmation failed: {e}")))?
            }
        };

        Ok(TxResult { tx_hash, block_number: self.current_block().await? })
    }

    async fn settle(&self, sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult> {
        let wallet = EthereumWallet::from(sender.clone());
        let url = self.rpc_url.parse().map_err(|e| CoreError::ChainError(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::<_, _, Ethereum>::new().wallet(wallet).connect_http(url);

        let tx_hash = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .settle(channel_id)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("settle transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("settle confirmation failed: {e}")))?
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, &provider);
                let pending_tx = contract
                    .settle(channel_id)
                    .send()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("settle transaction failed: {e}")))?;
                pending_tx
                    .watch()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("settle confirmation failed: {e}")))?
            }
        };

        Ok(TxResult { tx_hash, block_number: self.current_block().await? })
    }

    async fn get_state(&self, channel_id: ChannelId) -> Result<ChannelState> {
        Ok(self.channel_by_id(channel_id).await?.derived_state())
    }

    async fn channel_by_id(&self, channel_id: ChannelId) -> Result<OnChainChannel> {
        let row = match self.kind {
            ContractKind::Native => {
                let contract = NativeChannelManager::new(self.contract_address, self.read_provider.clone());
                let r = contract
                    .channels(channel_id)
                    .call()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("channels() call failed: {e}")))?;
                (r.sender, r.receiver, r.value, r.settlingPeriod, r.settlingUntil, r.tokenContract)
            }
            ContractKind::Token(_) => {
                let contract = TokenChannelManager::new(self.contract_address, self.read_provider.clone());
                let r = contract
                    .channels(channel_id)
                    .call()
                    .await
                    .map_err(|e| CoreError::ChainError(format!("channels() call failed: {e}")))?;
                (r.sender, r.receiver, r.value, r.settlingPeriod, r.settlingUntil, r.tokenContract)
            }
        };
        Ok(OnChainChannel {
            sender: row.0,
            receiver: row.1,
            value: row.2,
            settling_period: row.3 as u64,
            settling_until: row.4.to::<u64>(),
            token_contract: row.5,
        })
    }

    async fn current_block(&self) -> Result<u64> {
        self.read_provider
            .get_block_number()
            .await
            .map_err(|e| CoreError::ChainError(format!("failed to fetch block number: {e}")))
    }
}
