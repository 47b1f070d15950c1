//! Channel Manager: the serialized coordinator for open/reuse, payment
//! issuance, payment acceptance, and channel closure.
//!
//! Built around a two-level lock-table model, generalized from a single
//! shared `RwLock<HashMap<...>>` coordinator: a per-`(sender, receiver)` pair
//! lock and a per-`channel_id` lock, the pair lock always acquired and
//! released outside any `channel_id` lock.

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use rand::RngCore;
use tracing::info;

use crate::channel::PaymentChannelView;
use crate::contract::ContractAdapter;
use crate::digest;
use crate::error::{CoreError, Result};
use crate::lock::LockTable;
use crate::model::{ChannelId, ChannelState, ContractKind, Payment, PaymentChannel, TxResult};
use crate::repository::{reconcile, Role, SharedChannelsRepository, SharedPaymentsRepository};

/// Tunables from the configuration surface: `minimumChannelAmount` and
/// `settlementPeriod`, plus the deposit multiplier the spec defaults to 10.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub minimum_channel_amount: U256,
    pub deposit_multiplier: U256,
    pub settling_period_blocks: u32,
    pub contract_address: Address,
    pub contract_kind: ContractKind,
}

impl ManagerConfig {
    pub fn default_multiplier() -> U256 {
        U256::from(10u64)
    }
}

/// Coordinates one local party's (sender's or receiver's) channel
/// bookkeeping against a single on-chain contract. A sender-role instance
/// exposes `require_open_channel`/`next_payment`; a receiver-role instance
/// exposes `accept_payment`; `close_channel`/`open_channels` are available
/// to either, branching on `self.role`.
pub struct ChannelManager {
    role: Role,
    signer: PrivateKeySigner,
    channels: SharedChannelsRepository,
    payments: SharedPaymentsRepository,
    adapter: std::sync::Arc<dyn ContractAdapter>,
    config: ManagerConfig,
    pair_locks: LockTable<(Address, Address)>,
    channel_locks: LockTable<ChannelId>,
}

impl ChannelManager {
    pub fn new(
        role: Role,
        signer: PrivateKeySigner,
        channels: SharedChannelsRepository,
        payments: SharedPaymentsRepository,
        adapter: std::sync::Arc<dyn ContractAdapter>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            role,
            signer,
            channels,
            payments,
            adapter,
            config,
            pair_locks: LockTable::new(),
            channel_locks: LockTable::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Find an open channel from `sender` to `receiver` with remaining
    /// capacity for `price`, opening a new one on-chain if none exists.
    /// Only one `open` transaction is ever outstanding per `(sender,
    /// receiver)` pair, because the whole attempt runs under the pair lock.
    pub async fn require_open_channel(
        &self,
        sender: Address,
        receiver: Address,
        price: U256,
    ) -> Result<PaymentChannel> {
        let _pair_guard = self.pair_locks.acquire((sender, receiver)).await;

        if let Some(candidate) = self.channels.find_usable(self.role, sender, receiver, price).await? {
            let reconciled = reconcile(candidate, self.adapter.as_ref()).await?;
            if reconciled.is_open() {
                return Ok(reconciled);
            }
        }

        let deposit = std::cmp::max(price.saturating_mul(self.config.deposit_multiplier), self.config.minimum_channel_amount);
        let mut channel_id_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut channel_id_bytes);
        let channel_id = ChannelId::from(channel_id_bytes);

        info!(%sender, %receiver, %deposit, %channel_id, "opening new channel");

        self.adapter
            .open(
                &self.signer,
                channel_id,
                receiver,
                self.config.settling_period_blocks,
                deposit,
                self.config.contract_kind.token_contract(),
            )
            .await?;

        let record = PaymentChannel {
            channel_id,
            sender,
            receiver,
            value: deposit,
            spent: U256::ZERO,
            state: ChannelState::Open,
            contract_address: self.config.contract_address,
            contract_kind: self.config.contract_kind,
        };
        self.channels.save(self.role, record.clone()).await?;
        Ok(record)
    }

    /// Build, sign, and burn the next payment promise on `channel_id`.
    /// `spend` is persisted before the signed promise is returned, per the
    /// deliberate "burn" choice for crash-between-sign-and-send safety.
    pub async fn next_payment(&self, channel_id: ChannelId, price: U256, meta: Option<String>) -> Result<Payment> {
        let _channel_guard = self.channel_locks.acquire(channel_id).await;

        let record = self
            .channels
            .first_by_id(self.role, channel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let record = reconcile(record, self.adapter.as_ref()).await?;

        if !record.is_open() {
            return Err(CoreError::InvalidState(format!("channel {channel_id} is not open")));
        }
        if record.remaining() < price {
            return Err(CoreError::InsufficientCapacity {
                remaining: record.remaining().to_string(),
                requested: price.to_string(),
            });
        }

        let new_cumulative = record.spent + price;
        let token_contract = record.contract_kind.token_contract();
        let payment_digest = digest::payment_digest(record.contract_address, channel_id, new_cumulative, token_contract);
        let signature = digest::sign(payment_digest, &self.signer).await?;

        let payment = Payment {
            channel_id,
            sender: record.sender,
            receiver: record.receiver,
            contract_address: record.contract_address,
            value: record.value,
            price,
            channel_value: record.value,
            cumulative: new_cumulative,
            signature,
            meta,
            token: None,
        };

        self.channels.spend(self.role, channel_id, new_cumulative).await?;
        info!(%channel_id, %new_cumulative, "signed payment, spend persisted");

        Ok(payment)
    }

    /// Validate and accept an inbound payment promise, mirroring a local
    /// record from chain on first contact with a channel.
    pub async fn accept_payment(&self, payment: &Payment) -> Result<PaymentChannel> {
        let _channel_guard = self.channel_locks.acquire(payment.channel_id).await;

        let existing = self.channels.first_by_id(self.role, payment.channel_id).await?;

        let record = match existing {
            None => {
                if payment.price.is_zero() {
                    return Err(CoreError::InvalidPayment("price must be greater than zero".into()));
                }
                if payment.price > payment.channel_value {
                    return Err(CoreError::InvalidPayment("price exceeds channel value".into()));
                }

                let on_chain = self.adapter.channel_by_id(payment.channel_id).await?;
                let valid = digest::recovers_to(
                    payment.contract_address,
                    payment.channel_id,
                    payment.cumulative,
                    on_chain.token_contract,
                    &payment.signature,
                    on_chain.sender,
                )?;
                if !valid {
                    return Err(CoreError::InvalidPayment("signature does not recover to channel sender".into()));
                }

                let contract_kind = if on_chain.token_contract == Address::ZERO {
                    ContractKind::Native
                } else {
                    ContractKind::Token(on_chain.token_contract)
                };
                let mirrored = PaymentChannel {
                    channel_id: payment.channel_id,
                    sender: on_chain.sender,
                    receiver: on_chain.receiver,
                    value: on_chain.value,
                    spent: U256::ZERO,
                    state: on_chain.derived_state(),
                    contract_address: payment.contract_address,
                    contract_kind,
                };
                self.channels.save(self.role, mirrored.clone()).await?;
                mirrored
            }
            Some(record) => reconcile(record, self.adapter.as_ref()).await?,
        };

        if !(record.is_open() || record.is_settling()) {
            return Err(CoreError::InvalidState(format!("channel {} is not open or settling", payment.channel_id)));
        }
        if payment.channel_id != record.channel_id || payment.contract_address != record.contract_address {
            return Err(CoreError::InvalidPayment("channel id or contract address mismatch".into()));
        }
        if payment.cumulative <= record.spent {
            return Err(CoreError::InvalidPayment(
                "cumulative must be strictly greater than the previously accepted amount".into(),
            ));
        }
        if payment.cumulative > record.value {
            return Err(CoreError::InvalidPayment("cumulative exceeds channel value".into()));
        }

        let valid = digest::recovers_to(
            record.contract_address,
            record.channel_id,
            payment.cumulative,
            record.contract_kind.token_contract(),
            &payment.signature,
            record.sender,
        )?;
        if !valid {
            return Err(CoreError::InvalidPayment("signature does not recover to channel sender".into()));
        }

        self.channels.spend(self.role, payment.channel_id, payment.cumulative).await?;
        info!(channel_id = %payment.channel_id, cumulative = %payment.cumulative, "payment accepted");

        let mut updated = record;
        updated.spent = payment.cumulative;
        Ok(updated)
    }

    /// Read-only counterpart to [`Self::accept_payment`]: runs every check
    /// `accept_payment` would but persists nothing, for preflight UX.
    pub async fn verify_payment(&self, payment: &Payment) -> Result<bool> {
        let record = match self.channels.first_by_id(self.role, payment.channel_id).await? {
            Some(record) => reconcile(record, self.adapter.as_ref()).await?,
            None => {
                let on_chain = self.adapter.channel_by_id(payment.channel_id).await?;
                return digest::recovers_to(
                    payment.contract_address,
                    payment.channel_id,
                    payment.cumulative,
                    on_chain.token_contract,
                    &payment.signature,
                    on_chain.sender,
                );
            }
        };

        if !(record.is_open() || record.is_settling()) {
            return Ok(false);
        }
        if payment.channel_id != record.channel_id || payment.contract_address != record.contract_address {
            return Ok(false);
        }
        if payment.cumulative <= record.spent || payment.cumulative > record.value {
            return Ok(false);
        }

        digest::recovers_to(
            record.contract_address,
            record.channel_id,
            payment.cumulative,
            record.contract_kind.token_contract(),
            &payment.signature,
            record.sender,
        )
    }

    /// Close `channel_id`: receivers claim with the highest-seen promise,
    /// senders start settling then finalize after the settling period.
    pub async fn close_channel(&self, channel_id: ChannelId) -> Result<TxResult> {
        let _channel_guard = self.channel_locks.acquire(channel_id).await;

        let record = self
            .channels
            .first_by_id(self.role, channel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let record = reconcile(record, self.adapter.as_ref()).await?;

        match self.role {
            Role::Receiver => {
                let mut payments = self.payments.find_by_channel_id(channel_id).await?;
                payments.sort_by_key(|p| p.cumulative);
                let highest = payments
                    .last()
                    .ok_or_else(|| CoreError::InvalidState("no accepted payment to claim with".into()))?;

                let tx = self.adapter.claim(&self.signer, channel_id, highest.cumulative, &highest.signature).await?;
                self.channels.update_state(self.role, channel_id, ChannelState::Absent).await?;
                info!(%channel_id, "channel claimed");
                Ok(tx)
            }
            Role::Sender => {
                if record.is_open() {
                    let tx = self.adapter.start_settling(&self.signer, channel_id).await?;
                    self.channels.update_state(self.role, channel_id, ChannelState::Settling).await?;
                    info!(%channel_id, "channel settling started");
                    return Ok(tx);
                }
                if record.is_settling() {
                    let on_chain = self.adapter.channel_by_id(channel_id).await?;
                    let current_block = self.adapter.current_block().await?;
                    if current_block >= on_chain.settling_until {
                        let tx = self.adapter.settle(&self.signer, channel_id).await?;
                        self.channels.update_state(self.role, channel_id, ChannelState::Absent).await?;
                        info!(%channel_id, "channel settled");
                        return Ok(tx);
                    }
                    return Err(CoreError::InvalidState(format!(
                        "channel {channel_id} is still settling until block {}",
                        on_chain.settling_until
                    )));
                }
                Err(CoreError::InvalidState(format!("channel {channel_id} cannot be closed from its current state")))
            }
        }
    }

    /// All locally known channels in state OPEN, after chain reconciliation.
    pub async fn open_channels(&self) -> Result<Vec<PaymentChannelView>> {
        let rows = self.channels.all_open(self.role).await?;
        let mut reconciled = Vec::with_capacity(rows.len());
        for row in rows {
            let view = reconcile(row, self.adapter.as_ref()).await?;
            if view.is_open() {
                reconciled.push(view);
            }
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryChannelsRepository, InMemoryPaymentsRepository};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Clone)]
    struct ChainChannel {
        sender: Address,
        receiver: Address,
        value: U256,
        settling_period: u32,
        settling_until: u64,
        token_contract: Address,
    }

    /// In-memory stand-in for the on-chain channel manager contract,
    /// implementing the claim/settle payout rules properties 5 and 6
    /// describe, and tracking balance deltas so tests can assert on them.
    struct FakeContractAdapter {
        channels: AsyncMutex<HashMap<ChannelId, ChainChannel>>,
        balances: AsyncMutex<HashMap<Address, U256>>,
        block: AtomicU64,
        open_calls: AtomicU32,
        next_tx: AtomicU64,
    }

    impl FakeContractAdapter {
        fn new() -> Self {
            Self {
                channels: AsyncMutex::new(HashMap::new()),
                balances: AsyncMutex::new(HashMap::new()),
                block: AtomicU64::new(1),
                open_calls: AtomicU32::new(0),
                next_tx: AtomicU64::new(1),
            }
        }

        fn advance_blocks(&self, n: u64) {
            self.block.fetch_add(n, Ordering::SeqCst);
        }

        async fn credit(&self, addr: Address, amount: U256) {
            *self.balances.lock().await.entry(addr).or_insert(U256::ZERO) += amount;
        }

        async fn balance_of(&self, addr: Address) -> U256 {
            self.balances.lock().await.get(&addr).copied().unwrap_or(U256::ZERO)
        }

        fn tx_result(&self) -> TxResult {
            let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
            TxResult {
                tx_hash: ChannelId::from(U256::from(n).to_be_bytes::<32>()),
                block_number: self.block.load(Ordering::SeqCst),
            }
        }
    }

    #[async_trait::async_trait]
    impl ContractAdapter for FakeContractAdapter {
        async fn open(
            &self,
            sender: &PrivateKeySigner,
            channel_id: ChannelId,
            receiver: Address,
            settling_period: u32,
            value: U256,
            token_contract: Address,
        ) -> Result<TxResult> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            self.channels.lock().await.insert(
                channel_id,
                ChainChannel { sender: sender.address(), receiver, value, settling_period, settling_until: 0, token_contract },
            );
            Ok(self.tx_result())
        }

        async fn deposit(&self, _sender: &PrivateKeySigner, channel_id: ChannelId, value: U256) -> Result<TxResult> {
            let mut channels = self.channels.lock().await;
            let chan = channels.get_mut(&channel_id).ok_or_else(|| CoreError::NotFound("no such channel".into()))?;
            chan.value += value;
            Ok(self.tx_result())
        }

        async fn claim(
            &self,
            _receiver: &PrivateKeySigner,
            channel_id: ChannelId,
            cumulative: U256,
            _signature: &str,
        ) -> Result<TxResult> {
            let chan = self
                .channels
                .lock()
                .await
                .remove(&channel_id)
                .ok_or_else(|| CoreError::InvalidState("channel absent".into()))?;
            let to_receiver = std::cmp::min(cumulative, chan.value);
            let to_sender = chan.value - to_receiver;
            self.credit(chan.receiver, to_receiver).await;
            self.credit(chan.sender, to_sender).await;
            Ok(self.tx_result())
        }

        async fn start_settling(&self, _sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult> {
            let mut channels = self.channels.lock().await;
            let chan = channels.get_mut(&channel_id).ok_or_else(|| CoreError::NotFound("no such channel".into()))?;
            if chan.settling_until != 0 {
                return Err(CoreError::InvalidState("already settling".into()));
            }
            chan.settling_until = self.block.load(Ordering::SeqCst) + chan.settling_period as u64;
            Ok(self.tx_result())
        }

        async fn settle(&self, _sender: &PrivateKeySigner, channel_id: ChannelId) -> Result<TxResult> {
            let (sender, value, settling_until) = {
                let channels = self.channels.lock().await;
                let chan = channels.get(&channel_id).ok_or_else(|| CoreError::NotFound("no such channel".into()))?;
                (chan.sender, chan.value, chan.settling_until)
            };
            if self.block.load(Ordering::SeqCst) < settling_until {
                return Err(CoreError::InvalidState("settling period not elapsed".into()));
            }
            self.channels.lock().await.remove(&channel_id);
            self.credit(sender, value).await;
            Ok(self.tx_result())
        }

        async fn get_state(&self, channel_id: ChannelId) -> Result<ChannelState> {
            Ok(self.channel_by_id(channel_id).await?.derived_state())
        }

        async fn channel_by_id(&self, channel_id: ChannelId) -> Result<crate::model::OnChainChannel> {
            let channels = self.channels.lock().await;
            Ok(match channels.get(&channel_id) {
                Some(c) => crate::model::OnChainChannel {
                    sender: c.sender,
                    receiver: c.receiver,
                    value: c.value,
                    settling_period: c.settling_period as u64,
                    settling_until: c.settling_until,
                    token_contract: c.token_contract,
                },
                None => crate::model::OnChainChannel {
                    sender: Address::ZERO,
                    receiver: Address::ZERO,
                    value: U256::ZERO,
                    settling_period: 0,
                    settling_until: 0,
                    token_contract: Address::ZERO,
                },
            })
        }

        async fn current_block(&self) -> Result<u64> {
            Ok(self.block.load(Ordering::SeqCst))
        }
    }

    fn manager_config(minimum: u64, settling_period: u32) -> ManagerConfig {
        ManagerConfig {
            minimum_channel_amount: U256::from(minimum),
            deposit_multiplier: ManagerConfig::default_multiplier(),
            settling_period_blocks: settling_period,
            contract_address: Address::from([0x11; 20]),
            contract_kind: ContractKind::Native,
        }
    }

    fn new_manager(role: Role, adapter: Arc<FakeContractAdapter>, minimum: u64, settling_period: u32) -> ChannelManager {
        ChannelManager::new(
            role,
            PrivateKeySigner::random(),
            Arc::new(InMemoryChannelsRepository::new()),
            Arc::new(InMemoryPaymentsRepository::new()),
            adapter,
            manager_config(minimum, settling_period),
        )
    }

    #[tokio::test]
    async fn single_open_under_concurrent_burst() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = Arc::new(new_manager(Role::Sender, adapter.clone(), 1000, 10));
        let receiver = PrivateKeySigner::random().address();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sender = sender.clone();
            handles.push(tokio::spawn(async move {
                sender.require_open_channel(sender.address(), receiver, U256::from(100u64)).await.unwrap()
            }));
        }
        let mut channel_ids = Vec::new();
        for h in handles {
            channel_ids.push(h.await.unwrap().channel_id);
        }

        assert_eq!(adapter.open_calls.load(Ordering::SeqCst), 1);
        assert!(channel_ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn next_payment_cumulative_is_strictly_increasing_under_concurrency() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = Arc::new(new_manager(Role::Sender, adapter.clone(), 1000, 10));
        let receiver = PrivateKeySigner::random().address();

        let channel = sender.require_open_channel(sender.address(), receiver, U256::from(10u64)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5u64 {
            let sender = sender.clone();
            let channel_id = channel.channel_id;
            handles.push(tokio::spawn(async move { sender.next_payment(channel_id, U256::from(10u64), None).await.unwrap() }));
        }
        let mut cumulatives: Vec<U256> = Vec::new();
        for h in handles {
            cumulatives.push(h.await.unwrap().cumulative);
        }
        cumulatives.sort();
        for pair in cumulatives.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(cumulatives.last().copied().unwrap(), U256::from(50u64));
    }

    #[tokio::test]
    async fn s1_happy_path_claim_after_three_payments() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = new_manager(Role::Sender, adapter.clone(), 1000, 10);
        let receiver_mgr = new_manager(Role::Receiver, adapter.clone(), 1000, 10);
        let receiver_addr = receiver_mgr.address();

        let channel = sender.require_open_channel(sender.address(), receiver_addr, U256::from(100u64)).await.unwrap();
        assert_eq!(channel.value, U256::from(1000u64));

        for _ in 0..3 {
            let payment = sender.next_payment(channel.channel_id, U256::from(100u64), None).await.unwrap();
            receiver_mgr.accept_payment(&payment).await.unwrap();
        }

        receiver_mgr.close_channel(channel.channel_id).await.unwrap();

        assert_eq!(adapter.balance_of(receiver_addr).await, U256::from(300u64));
        assert_eq!(adapter.balance_of(sender.address()).await, U256::from(700u64));
        assert!(adapter.channel_by_id(channel.channel_id).await.unwrap().sender == Address::ZERO);
    }

    #[tokio::test]
    async fn s2_overpayment_caps_at_deposit() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender_signer = PrivateKeySigner::random();
        let receiver_signer = PrivateKeySigner::random();
        let channel_id = ChannelId::from([0x42; 32]);

        adapter
            .open(&sender_signer, channel_id, receiver_signer.address(), 10, U256::from(500u64), Address::ZERO)
            .await
            .unwrap();

        adapter.claim(&receiver_signer, channel_id, U256::from(600u64), "0x").await.unwrap();

        assert_eq!(adapter.balance_of(receiver_signer.address()).await, U256::from(500u64));
        assert_eq!(adapter.balance_of(sender_signer.address()).await, U256::ZERO);
    }

    #[tokio::test]
    async fn s3_sender_initiated_close_of_unused_channel() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = new_manager(Role::Sender, adapter.clone(), 1000, 10);
        let receiver_addr = PrivateKeySigner::random().address();

        let channel = sender.require_open_channel(sender.address(), receiver_addr, U256::from(100u64)).await.unwrap();

        sender.close_channel(channel.channel_id).await.unwrap();
        assert!(matches!(
            sender.close_channel(channel.channel_id).await,
            Err(CoreError::InvalidState(_))
        ));

        adapter.advance_blocks(10);
        sender.close_channel(channel.channel_id).await.unwrap();

        assert_eq!(adapter.balance_of(sender.address()).await, U256::from(1000u64));
    }

    #[tokio::test]
    async fn s4_receiver_can_claim_while_settling() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = new_manager(Role::Sender, adapter.clone(), 1000, 100);
        let receiver_mgr = new_manager(Role::Receiver, adapter.clone(), 1000, 100);
        let receiver_addr = receiver_mgr.address();

        let channel = sender.require_open_channel(sender.address(), receiver_addr, U256::from(100u64)).await.unwrap();
        let payment = sender.next_payment(channel.channel_id, U256::from(400u64), None).await.unwrap();
        receiver_mgr.accept_payment(&payment).await.unwrap();

        sender.close_channel(channel.channel_id).await.unwrap();

        receiver_mgr.close_channel(channel.channel_id).await.unwrap();

        assert_eq!(adapter.balance_of(receiver_addr).await, U256::from(400u64));
        assert_eq!(adapter.balance_of(sender.address()).await, U256::from(600u64));
    }

    #[tokio::test]
    async fn s5_invalid_signature_rejected_without_spend() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = new_manager(Role::Sender, adapter.clone(), 1000, 10);
        let receiver_mgr = new_manager(Role::Receiver, adapter.clone(), 1000, 10);
        let receiver_addr = receiver_mgr.address();

        let channel = sender.require_open_channel(sender.address(), receiver_addr, U256::from(100u64)).await.unwrap();
        let mut payment = sender.next_payment(channel.channel_id, U256::from(100u64), None).await.unwrap();

        let impostor = PrivateKeySigner::random();
        let digest = digest::payment_digest(payment.contract_address, payment.channel_id, payment.cumulative, Address::ZERO);
        payment.signature = digest::sign(digest, &impostor).await.unwrap();

        let result = receiver_mgr.accept_payment(&payment).await;
        assert!(matches!(result, Err(CoreError::InvalidPayment(_))));
    }

    #[tokio::test]
    async fn s6_reuse_before_absent_continues_cumulative() {
        let adapter = Arc::new(FakeContractAdapter::new());
        let sender = new_manager(Role::Sender, adapter.clone(), 1000, 10);
        let receiver_addr = PrivateKeySigner::random().address();

        let channel = sender.require_open_channel(sender.address(), receiver_addr, U256::from(100u64)).await.unwrap();
        for _ in 0..3 {
            sender.next_payment(channel.channel_id, U256::from(100u64), None).await.unwrap();
        }

        let reused = sender.require_open_channel(sender.address(), receiver_addr, U256::from(50u64)).await.unwrap();
        assert_eq!(reused.channel_id, channel.channel_id);

        let payment = sender.next_payment(channel.channel_id, U256::from(50u64), None).await.unwrap();
        assert_eq!(payment.cumulative, U256::from(350u64));
    }
}
