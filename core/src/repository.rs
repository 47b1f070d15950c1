//! Durable storage for local channel and payment records.
//!
//! Re-architected per the design notes as a capability-set trait with one
//! tagged implementation per back-end, rather than the inheritance the
//! distilled spec's source used. `reconcile` is a free function that takes a
//! repository row and a [`ContractAdapter`](crate::contract::ContractAdapter).
//! It is not a repository method, so the reconciliation policy is shared
//! identically across every back-end.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::contract::ContractAdapter;
use crate::error::{CoreError, Result};
use crate::model::{ChannelId, ChannelState, Payment, PaymentChannel};

/// Namespaces a process's channel records so one back-end can hold
/// sender-side and receiver-side bookkeeping without key collision (spec:
/// "Records must be namespaced so a process can isolate sender-side from
/// receiver-side storage within one back-end").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

#[async_trait]
pub trait ChannelsRepository: Send + Sync {
    async fn save(&self, role: Role, channel: PaymentChannel) -> Result<()>;

    /// Insert if new, else `spend`.
    async fn save_or_update(&self, role: Role, channel: PaymentChannel) -> Result<()>;

    async fn first_by_id(&self, role: Role, channel_id: ChannelId) -> Result<Option<PaymentChannel>>;

    /// Monotonic write: rejects `new_spent < stored.spent`.
    async fn spend(&self, role: Role, channel_id: ChannelId, new_spent: U256) -> Result<()>;

    async fn deposit(&self, role: Role, channel_id: ChannelId, delta: U256) -> Result<()>;

    async fn update_state(&self, role: Role, channel_id: ChannelId, state: ChannelState) -> Result<()>;

    async fn all(&self, role: Role) -> Result<Vec<PaymentChannel>>;

    async fn all_open(&self, role: Role) -> Result<Vec<PaymentChannel>>;

    async fn all_settling(&self, role: Role) -> Result<Vec<PaymentChannel>>;

    /// First OPEN channel matching `(sender, receiver)` whose remaining
    /// capacity covers `amount`; ties break by earliest insertion.
    async fn find_usable(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
        amount: U256,
    ) -> Result<Option<PaymentChannel>>;

    async fn find_by_sender_receiver(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
    ) -> Result<Vec<PaymentChannel>>;

    async fn find_by_sender_receiver_channel_id(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
        channel_id: ChannelId,
    ) -> Result<Option<PaymentChannel>>;
}

#[async_trait]
pub trait PaymentsRepository: Send + Sync {
    async fn save(&self, payment: Payment) -> Result<()>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>>;

    async fn find_by_channel_id(&self, channel_id: ChannelId) -> Result<Vec<Payment>>;
}

/// Reconciles a locally stored row against on-chain state. If the chain
/// reports ABSENT but a local record exists, the returned view carries
/// `state = Absent` regardless of what was last persisted locally. Callers
/// must not reuse such a channel.
pub async fn reconcile(row: PaymentChannel, adapter: &dyn ContractAdapter) -> Result<PaymentChannel> {
    let on_chain = adapter.channel_by_id(row.channel_id).await?;
    let state = on_chain.derived_state();
    Ok(PaymentChannel { value: on_chain.value, state, ..row })
}

#[derive(Default, Clone)]
struct Namespace {
    by_id: HashMap<ChannelId, PaymentChannel>,
    insertion_order: Vec<ChannelId>,
}

/// In-memory `ChannelsRepository`, used for tests and as the default
/// "embedded" back-end when no durable store is configured.
pub struct InMemoryChannelsRepository {
    namespaces: Mutex<HashMap<Role, Namespace>>,
}

impl Default for InMemoryChannelsRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannelsRepository {
    pub fn new() -> Self {
        Self { namespaces: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl ChannelsRepository for InMemoryChannelsRepository {
    async fn save(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces.entry(role).or_default();
        if ns.by_id.contains_key(&channel.channel_id) {
            return Err(CoreError::Conflict(format!(
                "channel {} already exists",
                channel.channel_id
            )));
        }
        ns.insertion_order.push(channel.channel_id);
        ns.by_id.insert(channel.channel_id, channel);
        Ok(())
    }

    async fn save_or_update(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces.entry(role).or_default();
        match ns.by_id.get_mut(&channel.channel_id) {
            Some(existing) => {
                if channel.spent < existing.spent {
                    return Err(CoreError::InvalidPayment(
                        "spend must be monotonically non-decreasing".into(),
                    ));
                }
                existing.spent = channel.spent;
            }
            None => {
                ns.insertion_order.push(channel.channel_id);
                ns.by_id.insert(channel.channel_id, channel);
            }
        }
        Ok(())
    }

    async fn first_by_id(&self, role: Role, channel_id: ChannelId) -> Result<Option<PaymentChannel>> {
        let namespaces = self.namespaces.lock().await;
        Ok(namespaces.get(&role).and_then(|ns| ns.by_id.get(&channel_id).cloned()))
    }

    async fn spend(&self, role: Role, channel_id: ChannelId, new_spent: U256) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces
            .get_mut(&role)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let record = ns
            .by_id
            .get_mut(&channel_id)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        if new_spent < record.spent {
            return Err(CoreError::InvalidPayment(
                "spend must be monotonically non-decreasing".into(),
            ));
        }
        record.spent = new_spent;
        Ok(())
    }

    async fn deposit(&self, role: Role, channel_id: ChannelId, delta: U256) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces
            .get_mut(&role)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let record = ns
            .by_id
            .get_mut(&channel_id)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        record.value += delta;
        Ok(())
    }

    async fn update_state(&self, role: Role, channel_id: ChannelId, state: ChannelState) -> Result<()> {
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces
            .get_mut(&role)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let record = ns
            .by_id
            .get_mut(&channel_id)
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        record.state = state;
        Ok(())
    }

    async fn all(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        let namespaces = self.namespaces.lock().await;
        Ok(namespaces
            .get(&role)
            .map(|ns| ns.insertion_order.iter().filter_map(|id| ns.by_id.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn all_open(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        Ok(self.all(role).await?.into_iter().filter(|c| c.is_open()).collect())
    }

    async fn all_settling(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        Ok(self.all(role).await?.into_iter().filter(|c| c.is_settling()).collect())
    }

    async fn find_usable(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
        amount: U256,
    ) -> Result<Option<PaymentChannel>> {
        Ok(self
            .all(role)
            .await?
            .into_iter()
            .find(|c| c.sender == sender && c.receiver == receiver && c.is_open() && c.remaining() >= amount))
    }

    async fn find_by_sender_receiver(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
    ) -> Result<Vec<PaymentChannel>> {
        Ok(self
            .all(role)
            .await?
            .into_iter()
            .filter(|c| c.sender == sender && c.receiver == receiver)
            .collect())
    }

    async fn find_by_sender_receiver_channel_id(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
        channel_id: ChannelId,
    ) -> Result<Option<PaymentChannel>> {
        Ok(self
            .first_by_id(role, channel_id)
            .await?
            .filter(|c| c.sender == sender && c.receiver == receiver))
    }
}

/// In-memory `PaymentsRepository`, used for tests and as the default
/// embedded back-end.
#[derive(Default)]
pub struct InMemoryPaymentsRepository {
    by_token: Mutex<HashMap<String, Payment>>,
    by_channel: Mutex<HashMap<ChannelId, Vec<Payment>>>,
}

impl InMemoryPaymentsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentsRepository for InMemoryPaymentsRepository {
    async fn save(&self, payment: Payment) -> Result<()> {
        let channel_id = payment.channel_id;
        if let Some(token) = payment.token.clone() {
            self.by_token.lock().await.insert(token, payment.clone());
        }
        self.by_channel.lock().await.entry(channel_id).or_default().push(payment);
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        Ok(self.by_token.lock().await.get(token).cloned())
    }

    async fn find_by_channel_id(&self, channel_id: ChannelId) -> Result<Vec<Payment>> {
        Ok(self.by_channel.lock().await.get(&channel_id).cloned().unwrap_or_default())
    }
}

/// Shared handle constructors so manager code can depend on `Arc<dyn Trait>`
/// without caring which back-end is wired up.
pub type SharedChannelsRepository = Arc<dyn ChannelsRepository>;
pub type SharedPaymentsRepository = Arc<dyn PaymentsRepository>;

pub mod sqlx_store;
pub mod sled_store;

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn sample(channel_id: ChannelId, sender: Address, receiver: Address, value: u64, spent: u64) -> PaymentChannel {
        PaymentChannel {
            channel_id,
            sender,
            receiver,
            value: U256::from(value),
            spent: U256::from(spent),
            state: ChannelState::Open,
            contract_address: address!("0000000000000000000000000000000000000001"),
            contract_kind: crate::model::ContractKind::Native,
        }
    }

    #[tokio::test]
    async fn spend_rejects_values_lower_than_stored() {
        let repo = InMemoryChannelsRepository::new();
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");
        let channel_id = ChannelId::from([0x01; 32]);

        repo.save(Role::Sender, sample(channel_id, sender, receiver, 1000, 100)).await.unwrap();
        repo.spend(Role::Sender, channel_id, U256::from(200u64)).await.unwrap();

        let err = repo.spend(Role::Sender, channel_id, U256::from(150u64)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayment(_)));

        let record = repo.first_by_id(Role::Sender, channel_id).await.unwrap().unwrap();
        assert_eq!(record.spent, U256::from(200u64));
    }

    #[tokio::test]
    async fn find_usable_ties_break_by_earliest_insertion() {
        let repo = InMemoryChannelsRepository::new();
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");
        let first = ChannelId::from([0x01; 32]);
        let second = ChannelId::from([0x02; 32]);

        repo.save(Role::Sender, sample(first, sender, receiver, 1000, 0)).await.unwrap();
        repo.save(Role::Sender, sample(second, sender, receiver, 1000, 0)).await.unwrap();

        let found = repo.find_usable(Role::Sender, sender, receiver, U256::from(500u64)).await.unwrap().unwrap();
        assert_eq!(found.channel_id, first);
    }

    #[tokio::test]
    async fn find_usable_skips_channels_without_capacity() {
        let repo = InMemoryChannelsRepository::new();
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");
        let depleted = ChannelId::from([0x01; 32]);
        let usable = ChannelId::from([0x02; 32]);

        repo.save(Role::Sender, sample(depleted, sender, receiver, 1000, 950)).await.unwrap();
        repo.save(Role::Sender, sample(usable, sender, receiver, 1000, 0)).await.unwrap();

        let found = repo.find_usable(Role::Sender, sender, receiver, U256::from(500u64)).await.unwrap().unwrap();
        assert_eq!(found.channel_id, usable);
    }

    #[tokio::test]
    async fn roles_are_namespaced_independently() {
        let repo = InMemoryChannelsRepository::new();
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");
        let channel_id = ChannelId::from([0x01; 32]);

        repo.save(Role::Sender, sample(channel_id, sender, receiver, 1000, 0)).await.unwrap();

        assert!(repo.first_by_id(Role::Receiver, channel_id).await.unwrap().is_none());
        assert!(repo.first_by_id(Role::Sender, channel_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn save_rejects_duplicate_channel_id_in_same_role() {
        let repo = InMemoryChannelsRepository::new();
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");
        let channel_id = ChannelId::from([0x01; 32]);

        repo.save(Role::Sender, sample(channel_id, sender, receiver, 1000, 0)).await.unwrap();
        let err = repo.save(Role::Sender, sample(channel_id, sender, receiver, 1000, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn payments_repository_indexes_by_token_and_channel() {
        let repo = InMemoryPaymentsRepository::new();
        let channel_id = ChannelId::from([0x01; 32]);
        let sender = address!("0000000000000000000000000000000000000002");
        let receiver = address!("0000000000000000000000000000000000000003");

        let payment = Payment {
            channel_id,
            sender,
            receiver,
            contract_address: address!("0000000000000000000000000000000000000001"),
            value: U256::from(1000u64),
            price: U256::from(100u64),
            channel_value: U256::from(1000u64),
            cumulative: U256::from(100u64),
            signature: "0x".to_string(),
            meta: None,
            token: Some("tok-1".to_string()),
        };
        repo.save(payment.clone()).await.unwrap();

        assert_eq!(repo.find_by_token("tok-1").await.unwrap().unwrap().cumulative, U256::from(100u64));
        assert_eq!(repo.find_by_channel_id(channel_id).await.unwrap().len(), 1);
        assert!(repo.find_by_token("missing").await.unwrap().is_none());
    }
}
