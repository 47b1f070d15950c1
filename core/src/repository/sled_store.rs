//! Embedded document-store-backed repositories via `sled`.
//!
//! The spec's persistence section names a choice between "an embedded
//! document store vs. network database"; `sled` is the real embedded-KV
//! crate filling that role opposite [`super::sqlx_store`]'s Postgres
//! back-end. Each record is stored as JSON bytes, matching the
//! document-store framing in the spec rather than a relational schema.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::model::{ChannelId, ChannelState, Payment, PaymentChannel};

use super::{ChannelsRepository, PaymentsRepository, Role};

pub struct SledChannelsRepository {
    tree: sled::Tree,
}

impl SledChannelsRepository {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db
            .open_tree("paychan_channels")
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(Self { tree })
    }

    fn key(role: Role, channel_id: ChannelId) -> Vec<u8> {
        let mut key = Vec::with_capacity(9 + 32);
        key.extend_from_slice(role_tag(role));
        key.extend_from_slice(channel_id.as_slice());
        key
    }

    fn get(&self, role: Role, channel_id: ChannelId) -> Result<Option<PaymentChannel>> {
        let bytes = self
            .tree
            .get(Self::key(role, channel_id))
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        bytes
            .map(|b| serde_json::from_slice(&b).map_err(|e| CoreError::StorageError(e.to_string())))
            .transpose()
    }

    fn put(&self, role: Role, channel: &PaymentChannel) -> Result<()> {
        let bytes = serde_json::to_vec(channel).map_err(|e| CoreError::StorageError(e.to_string()))?;
        self.tree
            .insert(Self::key(role, channel.channel_id), bytes)
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    fn scan(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        let prefix = role_tag(role);
        self.tree
            .scan_prefix(prefix)
            .map(|entry| {
                let (_, bytes) = entry.map_err(|e| CoreError::StorageError(e.to_string()))?;
                serde_json::from_slice(&bytes).map_err(|e| CoreError::StorageError(e.to_string()))
            })
            .collect()
    }
}

fn role_tag(role: Role) -> &'static [u8] {
    match role {
        Role::Sender => b"sender::",
        Role::Receiver => b"receiver",
    }
}

#[async_trait]
impl ChannelsRepository for SledChannelsRepository {
    async fn save(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        if self.get(role, channel.channel_id)?.is_some() {
            return Err(CoreError::Conflict(format!("channel {} already exists", channel.channel_id)));
        }
        self.put(role, &channel)
    }

    async fn save_or_update(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        match self.get(role, channel.channel_id)? {
            Some(existing) if channel.spent < existing.spent => Err(CoreError::InvalidPayment(
                "spend must be monotonically non-decreasing".into(),
            )),
            _ => self.put(role, &channel),
        }
    }

    async fn first_by_id(&self, role: Role, channel_id: ChannelId) -> Result<Option<PaymentChannel>> {
        self.get(role, channel_id)
    }

    async fn spend(&self, role: Role, channel_id: ChannelId, new_spent: U256) -> Result<()> {
        let mut record = self
            .get(role, channel_id)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        if new_spent < record.spent {
            return Err(CoreError::InvalidPayment(
                "spend must be monotonically non-decreasing".into(),
            ));
        }
        record.spent = new_spent;
        self.put(role, &record)
    }

    async fn deposit(&self, role: Role, channel_id: ChannelId, delta: U256) -> Result<()> {
        let mut record = self
            .get(role, channel_id)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        record.value += delta;
        self.put(role, &record)
    }

    async fn update_state(&self, role: Role, channel_id: ChannelId, state: ChannelState) -> Result<()> {
        let mut record = self
            .get(role, channel_id)?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        record.state = state;
        self.put(role, &record)
    }

    async fn all(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        self.scan(role)
    }

    async fn all_open(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        Ok(self.scan(role)?.into_iter().filter(|c| c.is_open()).collect())
    }

    async fn all_settling(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        Ok(self.scan(role)?.into_iter().filter(|c| c.is_settling()).collect())
    }

    async fn find_usable(
        &self,
        role: Role,
        sender: Address,
        receiver: Address,
        amount: U256,
    ) -> Result<Option<PaymentChannel>> {
        Ok(self
            .scan(role)?
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
            .scan(role)?
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
        Ok(self.get(role, channel_id)?.filter(|c| c.sender == sender && c.receiver == receiver))
    }
}

pub struct SledPaymentsRepository {
    by_token: sled::Tree,
    by_channel: sled::Tree,
}

impl SledPaymentsRepository {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let by_token = db
            .open_tree("paychan_payments_by_token")
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        let by_channel = db
            .open_tree("paychan_payments_by_channel")
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(Self { by_token, by_channel })
    }
}

#[async_trait]
impl PaymentsRepository for SledPaymentsRepository {
    async fn save(&self, payment: Payment) -> Result<()> {
        let bytes = serde_json::to_vec(&payment).map_err(|e| CoreError::StorageError(e.to_string()))?;
        if let Some(token) = &payment.token {
            self.by_token
                .insert(token.as_bytes(), bytes.clone())
                .map_err(|e| CoreError::StorageError(e.to_string()))?;
        }
        let mut existing: Vec<Payment> = self
            .by_channel
            .get(payment.channel_id.as_slice())
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .map(|b| serde_json::from_slice(&b))
            .transpose()
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .unwrap_or_default();
        existing.push(payment.clone());
        let bytes = serde_json::to_vec(&existing).map_err(|e| CoreError::StorageError(e.to_string()))?;
        self.by_channel
            .insert(payment.channel_id.as_slice(), bytes)
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        self.by_token
            .get(token.as_bytes())
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .map(|b| serde_json::from_slice(&b).map_err(|e| CoreError::StorageError(e.to_string())))
            .transpose()
    }

    async fn find_by_channel_id(&self, channel_id: ChannelId) -> Result<Vec<Payment>> {
        self.by_channel
            .get(channel_id.as_slice())
            .map_err(|e| CoreError::StorageError(e.to_string()))?
            .map(|b| serde_json::from_slice(&b).map_err(|e| CoreError::StorageError(e.to_string())))
            .transpose()
            .map(|opt| opt.unwrap_or_default())
    }
}
