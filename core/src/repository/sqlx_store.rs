//! Postgres-backed repositories via `sqlx`.
//!
//! Mirrors the upsert-on-conflict pattern used for Postgres-backed state
//! stores: `CREATE TABLE IF NOT EXISTS` at startup, `INSERT ... ON CONFLICT
//! ... DO UPDATE` upserts, and `Row::try_get` column extraction. Amounts and
//! addresses are stored as text (hex/decimal), since Postgres has no native
//! 256-bit integer type.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{CoreError, Result};
use crate::model::{ChannelId, ChannelState, ContractKind, Payment, PaymentChannel};

use super::{ChannelsRepository, PaymentsRepository, Role};

/// Creates the tables this repository needs if they don't already exist.
/// Safe to call on every startup; table creation is idempotent.
pub async fn init_schema(db: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS paychan_channels (\
            role TEXT NOT NULL,\
            channel_id TEXT NOT NULL,\
            sender TEXT NOT NULL,\
            receiver TEXT NOT NULL,\
            value TEXT NOT NULL,\
            spent TEXT NOT NULL,\
            state SMALLINT NOT NULL,\
            contract_address TEXT NOT NULL,\
            contract_kind TEXT NOT NULL,\
            insertion_seq BIGSERIAL,\
            PRIMARY KEY (role, channel_id)\
        )",
    )
    .execute(db)
    .await
    .map_err(|e| CoreError::StorageError(e.to_string()))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS paychan_payments (\
            token TEXT,\
            channel_id TEXT NOT NULL,\
            sender TEXT NOT NULL,\
            receiver TEXT NOT NULL,\
            contract_address TEXT NOT NULL,\
            value TEXT NOT NULL,\
            price TEXT NOT NULL,\
            channel_value TEXT NOT NULL,\
            cumulative TEXT NOT NULL,\
            signature TEXT NOT NULL,\
            meta TEXT\
        )",
    )
    .execute(db)
    .await
    .map_err(|e| CoreError::StorageError(e.to_string()))?;

    Ok(())
}

pub struct SqlxChannelsRepository {
    db: PgPool,
}

impl SqlxChannelsRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn encode_kind(kind: ContractKind) -> String {
    match kind {
        ContractKind::Native => "native".to_string(),
        ContractKind::Token(addr) => format!("token:0x{addr:x}"),
    }
}

fn decode_kind(text: &str) -> Result<ContractKind> {
    if text == "native" {
        return Ok(ContractKind::Native);
    }
    let hex = text
        .strip_prefix("token:")
        .ok_or_else(|| CoreError::StorageError(format!("malformed contract_kind: {text}")))?;
    let addr: Address = hex
        .parse()
        .map_err(|e| CoreError::StorageError(format!("malformed token address: {e}")))?;
    Ok(ContractKind::Token(addr))
}

fn decode_state(value: i16) -> Result<ChannelState> {
    match value {
        0 => Ok(ChannelState::Open),
        1 => Ok(ChannelState::Settling),
        2 => Ok(ChannelState::Absent),
        other => Err(CoreError::StorageError(format!("unknown channel state {other}"))),
    }
}

fn row_to_channel(row: &sqlx::postgres::PgRow) -> Result<PaymentChannel> {
    let channel_id: String = row.try_get("channel_id").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let sender: String = row.try_get("sender").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let receiver: String = row.try_get("receiver").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let value: String = row.try_get("value").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let spent: String = row.try_get("spent").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let state: i16 = row.try_get("state").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let contract_address: String =
        row.try_get("contract_address").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let contract_kind: String =
        row.try_get("contract_kind").map_err(|e| CoreError::StorageError(e.to_string()))?;

    Ok(PaymentChannel {
        channel_id: channel_id.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        sender: sender.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        receiver: receiver.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        value: U256::from_str_radix(&value, 10).map_err(|e| CoreError::StorageError(format!("{e}")))?,
        spent: U256::from_str_radix(&spent, 10).map_err(|e| CoreError::StorageError(format!("{e}")))?,
        state: decode_state(state)?,
        contract_address: contract_address.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        contract_kind: decode_kind(&contract_kind)?,
    })
}

#[async_trait]
impl ChannelsRepository for SqlxChannelsRepository {
    async fn save(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT channel_id FROM paychan_channels WHERE role = $1 AND channel_id = $2")
                .bind(role_str(role))
                .bind(format!("0x{:x}", channel.channel_id))
                .fetch_optional(&self.db)
                .await
                .map_err(|e| CoreError::StorageError(e.to_string()))?;
        if existing.is_some() {
            return Err(CoreError::Conflict(format!("channel {} already exists", channel.channel_id)));
        }
        insert_or_update(&self.db, role, &channel).await
    }

    async fn save_or_update(&self, role: Role, channel: PaymentChannel) -> Result<()> {
        if let Some(existing) = self.first_by_id(role, channel.channel_id).await? {
            if channel.spent < existing.spent {
                return Err(CoreError::InvalidPayment(
                    "spend must be monotonically non-decreasing".into(),
                ));
            }
            self.spend(role, channel.channel_id, channel.spent).await
        } else {
            insert_or_update(&self.db, role, &channel).await
        }
    }

    async fn first_by_id(&self, role: Role, channel_id: ChannelId) -> Result<Option<PaymentChannel>> {
        let row = sqlx::query("SELECT * FROM paychan_channels WHERE role = $1 AND channel_id = $2")
            .bind(role_str(role))
            .bind(format!("0x{channel_id:x}"))
            .fetch_optional(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        row.as_ref().map(row_to_channel).transpose()
    }

    async fn spend(&self, role: Role, channel_id: ChannelId, new_spent: U256) -> Result<()> {
        let current = self
            .first_by_id(role, channel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        if new_spent < current.spent {
            return Err(CoreError::InvalidPayment(
                "spend must be monotonically non-decreasing".into(),
            ));
        }
        sqlx::query("UPDATE paychan_channels SET spent = $1 WHERE role = $2 AND channel_id = $3")
            .bind(new_spent.to_string())
            .bind(role_str(role))
            .bind(format!("0x{channel_id:x}"))
            .execute(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn deposit(&self, role: Role, channel_id: ChannelId, delta: U256) -> Result<()> {
        let current = self
            .first_by_id(role, channel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("channel {channel_id}")))?;
        let new_value = current.value + delta;
        sqlx::query("UPDATE paychan_channels SET value = $1 WHERE role = $2 AND channel_id = $3")
            .bind(new_value.to_string())
            .bind(role_str(role))
            .bind(format!("0x{channel_id:x}"))
            .execute(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn update_state(&self, role: Role, channel_id: ChannelId, state: ChannelState) -> Result<()> {
        sqlx::query("UPDATE paychan_channels SET state = $1 WHERE role = $2 AND channel_id = $3")
            .bind(state as i16)
            .bind(role_str(role))
            .bind(format!("0x{channel_id:x}"))
            .execute(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn all(&self, role: Role) -> Result<Vec<PaymentChannel>> {
        let rows = sqlx::query("SELECT * FROM paychan_channels WHERE role = $1 ORDER BY insertion_seq")
            .bind(role_str(role))
            .fetch_all(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        rows.iter().map(row_to_channel).collect()
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

async fn insert_or_update(db: &PgPool, role: Role, channel: &PaymentChannel) -> Result<()> {
    sqlx::query(
        "INSERT INTO paychan_channels \
            (role, channel_id, sender, receiver, value, spent, state, contract_address, contract_kind) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (role, channel_id) DO UPDATE SET \
            value = EXCLUDED.value, \
            spent = EXCLUDED.spent, \
            state = EXCLUDED.state",
    )
    .bind(role_str(role))
    .bind(format!("0x{:x}", channel.channel_id))
    .bind(format!("0x{:x}", channel.sender))
    .bind(format!("0x{:x}", channel.receiver))
    .bind(channel.value.to_string())
    .bind(channel.spent.to_string())
    .bind(channel.state as i16)
    .bind(format!("0x{:x}", channel.contract_address))
    .bind(encode_kind(channel.contract_kind))
    .execute(db)
    .await
    .map_err(|e| CoreError::StorageError(e.to_string()))?;
    Ok(())
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Sender => "sender",
        Role::Receiver => "receiver",
    }
}

pub struct SqlxPaymentsRepository {
    db: PgPool,
}

impl SqlxPaymentsRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PaymentsRepository for SqlxPaymentsRepository {
    async fn save(&self, payment: Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO paychan_payments \
                (token, channel_id, sender, receiver, contract_address, value, price, channel_value, cumulative, signature, meta) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(payment.token.clone())
        .bind(format!("0x{:x}", payment.channel_id))
        .bind(format!("0x{:x}", payment.sender))
        .bind(format!("0x{:x}", payment.receiver))
        .bind(format!("0x{:x}", payment.contract_address))
        .bind(payment.value.to_string())
        .bind(payment.price.to_string())
        .bind(payment.channel_value.to_string())
        .bind(payment.cumulative.to_string())
        .bind(payment.signature.clone())
        .bind(payment.meta.clone())
        .execute(&self.db)
        .await
        .map_err(|e| CoreError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM paychan_payments WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn find_by_channel_id(&self, channel_id: ChannelId) -> Result<Vec<Payment>> {
        let rows = sqlx::query("SELECT * FROM paychan_payments WHERE channel_id = $1")
            .bind(format!("0x{channel_id:x}"))
            .fetch_all(&self.db)
            .await
            .map_err(|e| CoreError::StorageError(e.to_string()))?;
        rows.iter().map(row_to_payment).collect()
    }
}

fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment> {
    let channel_id: String = row.try_get("channel_id").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let sender: String = row.try_get("sender").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let receiver: String = row.try_get("receiver").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let contract_address: String =
        row.try_get("contract_address").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let value: String = row.try_get("value").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let price: String = row.try_get("price").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let channel_value: String =
        row.try_get("channel_value").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let cumulative: String = row.try_get("cumulative").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let signature: String = row.try_get("signature").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let meta: Option<String> = row.try_get("meta").map_err(|e| CoreError::StorageError(e.to_string()))?;
    let token: Option<String> = row.try_get("token").map_err(|e| CoreError::StorageError(e.to_string()))?;

    Ok(Payment {
        channel_id: channel_id.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        sender: sender.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        receiver: receiver.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        contract_address: contract_address.parse().map_err(|e| CoreError::StorageError(format!("{e}")))?,
        value: U256::from_str_radix(&value, 10).map_err(|e| CoreError::StorageError(format!("{e}")))?,
        price: U256::from_str_radix(&price, 10).map_err(|e| CoreError::StorageError(format!("{e}")))?,
        channel_value: U256::from_str_radix(&channel_value, 10)
            .map_err(|e| CoreError::StorageError(format!("{e}")))?,
        cumulative: U256::from_str_radix(&cumulative, 10).map_err(|e| CoreError::StorageError(format!("{e}")))?,
        signature,
        meta,
        token,
    })
}
