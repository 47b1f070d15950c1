//! `paychan-buyer`: a minimal sender-side CLI over the Client Facade.
//!
//! Fetches a resource URL; on a `402 Payment Required` response it opens (or
//! reuses) a channel to the receiver named in the challenge, signs the next
//! payment promise, and POSTs it to the gateway named in the challenge,
//! printing the token it receives back. Exercises the sender half of
//! `ClientFacade::buy_url` the same way `paychan-gateway` exercises the
//! receiver half of `ChannelManager::accept_payment`.

use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use paychan_core::contract::AlloyContractAdapter;
use paychan_core::repository::sled_store::{SledChannelsRepository, SledPaymentsRepository};
use paychan_core::repository::sqlx_store::{self, SqlxChannelsRepository, SqlxPaymentsRepository};
use paychan_core::{ChannelManager, ChannelsRepository, ContractKind, ManagerConfig, PaymentsRepository, Role};
use tracing::info;

use paychan_gateway::config::{Config, Engine};
use paychan_gateway::facade::ClientFacade;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .ok_or("usage: paychan-buyer <resource-url>")?;

    let config = Config::from_env()?;

    let read_provider = Arc::new(ProviderBuilder::new().disable_recommended_fillers().connect_http(config.rpc_url.parse()?));
    let contract_kind = match config.token_contract {
        Some(token) => ContractKind::Token(token),
        None => ContractKind::Native,
    };
    let adapter = Arc::new(AlloyContractAdapter::new(
        config.rpc_url.clone(),
        config.channel_manager,
        contract_kind,
        read_provider,
    ));

    let signer: PrivateKeySigner = config.gateway_private_key.parse()?;
    info!(sender = %signer.address(), "buyer signer loaded");

    let (channels, payments): (Arc<dyn ChannelsRepository>, Arc<dyn PaymentsRepository>) = match config.engine {
        Engine::Embedded => {
            let db = sled::open(&config.database_file)?;
            (Arc::new(SledChannelsRepository::new(&db)?), Arc::new(SledPaymentsRepository::new(&db)?))
        }
        Engine::Postgres => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.database_file)
                .await?;
            sqlx_store::init_schema(&pool).await?;
            (Arc::new(SqlxChannelsRepository::new(pool.clone())), Arc::new(SqlxPaymentsRepository::new(pool)))
        }
    };

    let manager_config = ManagerConfig {
        minimum_channel_amount: config.minimum_channel_amount,
        deposit_multiplier: ManagerConfig::default_multiplier(),
        settling_period_blocks: config.settlement_period,
        contract_address: config.channel_manager,
        contract_kind,
    };

    let manager = Arc::new(ChannelManager::new(Role::Sender, signer, channels, payments, adapter, manager_config));
    let facade = ClientFacade::new(manager);

    let token = facade.buy_url(&url).await?;
    println!("{token}");

    Ok(())
}
