// main.rs - Entry point for the payment channel gateway (receiver side)

use std::net::SocketAddr;
use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use paychan_core::contract::AlloyContractAdapter;
use paychan_core::repository::sled_store::{SledChannelsRepository, SledPaymentsRepository};
use paychan_core::repository::sqlx_store::{self, SqlxChannelsRepository, SqlxPaymentsRepository};
use paychan_core::{ChannelManager, ChannelsRepository, ContractKind, ManagerConfig, PaymentsRepository, Role};
use tracing::info;

use paychan_gateway::config::{Config, Engine};
use paychan_gateway::handlers::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let port = config.port;

    let read_provider = Arc::new(ProviderBuilder::new().disable_recommended_fillers().connect_http(config.rpc_url.parse()?));
    info!(chain_id = config.chain_id, "connected read-only provider");

    let contract_kind = match config.token_contract {
        Some(token) => ContractKind::Token(token),
        None => ContractKind::Native,
    };

    let adapter = Arc::new(AlloyContractAdapter::new(
        config.rpc_url.clone(),
        config.channel_manager,
        contract_kind,
        read_provider.clone(),
    ));

    let gateway_signer: PrivateKeySigner = config.gateway_private_key.parse()?;
    let gateway_address = gateway_signer.address();
    info!(%gateway_address, "gateway signer loaded");

    let (channels, payments): (
        Arc<dyn ChannelsRepository>,
        Arc<dyn PaymentsRepository>,
    ) = match config.engine {
        Engine::Embedded => {
            let db = sled::open(&config.database_file)?;
            (
                Arc::new(SledChannelsRepository::new(&db)?),
                Arc::new(SledPaymentsRepository::new(&db)?),
            )
        }
        Engine::Postgres => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&config.database_file)
                .await?;
            sqlx_store::init_schema(&pool).await?;
            (
                Arc::new(SqlxChannelsRepository::new(pool.clone())),
                Arc::new(SqlxPaymentsRepository::new(pool)),
            )
        }
    };

    let manager_config = ManagerConfig {
        minimum_channel_amount: config.minimum_channel_amount,
        deposit_multiplier: ManagerConfig::default_multiplier(),
        settling_period_blocks: config.settlement_period,
        contract_address: config.channel_manager,
        contract_kind,
    };

    let manager = Arc::new(ChannelManager::new(
        Role::Receiver,
        gateway_signer,
        channels,
        payments.clone(),
        adapter,
        manager_config,
    ));

    let config = Arc::new(config);
    let state = AppState { manager, payments, config };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
