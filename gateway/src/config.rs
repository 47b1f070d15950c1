// config.rs - Load configuration from environment variables

use alloy::primitives::Address;
use std::{env::var, num::ParseIntError};

/// Which storage back-end to bind the repositories to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// In-process `sled` tree, located by `database_file` on disk.
    Embedded,
    /// Postgres, `database_file` holds the connection string.
    Postgres,
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" | "sled" => Ok(Engine::Embedded),
            "postgres" | "sqlx" => Ok(Engine::Postgres),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server listens on.
    pub port: u16,

    /// Which repository back-end to bind.
    pub engine: Engine,

    /// Storage locator: a `sled` directory path for `Embedded`, a
    /// connection string for `Postgres`.
    pub database_file: String,

    /// Floor on fresh channel deposits.
    pub minimum_channel_amount: alloy::primitives::U256,

    /// Blocks of delay between `startSettling` and `settle`.
    pub settlement_period: u32,

    /// Blockchain RPC endpoint.
    pub rpc_url: String,

    /// Chain ID, carried for parity with the wallet's signing context.
    pub chain_id: u64,

    /// This gateway's own signing key (hex string with `0x` prefix).
    pub gateway_private_key: String,

    /// Address of the channel-manager contract this gateway serves.
    pub channel_manager: Address,

    /// `Some(token)` selects the ERC20 variant; `None` selects native-coin.
    pub token_contract: Option<Address>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let token_contract = match var("TOKEN_CONTRACT") {
            Ok(v) if !v.is_empty() => {
                Some(v.parse().map_err(|e| format!("invalid token contract address: {e}"))?)
            }
            _ => None,
        };

        Ok(Config {
            port: get_env("PORT")?.parse().map_err(|e: ParseIntError| e.to_string())?,
            engine: get_env("ENGINE")?.parse()?,
            database_file: get_env("DATABASE_FILE")?,
            minimum_channel_amount: get_env("MINIMUM_CHANNEL_AMOUNT")?
                .parse()
                .map_err(|e| format!("invalid minimum channel amount: {e}"))?,
            settlement_period: get_env("SETTLEMENT_PERIOD")?
                .parse()
                .map_err(|e: ParseIntError| e.to_string())?,
            rpc_url: get_env("RPC_URL")?,
            chain_id: get_env("CHAIN_ID")?.parse().map_err(|e: ParseIntError| e.to_string())?,
            gateway_private_key: get_env("GATEWAY_PRIVATE_KEY")?,
            channel_manager: get_env("CHANNEL_MANAGER")?
                .parse()
                .map_err(|e| format!("invalid channel manager address: {e}"))?,
            token_contract,
        })
    }
}

fn get_env(key: &str) -> Result<String, String> {
    var(key).map_err(|_| format!("Missing environment variable: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_file() {
        dotenvy::from_filename(".env").expect("Failed to load .env file");

        let config = Config::from_env().expect("Failed to load config from .env file");

        assert_eq!(config.port, 4001);
        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.engine, Engine::Embedded);
        assert_eq!(
            config.channel_manager,
            "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse::<Address>().unwrap()
        );
    }
}
