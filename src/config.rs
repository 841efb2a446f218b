use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";
const TESTNET_API_URL: &str = "https://api.hyperliquid-testnet.xyz";
const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Mainnet)
    }

    fn api_url(&self) -> &'static str {
        match self {
            Network::Mainnet => MAINNET_API_URL,
            Network::Testnet => TESTNET_API_URL,
        }
    }

    fn ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => MAINNET_WS_URL,
            Network::Testnet => TESTNET_WS_URL,
        }
    }
}

impl FromStr for Network {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(AppError::ConfigError(format!(
                "HYPERLIQUID_NETWORK must be mainnet or testnet, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub info_url: String,
    pub exchange_url: String,
    pub ws_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub dashboard_coin: String,
    pub dashboard_poll_interval: Duration,
    pub feed_buffer_size: usize,
    pub feed_heartbeat: Duration,
    pub response_history_size: usize,
    pub form_store_path: PathBuf,
    pub signer_url: Option<String>,
    pub vault_address: Option<String>,
    pub http_timeout: Duration,
}

impl Config {
    /// Reads configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a local `.env`.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let network = match get("HYPERLIQUID_NETWORK") {
            Some(raw) => raw.parse()?,
            None => Network::Mainnet,
        };

        let api_url = get("HYPERLIQUID_API_URL")
            .unwrap_or_else(|| network.api_url().to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let info_url = get("HYPERLIQUID_INFO_URL").unwrap_or_else(|| format!("{api_url}/info"));
        let exchange_url = format!("{api_url}/exchange");
        let ws_url = get("HYPERLIQUID_WS_URL").unwrap_or_else(|| network.ws_url().to_string());

        let dashboard_poll_ms: u64 = parse_or(&get, "DASHBOARD_POLL_MS", 5000)?;
        if dashboard_poll_ms == 0 {
            return Err(AppError::ConfigError(
                "DASHBOARD_POLL_MS must be greater than zero".to_string(),
            ));
        }

        let feed_buffer_size: usize = parse_or(&get, "FEED_BUFFER_SIZE", 200)?;
        let feed_heartbeat_secs: u64 = parse_or(&get, "FEED_HEARTBEAT_SECS", 50)?;
        if feed_heartbeat_secs == 0 {
            return Err(AppError::ConfigError(
                "FEED_HEARTBEAT_SECS must be greater than zero".to_string(),
            ));
        }
        let response_history_size: usize = parse_or(&get, "RESPONSE_HISTORY_SIZE", 50)?;
        if feed_buffer_size == 0 || response_history_size == 0 {
            return Err(AppError::ConfigError(
                "FEED_BUFFER_SIZE and RESPONSE_HISTORY_SIZE must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(Self {
            network,
            info_url,
            exchange_url,
            ws_url,
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&get, "SERVER_PORT", 8081)?,
            dashboard_coin: get("DASHBOARD_COIN").unwrap_or_else(|| "BTC".to_string()),
            dashboard_poll_interval: Duration::from_millis(dashboard_poll_ms),
            feed_buffer_size,
            feed_heartbeat: Duration::from_secs(feed_heartbeat_secs),
            response_history_size,
            form_store_path: get("FORM_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".playground_forms.json")),
            signer_url: get("SIGNER_URL"),
            vault_address: get("VAULT_ADDRESS"),
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppResult<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_target_mainnet() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.info_url, "https://api.hyperliquid.xyz/info");
        assert_eq!(config.exchange_url, "https://api.hyperliquid.xyz/exchange");
        assert_eq!(config.ws_url, "wss://api.hyperliquid.xyz/ws");
        assert_eq!(config.dashboard_coin, "BTC");
        assert_eq!(config.dashboard_poll_interval, Duration::from_secs(5));
        assert_eq!(config.listen_addr(), "0.0.0.0:8081");
        assert_eq!(config.feed_heartbeat, Duration::from_secs(50));
        assert!(config.signer_url.is_none());
    }

    #[test]
    fn testnet_switches_default_urls() {
        let config = config_from(&[("HYPERLIQUID_NETWORK", "Testnet")]).unwrap();
        assert_eq!(config.info_url, "https://api.hyperliquid-testnet.xyz/info");
        assert_eq!(config.ws_url, "wss://api.hyperliquid-testnet.xyz/ws");
    }

    #[test]
    fn info_url_override_wins() {
        let config = config_from(&[
            ("HYPERLIQUID_API_URL", "http://localhost:3001/"),
            ("HYPERLIQUID_INFO_URL", "http://localhost:9999/info"),
        ])
        .unwrap();
        assert_eq!(config.info_url, "http://localhost:9999/info");
        assert_eq!(config.exchange_url, "http://localhost:3001/exchange");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("HYPERLIQUID_NETWORK", "devnet")]).is_err());
        assert!(config_from(&[("SERVER_PORT", "eighty")]).is_err());
        assert!(config_from(&[("DASHBOARD_POLL_MS", "0")]).is_err());
        assert!(config_from(&[("FEED_HEARTBEAT_SECS", "0")]).is_err());
    }
}
