use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};

/// ECDSA signature over an action, as the exchange endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

/// Produces signatures for exchange actions. Keys never live in this process;
/// implementations hand the action to an external wallet.
#[async_trait]
pub trait ActionSigner: Send + Sync {
    async fn sign(
        &self,
        action: &Value,
        nonce: u64,
        vault_address: Option<&str>,
    ) -> AppResult<ActionSignature>;
}

/// Delegates signing to a wallet bridge over HTTP.
///
/// The bridge receives `{ action, nonce, vaultAddress, isMainnet }` and
/// answers `{ signature: { r, s, v } }`.
#[derive(Clone)]
pub struct RemoteSigner {
    client: Client,
    url: String,
    is_mainnet: bool,
}

#[derive(Deserialize)]
struct SignerResponse {
    signature: ActionSignature,
}

impl RemoteSigner {
    pub fn new(url: &str, is_mainnet: bool, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            is_mainnet,
        })
    }
}

#[async_trait]
impl ActionSigner for RemoteSigner {
    #[instrument(skip(self, action))]
    async fn sign(
        &self,
        action: &Value,
        nonce: u64,
        vault_address: Option<&str>,
    ) -> AppResult<ActionSignature> {
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "vaultAddress": vault_address,
            "isMainnet": self.is_mainnet,
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError {
                status: status.as_u16(),
                body: format!("signer rejected action: {body}"),
            });
        }

        let signed: SignerResponse = response.json().await?;
        debug!("action signed by wallet bridge");
        Ok(signed.signature)
    }
}

/// Posts signed actions to the exchange endpoint.
#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    url: String,
    vault_address: Option<String>,
}

impl ExchangeClient {
    pub fn new(url: &str, vault_address: Option<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
            vault_address,
        })
    }

    pub fn vault_address(&self) -> Option<&str> {
        self.vault_address.as_deref()
    }

    #[instrument(
        skip(self, action, signature),
        fields(action_type = action.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"))
    )]
    pub async fn submit(
        &self,
        action: Value,
        nonce: u64,
        signature: ActionSignature,
    ) -> AppResult<Value> {
        let payload = json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
            "vaultAddress": self.vault_address,
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
