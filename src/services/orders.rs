use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::datasource::hyperliquid::{ActionSigner, ExchangeClient};
use crate::error::{AppError, AppResult};
use crate::services::asset_map::AssetRegistry;
use crate::services::form_store::FormStore;

pub const FORM_KEY: &str = "order";
pub const CANCEL_FORM_KEY: &str = "cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Alo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderForm {
    pub coin: String,
    pub side: Side,
    pub price: String,
    pub size: String,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub tif: TimeInForce,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelForm {
    pub coin: String,
    pub oid: u64,
}

/// Positive decimal rendered the way the exchange expects: plain notation,
/// no trailing zeros.
fn wire_decimal(field: &str, raw: &str) -> AppResult<String> {
    let value = BigDecimal::from_str(raw.trim())
        .map_err(|_| AppError::ValidationError(format!("{field} must be a decimal, got {raw:?}")))?;
    if value <= BigDecimal::from(0) {
        return Err(AppError::ValidationError(format!(
            "{field} must be greater than zero"
        )));
    }

    let normalized = value.normalized();
    let (_, scale) = normalized.as_bigint_and_exponent();
    let plain = if scale < 0 {
        normalized.with_scale(0)
    } else {
        normalized
    };
    Ok(plain.to_plain_string())
}

fn validate_cloid(cloid: &str) -> AppResult<String> {
    let hex = cloid
        .strip_prefix("0x")
        .filter(|hex| hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| {
            AppError::ValidationError("cloid must be 0x followed by 32 hex digits".to_string())
        })?;
    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}

/// Builds the unsigned `order` action for a single limit order.
pub fn order_action(asset: u32, form: &OrderForm) -> AppResult<Value> {
    let mut order = json!({
        "a": asset,
        "b": form.side == Side::Buy,
        "p": wire_decimal("price", &form.price)?,
        "s": wire_decimal("size", &form.size)?,
        "r": form.reduce_only,
        "t": { "limit": { "tif": form.tif } },
    });

    if let Some(cloid) = form.cloid.as_deref().filter(|c| !c.trim().is_empty()) {
        order["c"] = Value::String(validate_cloid(cloid.trim())?);
    }

    Ok(json!({
        "type": "order",
        "orders": [order],
        "grouping": "na",
    }))
}

pub fn cancel_action(asset: u32, oid: u64) -> Value {
    json!({
        "type": "cancel",
        "cancels": [{ "a": asset, "o": oid }],
    })
}

/// Submits orders and cancels. Without a signer every submission fails with
/// `Unavailable`. Forms that pass validation are remembered as last-used.
pub struct OrderService {
    assets: Arc<AssetRegistry>,
    forms: Arc<FormStore>,
    trading: Option<(Arc<dyn ActionSigner>, ExchangeClient)>,
    last_nonce: AtomicU64,
}

impl OrderService {
    pub fn new(
        assets: Arc<AssetRegistry>,
        forms: Arc<FormStore>,
        signer: Option<Arc<dyn ActionSigner>>,
        exchange: ExchangeClient,
    ) -> Self {
        Self {
            assets,
            forms,
            trading: signer.map(|signer| (signer, exchange)),
            last_nonce: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.trading.is_some()
    }

    pub async fn place(&self, form: &OrderForm) -> AppResult<Value> {
        let asset = self.assets.resolve_index(form.coin.trim())?;
        let action = order_action(asset, form)?;
        self.remember(FORM_KEY, form).await;

        info!(coin = %form.coin, side = ?form.side, "Submitting order");
        self.sign_and_submit(action).await
    }

    pub async fn cancel(&self, form: &CancelForm) -> AppResult<Value> {
        let asset = self.assets.resolve_index(form.coin.trim())?;
        self.remember(CANCEL_FORM_KEY, form).await;

        info!(coin = %form.coin, oid = form.oid, "Submitting cancel");
        self.sign_and_submit(cancel_action(asset, form.oid)).await
    }

    async fn remember<T: Serialize>(&self, key: &str, form: &T) {
        let saved = match serde_json::to_value(form) {
            Ok(value) => self.forms.save(key, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = saved {
            warn!(kind = %e.kind(), "Could not save {} form: {}", key, e);
        }
    }

    /// Millisecond timestamp, bumped past the previous nonce when two
    /// submissions land in the same millisecond.
    fn next_nonce(&self) -> AppResult<u64> {
        let now = u64::try_from(Utc::now().timestamp_millis())
            .map_err(|_| AppError::InternalError("system clock is before 1970".to_string()))?;

        let (Ok(previous) | Err(previous)) =
            self.last_nonce
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                    Some(now.max(last + 1))
                });
        Ok(now.max(previous + 1))
    }

    async fn sign_and_submit(&self, action: Value) -> AppResult<Value> {
        let (signer, exchange) = self.trading.as_ref().ok_or_else(|| {
            AppError::Unavailable("order submission needs SIGNER_URL to be configured".to_string())
        })?;

        let nonce = self.next_nonce()?;

        let signature = signer.sign(&action, nonce, exchange.vault_address()).await?;
        let result = exchange.submit(action, nonce, signature).await;
        if let Err(e) = &result {
            warn!(kind = %e.kind(), "Exchange rejected action: {}", e);
        }
        result
    }
}
