pub mod hyperliquid;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AppResult;

/// Read-only query surface of the exchange (the info endpoint).
///
/// Responses are passed through as opaque JSON; callers pick out what they
/// need.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Post a `{ "type": ..., ...params }` request and return the raw response
    async fn info(&self, request: Value) -> AppResult<Value>;

    /// Post a time-ranged request, following the `startTime` cursor until a
    /// short or empty page comes back
    async fn info_paginated(&self, request: Value) -> AppResult<Vec<Value>>;

    /// Perp metadata, including the `universe` list
    async fn meta(&self) -> AppResult<Value> {
        self.info(json!({ "type": "meta" })).await
    }

    /// Mid prices for every coin, keyed by symbol
    async fn all_mids(&self) -> AppResult<Value> {
        self.info(json!({ "type": "allMids" })).await
    }

    /// `[meta, assetCtxs]` pair
    async fn meta_and_asset_ctxs(&self) -> AppResult<Value> {
        self.info(json!({ "type": "metaAndAssetCtxs" })).await
    }

    /// L2 book snapshot for one coin
    async fn l2_book(&self, coin: &str) -> AppResult<Value> {
        self.info(json!({ "type": "l2Book", "coin": coin })).await
    }
}
