use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::services::asset_map::{AssetEntry, AssetMap};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AssetListing {
    pub count: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub assets: Vec<AssetEntry>,
}

impl From<&AssetMap> for AssetListing {
    fn from(map: &AssetMap) -> Self {
        Self {
            count: map.len(),
            refreshed_at: map.refreshed_at(),
            assets: map.entries(),
        }
    }
}

pub async fn list_assets(State(state): State<AppState>) -> Json<AssetListing> {
    Json(AssetListing::from(state.assets.snapshot().as_ref()))
}

pub async fn refresh_assets(State(state): State<AppState>) -> AppResult<Json<AssetListing>> {
    let map = state.assets.refresh().await?;
    Ok(Json(AssetListing::from(map.as_ref())))
}

pub async fn get_by_symbol(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> AppResult<Json<AssetEntry>> {
    let index = state.assets.resolve_index(&symbol)?;
    Ok(Json(AssetEntry { index, symbol }))
}

pub async fn get_by_index(
    State(state): State<AppState>,
    Path(index): Path<u32>,
) -> AppResult<Json<AssetEntry>> {
    let symbol = state.assets.resolve_symbol(index)?;
    Ok(Json(AssetEntry { index, symbol }))
}
