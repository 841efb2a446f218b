use axum::{extract::State, Json};
use serde_json::Value;

use crate::error::AppResult;
use crate::services::orders::{CancelForm, OrderForm};
use crate::AppState;

pub async fn place_order(
    State(state): State<AppState>,
    Json(form): Json<OrderForm>,
) -> AppResult<Json<Value>> {
    Ok(Json(state.orders.place(&form).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Json(form): Json<CancelForm>,
) -> AppResult<Json<Value>> {
    Ok(Json(state.orders.cancel(&form).await?))
}
