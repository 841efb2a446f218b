use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::AppState;

pub async fn get_form(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<Value>> {
    state
        .forms
        .get(&key)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no saved {key} form")))
}
