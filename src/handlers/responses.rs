use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::response_view::{self, RenderedResponse, ResponseEntry};
use crate::AppState;

pub async fn list_responses(State(state): State<AppState>) -> Json<Vec<ResponseEntry>> {
    Json(state.history.list())
}

pub async fn get_response(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RenderedResponse>> {
    let entry = state.history.get(id)?;
    Ok(Json(response_view::render(entry)?))
}

pub async fn clear_responses(State(state): State<AppState>) -> Json<Value> {
    let removed = state.history.clear();
    Json(json!({ "removed": removed }))
}
