use axum::{extract::State, Json};
use serde_json::Value;

use crate::error::AppResult;
use crate::services::playground::{self, QueryForm, QuerySpec};
use crate::services::response_view::{self, RenderedResponse};
use crate::AppState;

pub async fn list_queries() -> Json<&'static [QuerySpec]> {
    Json(playground::CATALOG)
}

/// Shows the request body a form would send, without sending it.
pub async fn build_query(Json(form): Json<QueryForm>) -> AppResult<Json<Value>> {
    Ok(Json(playground::build_request(&form)?))
}

pub async fn run_query(
    State(state): State<AppState>,
    Json(form): Json<QueryForm>,
) -> AppResult<Json<RenderedResponse>> {
    let entry = state.playground.execute(form).await?;
    Ok(Json(response_view::render(entry)?))
}
