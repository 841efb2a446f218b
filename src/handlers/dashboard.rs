use axum::{extract::State, Json};
use serde::Serialize;

use crate::services::dashboard::DashboardSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub coin: String,
    pub running: bool,
    pub polls_started: u64,
    pub snapshot: Option<DashboardSnapshot>,
}

pub async fn get_dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    let dashboard = &state.dashboard;
    Json(DashboardView {
        coin: dashboard.coin().to_string(),
        running: dashboard.is_running(),
        polls_started: dashboard.polls_started(),
        snapshot: dashboard.snapshot(),
    })
}
