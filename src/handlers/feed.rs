use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::datasource::hyperliquid::FeedSubscription;
use crate::error::AppResult;
use crate::services::feed::{FeedMessage, FeedStatus};
use crate::AppState;

pub const FORM_KEY: &str = "feed";

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<FeedStatus> {
    Json(state.feed.status())
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(subscription): Json<FeedSubscription>,
) -> AppResult<Json<FeedStatus>> {
    let form = serde_json::to_value(&subscription)?;
    let status = state.feed.subscribe(subscription).await?;

    if let Err(e) = state.forms.save(FORM_KEY, form).await {
        tracing::warn!(kind = %e.kind(), "Could not save feed form: {}", e);
    }

    Ok(Json(status))
}

pub async fn unsubscribe(State(state): State<AppState>) -> Json<FeedStatus> {
    Json(state.feed.unsubscribe().await)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Json<Vec<FeedMessage>> {
    Json(state.feed.messages(query.limit))
}

/// Relays live feed messages to a browser over its own socket.
pub async fn feed_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay(socket, state))
}

async fn relay(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut live = state.feed.listen();

    loop {
        tokio::select! {
            message = live.recv() => match message {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(kind = "parse", "Could not encode feed message: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Relay client lagging, skipped {} messages", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }

    tracing::debug!("Feed relay client disconnected");
}
