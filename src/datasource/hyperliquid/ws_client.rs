use std::time::Duration;

use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;

use crate::error::{AppError, AppResult};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Feed channels the playground can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedKind {
    AllMids,
    L2Book,
    Trades,
    Bbo,
    Candle,
    ActiveAssetCtx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
    #[serde(rename = "type")]
    pub kind: FeedKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl FeedSubscription {
    pub fn validate(&self) -> AppResult<()> {
        let has_coin = self.coin.as_deref().is_some_and(|c| !c.trim().is_empty());
        if self.kind != FeedKind::AllMids && !has_coin {
            return Err(AppError::ValidationError(format!(
                "{:?} subscription requires a coin",
                self.kind
            )));
        }

        let has_interval = self.interval.as_deref().is_some_and(|i| !i.trim().is_empty());
        match self.kind {
            FeedKind::Candle if !has_interval => Err(AppError::ValidationError(
                "candle subscription requires an interval".to_string(),
            )),
            FeedKind::Candle => Ok(()),
            _ if self.interval.is_some() => Err(AppError::ValidationError(
                "interval only applies to candle subscriptions".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn subscribe_message(&self) -> Value {
        json!({
            "method": "subscribe",
            "subscription": self,
        })
    }
}

/// Opens subscription sockets against the WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct HyperliquidWsClient {
    url: String,
    connect_timeout: Duration,
}

impl HyperliquidWsClient {
    pub fn new(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout,
        }
    }

    /// Connects and sends the subscribe message. The returned stream carries
    /// the subscription acknowledgement followed by feed data.
    ///
    /// The TCP connect and the handshake together are bounded by the connect
    /// timeout; running out of time is reported as `Unavailable`.
    pub async fn connect(&self, subscription: &FeedSubscription) -> AppResult<WsStream> {
        subscription.validate()?;

        info!("Connecting to WebSocket: {}", self.url);
        let (mut ws_stream, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                AppError::Unavailable(format!(
                    "WebSocket handshake with {} timed out after {:?}",
                    self.url, self.connect_timeout
                ))
            })??;

        let message = subscription.subscribe_message().to_string();
        ws_stream.send(Message::Text(message.into())).await?;

        Ok(ws_stream)
    }
}

pub fn ping_message() -> Message {
    Message::Text(json!({ "method": "ping" }).to_string().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_shape() {
        let sub = FeedSubscription {
            kind: FeedKind::L2Book,
            coin: Some("BTC".to_string()),
            interval: None,
        };
        assert_eq!(
            sub.subscribe_message(),
            json!({
                "method": "subscribe",
                "subscription": { "type": "l2Book", "coin": "BTC" }
            })
        );

        let candle = FeedSubscription {
            kind: FeedKind::Candle,
            coin: Some("ETH".to_string()),
            interval: Some("1m".to_string()),
        };
        assert_eq!(
            candle.subscribe_message()["subscription"],
            json!({ "type": "candle", "coin": "ETH", "interval": "1m" })
        );
    }

    #[test]
    fn coin_is_required_except_for_all_mids() {
        let all_mids = FeedSubscription {
            kind: FeedKind::AllMids,
            coin: None,
            interval: None,
        };
        assert!(all_mids.validate().is_ok());

        let trades = FeedSubscription {
            kind: FeedKind::Trades,
            coin: Some("  ".to_string()),
            interval: None,
        };
        assert!(trades.validate().is_err());
    }

    #[test]
    fn interval_rules() {
        let candle = FeedSubscription {
            kind: FeedKind::Candle,
            coin: Some("BTC".to_string()),
            interval: None,
        };
        assert!(candle.validate().is_err());

        let bbo = FeedSubscription {
            kind: FeedKind::Bbo,
            coin: Some("BTC".to_string()),
            interval: Some("1m".to_string()),
        };
        assert!(bbo.validate().is_err());
    }
}
