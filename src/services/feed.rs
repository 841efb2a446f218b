use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::datasource::hyperliquid::ws_client::{ping_message, WsStream};
use crate::datasource::hyperliquid::{FeedSubscription, HyperliquidWsClient};
use crate::error::{AppError, AppResult};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const LIVE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct FeedMessage {
    pub received_at: DateTime<Utc>,
    pub channel: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub subscription: Option<FeedSubscription>,
    pub connected: bool,
    pub message_count: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct FeedState {
    /// Bumped for every connection; a reader task only touches state while
    /// its generation is current.
    generation: u64,
    subscription: Option<FeedSubscription>,
    connected: bool,
    message_count: u64,
    last_error: Option<String>,
    messages: VecDeque<FeedMessage>,
}

struct Connection {
    close_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the single feed connection.
pub struct FeedService {
    client: HyperliquidWsClient,
    buffer_size: usize,
    heartbeat_interval: Duration,
    state: Arc<Mutex<FeedState>>,
    live: broadcast::Sender<FeedMessage>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl FeedService {
    pub fn new(client: HyperliquidWsClient, buffer_size: usize) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            client,
            buffer_size: buffer_size.max(1),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            state: Arc::new(Mutex::new(FeedState::default())),
            live,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Replaces the current subscription: closes any open connection, then
    /// connects and subscribes.
    pub async fn subscribe(&self, subscription: FeedSubscription) -> AppResult<FeedStatus> {
        subscription.validate()?;

        let mut connection = self.connection.lock().await;
        if let Some(previous) = connection.take() {
            close_connection(previous).await;
        }

        let generation = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.subscription = Some(subscription.clone());
            state.connected = false;
            state.message_count = 0;
            state.last_error = None;
            state.messages.clear();
            state.generation
        };

        let ws_stream = match self.client.connect(&subscription).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!(kind = %e.kind(), "Feed connection failed: {}", e);
                self.lock_state().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.lock_state().connected = true;
        info!("Feed subscribed: {:?}", subscription);

        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(read_feed(
            ws_stream,
            close_rx,
            generation,
            self.state.clone(),
            self.live.clone(),
            self.buffer_size,
            self.heartbeat_interval,
        ));
        *connection = Some(Connection { close_tx, task });

        Ok(self.status())
    }

    /// Closes the current connection, if any.
    pub async fn unsubscribe(&self) -> FeedStatus {
        if let Some(previous) = self.connection.lock().await.take() {
            close_connection(previous).await;
        }

        {
            let mut state = self.lock_state();
            state.generation += 1;
            state.subscription = None;
            state.connected = false;
        }
        self.status()
    }

    pub fn status(&self) -> FeedStatus {
        let state = self.lock_state();
        FeedStatus {
            subscription: state.subscription.clone(),
            connected: state.connected,
            message_count: state.message_count,
            last_error: state.last_error.clone(),
        }
    }

    /// Buffered messages, oldest first, at most `limit` of the newest.
    pub fn messages(&self, limit: Option<usize>) -> Vec<FeedMessage> {
        let state = self.lock_state();
        let skip = limit.map_or(0, |limit| state.messages.len().saturating_sub(limit));
        state.messages.iter().skip(skip).cloned().collect()
    }

    /// Live stream of messages from whatever subscription is current.
    pub fn listen(&self) -> broadcast::Receiver<FeedMessage> {
        self.live.subscribe()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn close_connection(connection: Connection) {
    let Connection { close_tx, mut task } = connection;
    let _ = close_tx.send(());
    if time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
        debug!("Feed reader did not close in time, aborting");
        task.abort();
    }
}

async fn read_feed(
    ws_stream: WsStream,
    mut close_rx: oneshot::Receiver<()>,
    generation: u64,
    state: Arc<Mutex<FeedState>>,
    live: broadcast::Sender<FeedMessage>,
    buffer_size: usize,
    heartbeat_interval: Duration,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut heartbeat = time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);

    let update = |f: &mut dyn FnMut(&mut FeedState)| {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            f(&mut state);
        }
    };

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = write.send(Message::Close(None)).await;
                debug!("Feed connection closed locally");
                return;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write.send(ping_message()).await {
                    warn!(kind = "network", "Feed heartbeat failed: {}", e);
                    update(&mut |s| {
                        s.connected = false;
                        s.last_error = Some(e.to_string());
                    });
                    return;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some(message) = parse_message(text.as_str()) else {
                        continue;
                    };
                    if message.channel.as_deref() == Some("pong") {
                        continue;
                    }
                    update(&mut |s| {
                        s.message_count += 1;
                        s.messages.push_back(message.clone());
                        while s.messages.len() > buffer_size {
                            s.messages.pop_front();
                        }
                    });
                    // No listeners is fine.
                    let _ = live.send(message);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Feed closed by server: {:?}", frame);
                    update(&mut |s| s.connected = false);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = AppError::from(e);
                    warn!(kind = %e.kind(), "Feed error: {}", e);
                    update(&mut |s| {
                        s.connected = false;
                        s.last_error = Some(e.to_string());
                    });
                    return;
                }
                None => {
                    update(&mut |s| s.connected = false);
                    return;
                }
            }
        }
    }
}

fn parse_message(text: &str) -> Option<FeedMessage> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let channel = value
                .get("channel")
                .and_then(Value::as_str)
                .map(str::to_string);
            let data = match value {
                Value::Object(mut map) if channel.is_some() => {
                    map.remove("data").unwrap_or(Value::Null)
                }
                other => other,
            };
            Some(FeedMessage {
                received_at: Utc::now(),
                channel,
                data,
            })
        }
        Err(e) => {
            warn!(kind = "parse", "Skipping non-JSON feed frame: {}", e);
            None
        }
    }
}
