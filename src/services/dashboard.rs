use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::datasource::DataSource;
use crate::error::{AppError, AppResult, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketView {
    pub mid_price: BigDecimal,
    pub best_bid: Option<BigDecimal>,
    pub best_ask: Option<BigDecimal>,
    pub spread: Option<BigDecimal>,
    pub spread_bps: Option<BigDecimal>,
    pub mark_price: Option<BigDecimal>,
    pub oracle_price: Option<BigDecimal>,
    pub funding: Option<BigDecimal>,
    pub open_interest: Option<BigDecimal>,
    pub day_notional_volume: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub coin: String,
    /// Poll number of the tick whose result this is
    pub sequence: u64,
    pub fetched_at: DateTime<Utc>,
    pub market: Option<MarketView>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Default)]
struct DashboardState {
    snapshot: RwLock<Option<DashboardSnapshot>>,
    sequence: AtomicU64,
}

impl DashboardState {
    /// Stores a poll result. Whatever resolves last is what readers see; a
    /// failed poll keeps the previous market figures next to its error.
    fn apply(&self, coin: &str, sequence: u64, result: AppResult<MarketView>) {
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        let snapshot = match result {
            Ok(market) => DashboardSnapshot {
                coin: coin.to_string(),
                sequence,
                fetched_at: Utc::now(),
                market: Some(market),
                error: None,
                error_kind: None,
            },
            Err(e) => DashboardSnapshot {
                coin: coin.to_string(),
                sequence,
                fetched_at: Utc::now(),
                market: slot.as_ref().and_then(|prev| prev.market.clone()),
                error_kind: Some(e.kind()),
                error: Some(e.to_string()),
            },
        };

        *slot = Some(snapshot);
    }
}

/// Polls market data for one coin on a fixed timer.
///
/// Ticks never wait for earlier polls: slow responses overlap and the last one
/// to resolve overwrites the snapshot. Dropping the dashboard cancels the loop
/// and every poll still in flight.
pub struct Dashboard {
    coin: String,
    state: Arc<DashboardState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub fn start(datasource: Arc<dyn DataSource>, coin: &str, poll_interval: Duration) -> Self {
        let state = Arc::new(DashboardState::default());
        let handle = tokio::spawn(poll_loop(
            datasource,
            coin.to_string(),
            poll_interval,
            state.clone(),
        ));
        info!("Dashboard polling {} every {:?}", coin, poll_interval);

        Self {
            coin: coin.to_string(),
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    pub fn snapshot(&self) -> Option<DashboardSnapshot> {
        self.state
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn polls_started(&self) -> u64 {
        self.state.sequence.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("Dashboard polling for {} stopped", self.coin);
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    datasource: Arc<dyn DataSource>,
    coin: String,
    poll_interval: Duration,
    state: Arc<DashboardState>,
) {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Dropped with this task, which aborts outstanding polls.
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sequence = state.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                let datasource = datasource.clone();
                let coin = coin.clone();
                let state = state.clone();
                in_flight.spawn(async move {
                    let result = fetch_market(datasource.as_ref(), &coin).await;
                    if let Err(e) = &result {
                        warn!(kind = %e.kind(), "Dashboard poll {} failed: {}", sequence, e);
                    }
                    state.apply(&coin, sequence, result);
                });
                debug!(sequence, in_flight = in_flight.len(), "dashboard tick");
            }
            Some(_) = in_flight.join_next() => {}
        }
    }
}

/// One dashboard refresh: mids, book and asset context fetched concurrently.
pub async fn fetch_market(datasource: &dyn DataSource, coin: &str) -> AppResult<MarketView> {
    let (mids, book, meta_and_ctxs) = tokio::try_join!(
        datasource.all_mids(),
        datasource.l2_book(coin),
        datasource.meta_and_asset_ctxs(),
    )?;

    let (best_bid, best_ask) = top_of_book(&book);

    let mid_price = match mids.get(coin).and_then(decimal) {
        Some(mid) => mid,
        None => match (&best_bid, &best_ask) {
            (Some(bid), Some(ask)) => (bid + ask) / BigDecimal::from(2),
            _ => return Err(AppError::NotFound(format!("no mid price for {coin}"))),
        },
    };

    let (spread, spread_bps) = match (&best_bid, &best_ask) {
        (Some(bid), Some(ask)) => {
            let spread = ask - bid;
            let bps = if mid_price == BigDecimal::from(0) {
                None
            } else {
                Some((&spread * BigDecimal::from(10_000) / mid_price.clone()).round(4))
            };
            (Some(spread), bps)
        }
        _ => (None, None),
    };

    let ctx = asset_ctx(&meta_and_ctxs, coin)?;
    let field = |name: &str| ctx.get(name).and_then(decimal);

    Ok(MarketView {
        mid_price,
        best_bid,
        best_ask,
        spread,
        spread_bps,
        mark_price: field("markPx"),
        oracle_price: field("oraclePx"),
        funding: field("funding"),
        open_interest: field("openInterest"),
        day_notional_volume: field("dayNtlVlm"),
    })
}

/// Best bid and ask from an `l2Book` response (`levels: [bids, asks]`).
fn top_of_book(book: &Value) -> (Option<BigDecimal>, Option<BigDecimal>) {
    let side = |i: usize| {
        book.get("levels")
            .and_then(|levels| levels.get(i))
            .and_then(|side| side.get(0))
            .and_then(|level| level.get("px"))
            .and_then(decimal)
    };
    (side(0), side(1))
}

/// The asset context paired with `coin` in a `[meta, assetCtxs]` response.
fn asset_ctx<'a>(meta_and_ctxs: &'a Value, coin: &str) -> AppResult<&'a Value> {
    let position = meta_and_ctxs
        .get(0)
        .and_then(|meta| meta.get("universe"))
        .and_then(Value::as_array)
        .and_then(|universe| {
            universe
                .iter()
                .position(|asset| asset.get("name").and_then(Value::as_str) == Some(coin))
        })
        .ok_or_else(|| AppError::NotFound(format!("{coin} is not in the perp universe")))?;

    meta_and_ctxs
        .get(1)
        .and_then(|ctxs| ctxs.get(position))
        .ok_or_else(|| AppError::NotFound(format!("no asset context for {coin}")))
}

fn decimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => BigDecimal::from_str(s).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}
