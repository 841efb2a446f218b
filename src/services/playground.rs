use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::datasource::DataSource;
use crate::error::{AppError, AppResult};
use crate::services::form_store::FormStore;
use crate::services::response_view::{Outcome, ResponseEntry, ResponseHistory};

pub const FORM_KEY: &str = "playground";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Coin,
    Address,
    Integer,
    Timestamp,
    Boolean,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuerySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub paginated: bool,
    /// Wraps the params in a sub-object instead of placing them at top level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nest_under: Option<&'static str>,
}

const fn query(
    name: &'static str,
    description: &'static str,
    params: &'static [ParamSpec],
) -> QuerySpec {
    QuerySpec {
        name,
        description,
        params,
        paginated: false,
        nest_under: None,
    }
}

const fn paginated(
    name: &'static str,
    description: &'static str,
    params: &'static [ParamSpec],
) -> QuerySpec {
    QuerySpec {
        name,
        description,
        params,
        paginated: true,
        nest_under: None,
    }
}

use ParamKind::{Address, Boolean, Coin, Integer, Text, Timestamp};

const USER: &[ParamSpec] = &[required("user", Address)];
const USER_DEX: &[ParamSpec] = &[required("user", Address), optional("dex", Text)];
const DEX: &[ParamSpec] = &[optional("dex", Text)];
const COIN: &[ParamSpec] = &[required("coin", Coin)];
const USER_FILLS: &[ParamSpec] = &[required("user", Address), optional("aggregateByTime", Boolean)];
const USER_FILLS_BY_TIME: &[ParamSpec] = &[
    required("user", Address),
    required("startTime", Timestamp),
    optional("endTime", Timestamp),
    optional("aggregateByTime", Boolean),
];
const USER_TIME_RANGE: &[ParamSpec] = &[
    required("user", Address),
    required("startTime", Timestamp),
    optional("endTime", Timestamp),
];
const ORDER_STATUS: &[ParamSpec] = &[required("user", Address), required("oid", Integer)];
const COIN_TIME_RANGE: &[ParamSpec] = &[
    required("coin", Coin),
    required("startTime", Timestamp),
    optional("endTime", Timestamp),
];
const L2_BOOK: &[ParamSpec] = &[
    required("coin", Coin),
    optional("nSigFigs", Integer),
    optional("mantissa", Integer),
];
const CANDLES: &[ParamSpec] = &[
    required("coin", Coin),
    required("interval", Text),
    required("startTime", Timestamp),
    required("endTime", Timestamp),
];

pub static CATALOG: &[QuerySpec] = &[
    query("allMids", "Mid price of every coin", DEX),
    query("meta", "Perp universe and asset metadata", DEX),
    query("spotMeta", "Spot universe and token metadata", &[]),
    query("metaAndAssetCtxs", "Perp metadata with live asset contexts", DEX),
    query("spotMetaAndAssetCtxs", "Spot metadata with live asset contexts", &[]),
    query("predictedFundings", "Predicted funding rates across venues", &[]),
    query("perpDexs", "Builder-deployed perp dexes", &[]),
    query("clearinghouseState", "Perp positions and margin summary", USER_DEX),
    query("spotClearinghouseState", "Spot token balances", USER),
    query("openOrders", "Open orders", USER_DEX),
    query("frontendOpenOrders", "Open orders with frontend details", USER_DEX),
    query("userFills", "Most recent fills", USER_FILLS),
    paginated("userFillsByTime", "Fills within a time range", USER_FILLS_BY_TIME),
    paginated("userFunding", "Funding payments within a time range", USER_TIME_RANGE),
    query("historicalOrders", "Recent historical orders", USER),
    query("userFees", "Fee schedule and volume", USER),
    query("userRateLimit", "Request rate limit status", USER),
    query("referral", "Referral state", USER),
    query("orderStatus", "Status of one order by id", ORDER_STATUS),
    paginated("fundingHistory", "Historical funding rates for a coin", COIN_TIME_RANGE),
    query("l2Book", "Order book snapshot", L2_BOOK),
    query("recentTrades", "Recent public trades", COIN),
    QuerySpec {
        name: "candleSnapshot",
        description: "Candles for a coin and interval",
        params: CANDLES,
        paginated: false,
        nest_under: Some("req"),
    },
];

pub fn find_query(name: &str) -> Option<&'static QuerySpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// What the user typed into the playground form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryForm {
    #[serde(rename = "type")]
    pub query_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Extra fields merged verbatim into the request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default)]
    pub paginate: bool,
}

/// Turns a form into an info request body `{ "type": ..., ...params }`.
pub fn build_request(form: &QueryForm) -> AppResult<Value> {
    let query_type = form.query_type.trim();
    let spec = find_query(query_type)
        .ok_or_else(|| AppError::ValidationError(format!("unknown query type {query_type:?}")))?;

    if form.paginate && !spec.paginated {
        return Err(AppError::ValidationError(format!(
            "{} does not support pagination",
            spec.name
        )));
    }

    if let Some(unknown) = form
        .params
        .keys()
        .find(|key| !spec.params.iter().any(|p| p.name == key.as_str()))
    {
        return Err(AppError::ValidationError(format!(
            "{} does not take a {unknown:?} parameter",
            spec.name
        )));
    }

    let mut params = Map::new();
    for param in spec.params {
        let raw_value = form
            .params
            .get(param.name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        match raw_value {
            Some(raw_value) => {
                params.insert(param.name.to_string(), coerce(param, raw_value)?);
            }
            None if param.required => {
                return Err(AppError::ValidationError(format!(
                    "{} requires {}",
                    spec.name, param.name
                )));
            }
            None => {}
        }
    }

    let mut body = Map::new();
    body.insert("type".to_string(), Value::String(spec.name.to_string()));
    match spec.nest_under {
        Some(key) => {
            body.insert(key.to_string(), Value::Object(params));
        }
        None => body.extend(params),
    }

    if let Some(raw) = &form.raw {
        let Value::Object(extra) = raw else {
            return Err(AppError::ValidationError(
                "raw parameters must be a JSON object".to_string(),
            ));
        };
        if extra.contains_key("type") {
            return Err(AppError::ValidationError(
                "raw parameters cannot override the query type".to_string(),
            ));
        }
        body.extend(extra.clone());
    }

    Ok(Value::Object(body))
}

fn coerce(param: &ParamSpec, raw: &str) -> AppResult<Value> {
    let invalid = |expected: &str| {
        AppError::ValidationError(format!("{} must be {expected}, got {raw:?}", param.name))
    };

    match param.kind {
        ParamKind::Text | ParamKind::Coin => Ok(Value::String(raw.to_string())),
        ParamKind::Address => {
            let hex = raw
                .strip_prefix("0x")
                .or_else(|| raw.strip_prefix("0X"))
                .ok_or_else(|| invalid("a 0x-prefixed address"))?;
            if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("a 0x-prefixed 20-byte hex address"));
            }
            Ok(Value::String(format!("0x{}", hex.to_ascii_lowercase())))
        }
        ParamKind::Integer => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| invalid("a non-negative integer")),
        ParamKind::Timestamp => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| invalid("a millisecond timestamp")),
        ParamKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid("true or false")),
        },
    }
}

pub struct PlaygroundService {
    datasource: Arc<dyn DataSource>,
    history: Arc<ResponseHistory>,
    forms: Arc<FormStore>,
}

impl PlaygroundService {
    pub fn new(
        datasource: Arc<dyn DataSource>,
        history: Arc<ResponseHistory>,
        forms: Arc<FormStore>,
    ) -> Self {
        Self {
            datasource,
            history,
            forms,
        }
    }

    /// Runs a playground query. Form errors are returned; failures of the
    /// call itself are recorded in the response history like any result.
    pub async fn execute(&self, form: QueryForm) -> AppResult<ResponseEntry> {
        let request = build_request(&form)?;

        if let Err(e) = self.forms.save(FORM_KEY, serde_json::to_value(&form)?).await {
            warn!(kind = %e.kind(), "Could not save playground form: {}", e);
        }

        info!("Running playground query: {}", form.query_type);
        let started_at = Utc::now();
        let clock = Instant::now();

        let result = if form.paginate {
            self.datasource
                .info_paginated(request.clone())
                .await
                .map(Value::Array)
        } else {
            self.datasource.info(request.clone()).await
        };

        let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(e) = &result {
            warn!(kind = %e.kind(), "Playground query {} failed: {}", form.query_type, e);
        }

        Ok(self
            .history
            .record(request, started_at, elapsed_ms, Outcome::from_result(result)))
    }

    pub async fn last_form(&self) -> Option<Value> {
        self.forms.get(FORM_KEY).await
    }
}
