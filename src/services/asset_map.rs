use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datasource::DataSource;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize)]
struct UniverseEntry {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    pub index: u32,
    pub symbol: String,
}

/// Bidirectional asset lookup. An asset's index is its position in the
/// universe list; the map is never edited after construction.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    symbols: Vec<String>,
    indices: HashMap<String, u32>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl AssetMap {
    pub fn from_symbols<I>(symbols: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let symbols: Vec<String> = symbols.into_iter().collect();
        let mut indices = HashMap::with_capacity(symbols.len());

        for (position, symbol) in symbols.iter().enumerate() {
            let index = u32::try_from(position).map_err(|_| {
                AppError::InternalError("universe larger than u32::MAX".to_string())
            })?;
            if let Some(existing) = indices.insert(symbol.clone(), index) {
                return Err(AppError::ValidationError(format!(
                    "universe lists {symbol} twice (indices {existing} and {index})"
                )));
            }
        }

        Ok(Self {
            symbols,
            indices,
            refreshed_at: Some(Utc::now()),
        })
    }

    /// Builds the map from a `meta` response.
    pub fn from_meta(meta: Value) -> AppResult<Self> {
        let meta: Meta = serde_json::from_value(meta)?;
        Self::from_symbols(meta.universe.into_iter().map(|entry| entry.name))
    }

    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.symbols.get(index as usize).map(String::as_str)
    }

    pub fn index(&self, symbol: &str) -> Option<u32> {
        self.indices.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn entries(&self) -> Vec<AssetEntry> {
        self.symbols
            .iter()
            .zip(0u32..)
            .map(|(symbol, index)| AssetEntry {
                index,
                symbol: symbol.clone(),
            })
            .collect()
    }
}

/// Holds the current asset map. Refreshes replace it wholesale; readers keep
/// whatever snapshot they grabbed.
pub struct AssetRegistry {
    datasource: Arc<dyn DataSource>,
    current: RwLock<Arc<AssetMap>>,
}

impl AssetRegistry {
    pub fn new(datasource: Arc<dyn DataSource>) -> Self {
        Self {
            datasource,
            current: RwLock::new(Arc::new(AssetMap::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<AssetMap> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetches `meta` and swaps in a freshly built map. On failure the
    /// previous map stays in place.
    pub async fn refresh(&self) -> AppResult<Arc<AssetMap>> {
        let meta = self.datasource.meta().await?;
        let map = Arc::new(AssetMap::from_meta(meta)?);

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = map.clone();
        if map.is_empty() {
            tracing::warn!("Asset map refreshed with an empty universe");
        } else {
            tracing::info!("Asset map refreshed: {} assets", map.len());
        }

        Ok(map)
    }

    pub fn resolve_symbol(&self, index: u32) -> AppResult<String> {
        self.snapshot()
            .symbol(index)
            .map(str::to_string)
            .ok_or_else(|| AppError::NotFound(format!("no asset at index {index}")))
    }

    pub fn resolve_index(&self, symbol: &str) -> AppResult<u32> {
        self.snapshot()
            .index(symbol)
            .ok_or_else(|| AppError::NotFound(format!("unknown asset {symbol}")))
    }
}
