use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::AppResult;

/// Remembers the last value submitted on each form, keyed by screen.
///
/// Backed by a single JSON object on disk. Nothing else is persisted.
pub struct FormStore {
    path: PathBuf,
    forms: Mutex<BTreeMap<String, Value>>,
}

impl FormStore {
    /// Opens the store. A missing file starts empty; an unreadable or corrupt
    /// one is logged and also starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let forms = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(forms) => forms,
                Err(e) => {
                    warn!(kind = "parse", "Ignoring corrupt form store {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read form store {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            forms: Mutex::new(forms),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.forms.lock().await.get(key).cloned()
    }

    /// Writes the updated store to disk. The in-memory copy only changes
    /// once the file has been replaced.
    pub async fn save(&self, key: &str, value: Value) -> AppResult<()> {
        let mut forms = self.forms.lock().await;
        let mut updated = forms.clone();
        updated.insert(key.to_string(), value);

        let bytes = serde_json::to_vec_pretty(&updated)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *forms = updated;

        debug!(key, "saved last-used form");
        Ok(())
    }
}
