use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ErrorKind};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { response: Value },
    Error { error: String, kind: ErrorKind },
}

impl Outcome {
    pub fn from_result(result: AppResult<Value>) -> Self {
        match result {
            Ok(response) => Outcome::Ok { response },
            Err(e) => Outcome::Error {
                kind: e.kind(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEntry {
    pub id: Uuid,
    pub request: Value,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Structural summary shown next to the pretty-printed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Null,
    Bool,
    Number,
    String { len: usize },
    Array { len: usize },
    Object { keys: Vec<String> },
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Bool,
            Value::Number(_) => Shape::Number,
            Value::String(s) => Shape::String { len: s.chars().count() },
            Value::Array(items) => Shape::Array { len: items.len() },
            Value::Object(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                Shape::Object { keys }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedResponse {
    #[serde(flatten)]
    pub entry: ResponseEntry,
    pub pretty: Option<String>,
    pub shape: Option<Shape>,
}

pub fn render(entry: ResponseEntry) -> AppResult<RenderedResponse> {
    let (pretty, shape) = match &entry.outcome {
        Outcome::Ok { response } => (
            Some(serde_json::to_string_pretty(response)?),
            Some(Shape::of(response)),
        ),
        Outcome::Error { .. } => (None, None),
    };

    Ok(RenderedResponse {
        entry,
        pretty,
        shape,
    })
}

/// Bounded, newest-first log of executed queries.
pub struct ResponseHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ResponseEntry>>,
}

impl ResponseHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(
        &self,
        request: Value,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        outcome: Outcome,
    ) -> ResponseEntry {
        let entry = ResponseEntry {
            id: Uuid::new_v4(),
            request,
            started_at,
            elapsed_ms,
            outcome,
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_front(entry.clone());
        entries.truncate(self.capacity);

        entry
    }

    pub fn list(&self) -> Vec<ResponseEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: Uuid) -> AppResult<ResponseEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no response with id {id}")))
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.len();
        entries.clear();
        removed
    }
}
