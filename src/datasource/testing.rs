//! In-memory `DataSource` for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::datasource::DataSource;
use crate::error::{AppError, AppResult};

#[derive(Default)]
pub struct StaticSource {
    responses: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<Value>>,
    delay: Option<Duration>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(self, query_type: &str, response: Value) -> Self {
        self.set_response(query_type, response);
        self
    }

    pub fn fail(self, query_type: &str, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(query_type.to_string(), message.to_string());
        self
    }

    pub fn set_response(&self, query_type: &str, response: Value) {
        self.failures.lock().unwrap().remove(query_type);
        self.responses
            .lock()
            .unwrap()
            .insert(query_type.to_string(), response);
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    fn lookup(&self, request: &Value) -> AppResult<Value> {
        let query_type = request
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(message) = self.failures.lock().unwrap().get(&query_type) {
            return Err(AppError::ExternalApiError {
                status: 500,
                body: message.clone(),
            });
        }

        self.responses
            .lock()
            .unwrap()
            .get(&query_type)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no canned response for {query_type}")))
    }
}

#[async_trait]
impl DataSource for StaticSource {
    async fn info(&self, request: Value) -> AppResult<Value> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lookup(&request)
    }

    async fn info_paginated(&self, request: Value) -> AppResult<Vec<Value>> {
        match self.info(request).await? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }
}
