use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::datasource::DataSource;
use crate::error::{AppError, AppResult};

const MAX_ITEMS_PER_REQUEST: usize = 500;

#[derive(Clone)]
pub struct HyperliquidInfoClient {
    client: Client,
    base_url: String,
}

impl HyperliquidInfoClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    async fn post(&self, payload: &Value) -> AppResult<Value> {
        let response = self
            .client
            .post(&self.base_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApiError {
                status: status.as_u16(),
                body,
            });
        }

        let result: Value = response.json().await?;
        Ok(result)
    }
}

#[async_trait]
impl DataSource for HyperliquidInfoClient {
    #[instrument(skip_all, fields(query = request_type(&request)))]
    async fn info(&self, request: Value) -> AppResult<Value> {
        let result = self.post(&request).await;
        if let Err(e) = &result {
            warn!(kind = %e.kind(), "info request failed: {}", e);
        }
        result
    }

    /// Fetches all items with pagination handling (500 item limit)
    #[instrument(skip_all, fields(query = request_type(&request)))]
    async fn info_paginated(&self, request: Value) -> AppResult<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut payload = request;

        loop {
            let response = self.post(&payload).await?;

            let items = match response {
                Value::Array(items) => items,
                other => {
                    return Err(AppError::UnexpectedResponse(format!(
                        "paginated query returned a non-array response: {other}"
                    )));
                }
            };

            let items_count = items.len();
            if items.is_empty() {
                break;
            }

            // Get the timestamp of the last item for pagination
            let last_timestamp = items
                .last()
                .and_then(|item| item.get("time"))
                .and_then(|t| t.as_i64());

            all_items.extend(items);

            // If we got fewer than 500 items, we've reached the end
            if items_count < MAX_ITEMS_PER_REQUEST {
                break;
            }

            let cursor = payload.get("startTime").and_then(Value::as_i64);
            match last_timestamp {
                Some(ts) if cursor.is_none_or(|cursor| ts + 1 > cursor) => {
                    payload["startTime"] = json!(ts + 1)
                }
                Some(ts) => {
                    warn!(last_time = ts, ?cursor, "startTime cursor did not advance, stopping");
                    break;
                }
                None => break,
            }
        }

        debug!(items = all_items.len(), "paginated query complete");
        Ok(all_items)
    }
}

fn request_type(request: &Value) -> &str {
    request.get("type").and_then(Value::as_str).unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HyperliquidInfoClient {
        HyperliquidInfoClient::new(&format!("{}/info", server.uri()), Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn posts_request_body_and_passes_response_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_partial_json(json!({ "type": "allMids" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "BTC": "97000.5" })))
            .expect(1)
            .mount(&server)
            .await;

        let mids = client_for(&server).all_mids().await.unwrap();
        assert_eq!(mids["BTC"], "97000.5");
    }

    #[tokio::test]
    async fn non_success_status_becomes_external_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("Failed to deserialize"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .info(json!({ "type": "bogus" }))
            .await
            .unwrap_err();

        match err {
            AppError::ExternalApiError { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "Failed to deserialize");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).meta().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[tokio::test]
    async fn pagination_follows_start_time_cursor() {
        let server = MockServer::start().await;

        let first_page: Vec<Value> = (0..MAX_ITEMS_PER_REQUEST as i64)
            .map(|i| json!({ "time": 1_000 + i }))
            .collect();
        let last_time = 1_000 + MAX_ITEMS_PER_REQUEST as i64 - 1;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "startTime": 0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&first_page))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "startTime": last_time + 1 })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "time": last_time + 5 }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let items = client_for(&server)
            .info_paginated(json!({
                "type": "userFunding",
                "user": "0x0000000000000000000000000000000000000001",
                "startTime": 0
            }))
            .await
            .unwrap();

        assert_eq!(items.len(), MAX_ITEMS_PER_REQUEST + 1);
        assert_eq!(items.last().unwrap()["time"], last_time + 5);
    }

    #[tokio::test]
    async fn pagination_rejects_object_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "oops": true })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .info_paginated(json!({ "type": "fundingHistory", "coin": "BTC", "startTime": 0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnexpectedResponse(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[tokio::test]
    async fn pagination_stops_when_cursor_does_not_advance() {
        let server = MockServer::start().await;
        let stale_page: Vec<Value> = (0..MAX_ITEMS_PER_REQUEST)
            .map(|_| json!({ "time": 5 }))
            .collect();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&stale_page))
            .expect(1)
            .mount(&server)
            .await;

        let items = tokio::time::timeout(
            Duration::from_secs(5),
            client_for(&server).info_paginated(json!({
                "type": "userFunding",
                "user": "0x0000000000000000000000000000000000000001",
                "startTime": 100
            })),
        )
        .await
        .expect("pagination kept requesting the same page")
        .unwrap();

        assert_eq!(items.len(), MAX_ITEMS_PER_REQUEST);
    }
}
