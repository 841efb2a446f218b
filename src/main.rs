use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod datasource;
mod error;
mod handlers;
mod services;

use config::Config;
use datasource::hyperliquid::{
    ActionSigner, ExchangeClient, HyperliquidInfoClient, HyperliquidWsClient, RemoteSigner,
};
use datasource::DataSource;
use services::asset_map::AssetRegistry;
use services::dashboard::Dashboard;
use services::feed::FeedService;
use services::form_store::FormStore;
use services::orders::OrderService;
use services::playground::PlaygroundService;
use services::response_view::ResponseHistory;

#[derive(Clone)]
pub struct AppState {
    pub assets: Arc<AssetRegistry>,
    pub playground: Arc<PlaygroundService>,
    pub history: Arc<ResponseHistory>,
    pub dashboard: Arc<Dashboard>,
    pub feed: Arc<FeedService>,
    pub orders: Arc<OrderService>,
    pub forms: Arc<FormStore>,
}

fn app(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/assets", get(handlers::assets::list_assets))
        .route("/assets/refresh", post(handlers::assets::refresh_assets))
        .route("/assets/symbol/{symbol}", get(handlers::assets::get_by_symbol))
        .route("/assets/index/{index}", get(handlers::assets::get_by_index))
        .route("/playground/queries", get(handlers::playground::list_queries))
        .route("/playground/build", post(handlers::playground::build_query))
        .route("/playground/query", post(handlers::playground::run_query))
        .route(
            "/responses",
            get(handlers::responses::list_responses).delete(handlers::responses::clear_responses),
        )
        .route("/responses/{id}", get(handlers::responses::get_response))
        .route("/dashboard", get(handlers::dashboard::get_dashboard))
        .route("/feed", get(handlers::feed::get_status))
        .route("/feed/subscribe", post(handlers::feed::subscribe))
        .route("/feed/unsubscribe", post(handlers::feed::unsubscribe))
        .route("/feed/messages", get(handlers::feed::get_messages))
        .route("/feed/ws", get(handlers::feed::feed_socket))
        .route("/orders", post(handlers::orders::place_order))
        .route("/orders/cancel", post(handlers::orders::cancel_order))
        .route("/forms/{key}", get(handlers::forms::get_form))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hl_playground=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Initialize data source
    let datasource: Arc<dyn DataSource> =
        Arc::new(HyperliquidInfoClient::new(&config.info_url, config.http_timeout)?);

    let assets = Arc::new(AssetRegistry::new(datasource.clone()));
    if let Err(e) = assets.refresh().await {
        tracing::warn!(kind = %e.kind(), "Asset map not loaded at startup: {}", e);
    }

    // Initialize services
    let forms = Arc::new(FormStore::open(&config.form_store_path).await);
    let history = Arc::new(ResponseHistory::new(config.response_history_size));
    let playground = Arc::new(PlaygroundService::new(
        datasource.clone(),
        history.clone(),
        forms.clone(),
    ));
    let dashboard = Arc::new(Dashboard::start(
        datasource.clone(),
        &config.dashboard_coin,
        config.dashboard_poll_interval,
    ));
    let feed = Arc::new(
        FeedService::new(
            HyperliquidWsClient::new(&config.ws_url, config.http_timeout),
            config.feed_buffer_size,
        )
        .with_heartbeat(config.feed_heartbeat),
    );

    let signer: Option<Arc<dyn ActionSigner>> = match &config.signer_url {
        Some(url) => Some(Arc::new(RemoteSigner::new(
            url,
            config.network.is_mainnet(),
            config.http_timeout,
        )?)),
        None => None,
    };
    let exchange = ExchangeClient::new(
        &config.exchange_url,
        config.vault_address.clone(),
        config.http_timeout,
    )?;
    let orders = Arc::new(OrderService::new(
        assets.clone(),
        forms.clone(),
        signer,
        exchange,
    ));
    tracing::info!(
        orders_enabled = orders.is_enabled(),
        form_store = %forms.path().display(),
        "Services ready"
    );

    // Create app state
    let state = AppState {
        assets,
        playground,
        history,
        dashboard: dashboard.clone(),
        feed: feed.clone(),
        orders,
        forms,
    };

    // Start server
    let addr = config.listen_addr();
    tracing::info!("Starting playground server on {} ({:?})", addr, config.network);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dashboard.stop();
    feed.unsubscribe().await;
    tracing::info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use datasource::hyperliquid::ws_client::FeedKind;
    use datasource::hyperliquid::FeedSubscription;
    use datasource::testing::StaticSource;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state(source: StaticSource) -> AppState {
        let datasource: Arc<dyn DataSource> = Arc::new(source);
        let path = std::env::temp_dir().join(format!("hl-playground-{}.json", uuid::Uuid::new_v4()));
        let forms = Arc::new(FormStore::open(path).await);
        let history = Arc::new(ResponseHistory::new(10));
        let assets = Arc::new(AssetRegistry::new(datasource.clone()));
        let exchange =
            ExchangeClient::new("http://127.0.0.1:1/exchange", None, Duration::from_secs(1))
                .unwrap();

        AppState {
            playground: Arc::new(PlaygroundService::new(
                datasource.clone(),
                history.clone(),
                forms.clone(),
            )),
            dashboard: Arc::new(Dashboard::start(
                datasource,
                "BTC",
                Duration::from_secs(3600),
            )),
            feed: Arc::new(FeedService::new(
                HyperliquidWsClient::new("ws://127.0.0.1:1", Duration::from_secs(1)),
                10,
            )),
            orders: Arc::new(OrderService::new(assets.clone(), forms.clone(), None, exchange)),
            assets,
            history,
            forms,
        }
    }

    fn source() -> StaticSource {
        StaticSource::new()
            .respond(
                "meta",
                json!({ "universe": [{ "name": "BTC" }, { "name": "ETH" }] }),
            )
            .respond("allMids", json!({ "BTC": "100000" }))
            .fail("l2Book", "book unavailable")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_check() {
        let app = app(test_state(source()).await);
        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn asset_lookup_after_refresh() {
        let app = app(test_state(source()).await);

        let (status, _) = send(&app, get_req("/assets/symbol/ETH")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, post_json("/assets/refresh", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (_, body) = send(&app, get_req("/assets/symbol/ETH")).await;
        assert_eq!(body, json!({ "index": 1, "symbol": "ETH" }));

        let (_, body) = send(&app, get_req("/assets/index/0")).await;
        assert_eq!(body["symbol"], "BTC");
    }

    #[tokio::test]
    async fn playground_query_renders_response_and_lands_in_history() {
        let app = app(test_state(source()).await);

        let (status, body) =
            send(&app, post_json("/playground/query", json!({ "type": "allMids" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["response"]["BTC"], "100000");
        assert_eq!(body["shape"]["kind"], "object");

        let id = body["id"].as_str().unwrap().to_string();
        let (status, body) = send(&app, get_req(&format!("/responses/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request"], json!({ "type": "allMids" }));

        let (_, body) = send(&app, get_req("/forms/playground")).await;
        assert_eq!(body["type"], "allMids");
    }

    #[tokio::test]
    async fn playground_upstream_failure_is_shown_not_raised() {
        let app = app(test_state(source()).await);

        let (status, body) = send(
            &app,
            post_json(
                "/playground/query",
                json!({ "type": "l2Book", "params": { "coin": "BTC" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "http");
        assert!(body["error"].as_str().unwrap().contains("book unavailable"));
    }

    #[tokio::test]
    async fn playground_build_validates_forms() {
        let app = app(test_state(source()).await);

        let (status, body) = send(
            &app,
            post_json("/playground/build", json!({ "type": "l2Book", "params": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (status, body) = send(
            &app,
            post_json(
                "/playground/build",
                json!({ "type": "l2Book", "params": { "coin": "SOL" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "type": "l2Book", "coin": "SOL" }));
    }

    #[tokio::test]
    async fn unknown_response_id_is_not_found() {
        let app = app(test_state(source()).await);
        let (status, _) =
            send(&app, get_req(&format!("/responses/{}", uuid::Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn orders_without_signer_are_unavailable() {
        let state = test_state(source()).await;
        state.assets.refresh().await.unwrap();
        let app = app(state);

        let (status, body) = send(
            &app,
            post_json(
                "/orders",
                json!({ "coin": "BTC", "side": "buy", "price": "100000", "size": "0.01" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "unavailable");
    }

    #[tokio::test]
    async fn dashboard_and_feed_status_are_served() {
        let app = app(test_state(source()).await);

        let (status, body) = send(&app, get_req("/dashboard")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coin"], "BTC");
        assert_eq!(body["running"], true);

        let (status, body) = send(&app, get_req("/feed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
    }

    /// Upstream feed that repeats one trades frame until the client leaves.
    async fn repeating_feed() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = json!({ "channel": "trades", "data": [{ "coin": "ETH", "px": "3500" }] })
                .to_string();
            while ws.send(WsMessage::Text(frame.clone().into())).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn feed_socket_relays_live_messages() {
        let upstream = repeating_feed().await;
        let mut state = test_state(source()).await;
        state.feed = Arc::new(FeedService::new(
            HyperliquidWsClient::new(&upstream, Duration::from_secs(2)),
            10,
        ));
        let feed = state.feed.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app(state)).await.unwrap() });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/feed/ws"))
            .await
            .unwrap();
        feed.subscribe(FeedSubscription {
            kind: FeedKind::Trades,
            coin: Some("ETH".to_string()),
            interval: None,
        })
        .await
        .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("relay ended early: {other:?}"),
                }
            }
        })
        .await
        .expect("no message relayed within 5s");

        let message: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(message["channel"], "trades");
        assert_eq!(message["data"][0]["coin"], "ETH");

        feed.unsubscribe().await;
    }
}
