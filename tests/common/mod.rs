#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use stocktrack_api::{
    app_router,
    config::AppConfig,
    db,
    entities::inventory_item,
    events,
    services::items::NewItem,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

/// Test harness backed by an in-memory SQLite database. The pool is pinned
/// to a single connection so every query sees the same in-memory database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub token: String,
    pub user_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let (event_sender, event_rx) = events::event_channel(100);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(pool, cfg, event_sender);
        let router = app_router(state.clone());

        let (user, token) = state
            .auth
            .register("Test User", "tester@example.com", "a sound passphrase")
            .await
            .expect("register test user");

        Self {
            router,
            state,
            token,
            user_id: user.id,
            _event_task: event_task,
        }
    }

    pub async fn seed_item(&self, sku: &str, name: &str, quantity: i32) -> inventory_item::Model {
        self.state
            .items
            .create_item(NewItem {
                sku: sku.to_string(),
                name: name.to_string(),
                description: None,
                initial_quantity: quantity,
            })
            .await
            .expect("seed item")
    }

    /// Sends a request through the router without touching the network.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let token = self.token.clone();
        self.request(Method::GET, path, None, Some(&token)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let token = self.token.clone();
        self.request(Method::POST, path, Some(body), Some(&token))
            .await
    }

    pub async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let token = self.token.clone();
        self.request(Method::PUT, path, Some(body), Some(&token))
            .await
    }

    pub async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let token = self.token.clone();
        self.request(Method::DELETE, path, None, Some(&token)).await
    }
}
