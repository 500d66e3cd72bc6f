//! Inventory tracking backend.
//!
//! Product records plus an append-only stock movement ledger. Every change
//! to an item's quantity after creation flows through the ledger service,
//! which guarantees that quantity always equals the creation-time baseline
//! plus the signed sum of the item's movements, and never goes negative.

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;
pub mod validation;

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{items::ItemService, stock_ledger::StockLedgerService};

const MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 25;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub items: Arc<ItemService>,
    pub ledger: Arc<StockLedgerService>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, event_sender: EventSender) -> Self {
        let db = Arc::new(db);
        let event_sender = Arc::new(event_sender);
        let items = Arc::new(ItemService::new(db.clone(), event_sender.clone()));
        let ledger = Arc::new(StockLedgerService::new(db.clone(), event_sender.clone()));
        let auth = Arc::new(AuthService::new(
            db.clone(),
            event_sender.clone(),
            config.token_ttl_secs,
        ));

        Self {
            db,
            config: Arc::new(config),
            event_sender,
            items,
            ledger,
            auth,
        }
    }
}

/// One-based page selector shared by all list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl Pagination {
    /// Builds a pagination from optional query parameters, filling defaults.
    pub fn from_query(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or_else(default_page),
            page_size: page_size.unwrap_or_else(default_page_size),
        }
    }

    /// Normalizes out-of-range values instead of rejecting them.
    pub fn clamped(&self) -> (u64, u64) {
        let page = self.page.max(1);
        let page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        (page, page_size)
    }
}

/// Envelope for paginated list responses.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, page_size: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(page_size.max(1))
        };
        Self {
            data,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let database = match db::check_connection(&state.db).await {
        Ok(()) => "connected",
        Err(_) => "unavailable",
    };
    Json(serde_json::json!({
        "status": "ok",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "status": "running",
    }))
}

/// Builds the full application router. Everything under /api/v1 except the
/// register and login endpoints requires a bearer token.
pub fn app_router(state: AppState) -> Router {
    let auth_guard = middleware::from_fn_with_state(state.auth.clone(), auth::require_auth);

    let protected = Router::new()
        .merge(handlers::items::routes())
        .merge(handlers::movements::routes())
        .with_state(state.clone())
        .nest("/auth", auth::protected_routes().with_state(state.auth.clone()))
        .route_layer(auth_guard);

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state.clone())
        .nest("/auth", auth::public_routes().with_state(state.auth.clone()));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .nest("/api/v1", public.merge(protected))
}
