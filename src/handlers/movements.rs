use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::{inventory_item, stock_movement, stock_movement::MovementKind};
use crate::errors::ServiceError;
use crate::services::stock_ledger::MovementFilter;
use crate::validation::validate_movement;
use crate::{AppState, PaginatedResponse, Pagination};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordMovementRequest {
    pub item_id: Uuid,
    pub kind: String,
    pub amount: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub item: inventory_item::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Deserialize)]
pub struct MovementListQuery {
    pub item_id: Option<Uuid>,
    pub kind: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/stock-movements",
            get(list_movements).post(record_movement),
        )
        .route("/stock-movements/{id}", get(get_movement))
        .route("/items/{id}/stock-movements", get(list_item_movements))
}

/// Records one stock movement. The validation gate rejects malformed input
/// with field-level errors; the ledger service owns the atomic write.
async fn record_movement(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<RecordMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let checked = validate_movement(
        &state.db,
        body.item_id,
        &body.kind,
        body.amount,
        body.note.as_deref(),
    )
    .await?;

    let outcome = match checked.kind {
        MovementKind::Increase => {
            state
                .ledger
                .increase(body.item_id, checked.amount, auth_user.user_id, checked.note)
                .await?
        }
        MovementKind::Decrease => {
            state
                .ledger
                .decrease(body.item_id, checked.amount, auth_user.user_id, checked.note)
                .await?
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(MovementResponse {
            item: outcome.item,
            movement: outcome.entry,
        }),
    ))
}

async fn get_movement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let record = state.ledger.get_movement(id).await?;
    Ok(Json(record))
}

async fn list_movements(
    State(state): State<AppState>,
    Query(query): Query<MovementListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    list_with_query(&state, query).await
}

/// History restricted to one item, mirroring the flat listing's filters.
async fn list_item_movements(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(mut query): Query<MovementListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    // 404 for unknown items rather than an empty page
    state.items.get_item(id).await?;
    query.item_id = Some(id);
    list_with_query(&state, query).await
}

async fn list_with_query(
    state: &AppState,
    query: MovementListQuery,
) -> Result<axum::response::Response, ServiceError> {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(raw) => Some(MovementKind::parse(raw).ok_or_else(|| {
            ServiceError::validation("kind", "Invalid movement kind selected.")
        })?),
    };

    let (page, page_size) = Pagination::from_query(query.page, query.page_size).clamped();
    let filter = MovementFilter {
        item_id: query.item_id,
        kind,
        search: query.search,
    };
    let (records, total) = state.ledger.list_movements(filter, page, page_size).await?;
    Ok(Json(PaginatedResponse::new(records, total, page, page_size)).into_response())
}
