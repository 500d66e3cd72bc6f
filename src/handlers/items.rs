use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::items::{ItemUpdate, NewItem};
use crate::{AppState, PaginatedResponse, Pagination};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateItemRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub initial_quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateItemRequest {
    pub sku: Option<String>,
    pub name: Option<String>,
    /// An empty string clears the description
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemListQuery {
    pub search: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/{id}",
            get(get_item).put(update_item).delete(delete_item),
        )
}

async fn create_item(
    State(state): State<AppState>,
    Json(body): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state
        .items
        .create_item(NewItem {
            sku: body.sku,
            name: body.name,
            description: body.description.filter(|d| !d.is_empty()),
            initial_quantity: body.initial_quantity,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state.items.get_item(id).await?;
    Ok(Json(item))
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (page, page_size) = Pagination::from_query(query.page, query.page_size).clamped();
    let (items, total) = state.items.list_items(query.search, page, page_size).await?;
    Ok(Json(PaginatedResponse::new(items, total, page, page_size)))
}

async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let update = ItemUpdate {
        sku: body.sku,
        name: body.name,
        description: body
            .description
            .map(|d| if d.is_empty() { None } else { Some(d) }),
    };
    let item = state.items.update_item(id, update).await?;
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.items.delete_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
