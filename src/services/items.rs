use crate::{
    db::DbPool,
    entities::{inventory_item, stock_movement},
    errors::{FieldError, ServiceError},
    events::{Event, EventSender},
    validation,
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Fields accepted when creating an item. `initial_quantity` becomes the
/// item's baseline and is not backed by a ledger entry.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub initial_quantity: i32,
}

/// Partial update of item metadata. Quantity is deliberately absent; it can
/// only change through the stock ledger.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

/// CRUD for inventory item metadata.
pub struct ItemService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ItemService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_item(&self, new: NewItem) -> Result<inventory_item::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let mut errors = Vec::new();

        if !validation::is_valid_sku(&new.sku) {
            errors.push(FieldError::new(
                "sku",
                "SKU must match the pattern XXX-YYY-123 (upper-case, max 15 characters).",
            ));
        }
        if new.name.is_empty() || new.name.chars().count() > 255 {
            errors.push(FieldError::new(
                "name",
                "Name must be between 1 and 255 characters.",
            ));
        }
        if let Some(desc) = &new.description {
            if desc.chars().count() > 5000 {
                errors.push(FieldError::new(
                    "description",
                    "Description cannot exceed 5000 characters.",
                ));
            }
        }
        if new.initial_quantity < 0 {
            errors.push(FieldError::new(
                "initial_quantity",
                "Initial quantity cannot be negative.",
            ));
        }

        if errors.is_empty() && self.sku_taken(&new.sku, None).await? {
            errors.push(FieldError::new("sku", "The SKU has already been taken."));
        }

        if !errors.is_empty() {
            return Err(ServiceError::ValidationFailed(errors));
        }

        let now = Utc::now();
        let item = inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(new.sku),
            name: Set(new.name),
            description: Set(new.description),
            quantity: Set(new.initial_quantity),
            baseline_quantity: Set(new.initial_quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

        info!(item_id = %item.id, sku = %item.sku, "Created inventory item");
        if let Err(e) = self.event_sender.send(Event::ItemCreated(item.id)).await {
            warn!("Failed to publish item created event: {}", e);
        }

        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: Uuid) -> Result<inventory_item::Model, ServiceError> {
        inventory_item::Entity::find_by_id(item_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", item_id)))
    }

    /// Lists items newest-first. `search` matches name or SKU by substring,
    /// case-insensitively.
    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        search: Option<String>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<inventory_item::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query =
            inventory_item::Entity::find().order_by_desc(inventory_item::Column::CreatedAt);

        if let Some(search) = search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = format!("%{}%", search.trim().to_lowercase());
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(inventory_item::Column::Name)))
                            .like(pattern.clone()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(inventory_item::Column::Sku)))
                            .like(pattern),
                    ),
            );
        }

        let paginator = query.paginate(db, page_size.max(1));
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let items = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((items, total))
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        item_id: Uuid,
        update: ItemUpdate,
    ) -> Result<inventory_item::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let item = self.get_item(item_id).await?;

        let mut errors = Vec::new();
        if let Some(sku) = &update.sku {
            if !validation::is_valid_sku(sku) {
                errors.push(FieldError::new(
                    "sku",
                    "SKU must match the pattern XXX-YYY-123 (upper-case, max 15 characters).",
                ));
            } else if sku != &item.sku && self.sku_taken(sku, Some(item_id)).await? {
                errors.push(FieldError::new("sku", "The SKU has already been taken."));
            }
        }
        if let Some(name) = &update.name {
            if name.is_empty() || name.chars().count() > 255 {
                errors.push(FieldError::new(
                    "name",
                    "Name must be between 1 and 255 characters.",
                ));
            }
        }
        if let Some(Some(desc)) = &update.description {
            if desc.chars().count() > 5000 {
                errors.push(FieldError::new(
                    "description",
                    "Description cannot exceed 5000 characters.",
                ));
            }
        }
        if !errors.is_empty() {
            return Err(ServiceError::ValidationFailed(errors));
        }

        let mut active: inventory_item::ActiveModel = item.into();
        if let Some(sku) = update.sku {
            active.sku = Set(sku);
        }
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(description) = update.description {
            active.description = Set(description);
        }
        active.updated_at = Set(Utc::now());

        let item = active.update(db).await.map_err(ServiceError::DatabaseError)?;

        info!(item_id = %item.id, "Updated inventory item");
        if let Err(e) = self.event_sender.send(Event::ItemUpdated(item.id)).await {
            warn!("Failed to publish item updated event: {}", e);
        }

        Ok(item)
    }

    /// Deletes an item, refusing when any ledger entries reference it. The
    /// audit trail outlives attempts to remove its subject.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, item_id: Uuid) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let item = self.get_item(item_id).await?;

        let movement_count = stock_movement::Entity::find()
            .filter(stock_movement::Column::ItemId.eq(item_id))
            .count(db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        if movement_count > 0 {
            return Err(ServiceError::Conflict(format!(
                "Item {} has {} recorded stock movements and cannot be deleted",
                item_id, movement_count
            )));
        }

        item.delete(db).await.map_err(ServiceError::DatabaseError)?;

        info!(%item_id, "Deleted inventory item");
        if let Err(e) = self.event_sender.send(Event::ItemDeleted(item_id)).await {
            warn!("Failed to publish item deleted event: {}", e);
        }

        Ok(())
    }

    async fn sku_taken(&self, sku: &str, ignore: Option<Uuid>) -> Result<bool, ServiceError> {
        let mut query =
            inventory_item::Entity::find().filter(inventory_item::Column::Sku.eq(sku));
        if let Some(id) = ignore {
            query = query.filter(inventory_item::Column::Id.ne(id));
        }
        let count = query
            .count(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(count > 0)
    }
}
