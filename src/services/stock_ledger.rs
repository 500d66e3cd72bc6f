use crate::{
    db::DbPool,
    entities::{
        inventory_item,
        stock_movement::{self, MovementKind},
        user::{self, UserSummary},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionError, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attempts per movement before a lock conflict is surfaced to the caller.
const MAX_TXN_ATTEMPTS: u32 = 3;

/// Result of a successful ledger operation: the refreshed item and the entry
/// that was appended for it.
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub item: inventory_item::Model,
    pub entry: stock_movement::Model,
}

/// A ledger entry joined with summaries of its item and acting user.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub item: ItemSummary,
    pub actor: Option<UserSummary>,
    pub kind: String,
    pub amount: i32,
    pub note: Option<String>,
    pub recorded_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
}

impl From<&inventory_item::Model> for ItemSummary {
    fn from(item: &inventory_item::Model) -> Self {
        Self {
            id: item.id,
            sku: item.sku.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
        }
    }
}

/// Optional filters for movement history queries. Absent fields do not
/// constrain the result set.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub item_id: Option<Uuid>,
    pub kind: Option<MovementKind>,
    pub search: Option<String>,
}

/// The stock ledger. Every change to an item's quantity after creation goes
/// through here, so that quantity always equals baseline plus the signed sum
/// of the item's movements.
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Adds `amount` to the item's quantity and appends an `increase` entry.
    #[instrument(skip(self))]
    pub async fn increase(
        &self,
        item_id: Uuid,
        amount: i32,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<MovementOutcome, ServiceError> {
        self.apply_movement(item_id, MovementKind::Increase, amount, actor_id, note)
            .await
    }

    /// Subtracts `amount` from the item's quantity and appends a `decrease`
    /// entry. Fails with `InsufficientStock` when the quantity read inside
    /// the transaction is below `amount`; in that case nothing is written.
    #[instrument(skip(self))]
    pub async fn decrease(
        &self,
        item_id: Uuid,
        amount: i32,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<MovementOutcome, ServiceError> {
        self.apply_movement(item_id, MovementKind::Decrease, amount, actor_id, note)
            .await
    }

    async fn apply_movement(
        &self,
        item_id: Uuid,
        kind: MovementKind,
        amount: i32,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<MovementOutcome, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::InvalidAmount(
                "Amount must be a positive integer".to_string(),
            ));
        }

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self
                .try_apply_movement(item_id, kind, amount, actor_id, note.clone())
                .await
            {
                Ok(outcome) => break outcome,
                Err(ServiceError::DatabaseError(e))
                    if attempt < MAX_TXN_ATTEMPTS && is_lock_conflict(&e) =>
                {
                    warn!(
                        %item_id, attempt,
                        "Retrying movement after lock conflict: {}", e
                    );
                    tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
                }
                Err(ServiceError::DatabaseError(e)) if is_lock_conflict(&e) => {
                    return Err(ServiceError::Conflict(
                        "The item is being modified concurrently; please retry".to_string(),
                    ));
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            %item_id, movement_id = %outcome.entry.id, %kind, amount,
            new_quantity = outcome.item.quantity,
            "Recorded stock movement"
        );

        let event = match kind {
            MovementKind::Increase => Event::StockIncreased {
                item_id,
                movement_id: outcome.entry.id,
                amount,
                new_quantity: outcome.item.quantity,
            },
            MovementKind::Decrease => Event::StockDecreased {
                item_id,
                movement_id: outcome.entry.id,
                amount,
                new_quantity: outcome.item.quantity,
            },
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!("Failed to publish stock movement event: {}", e);
        }

        Ok(outcome)
    }

    /// One transactional attempt. The sufficiency check and the quantity
    /// write happen in the same unit of work; the UPDATE itself carries a
    /// `quantity >= amount` guard so a concurrent writer between our read
    /// and our write can never drive the quantity negative.
    async fn try_apply_movement(
        &self,
        item_id: Uuid,
        kind: MovementKind,
        amount: i32,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<MovementOutcome, ServiceError> {
        let db = self.db_pool.as_ref();

        db.transaction::<_, MovementOutcome, ServiceError>(move |txn| {
            Box::pin(async move {
                let item = inventory_item::Entity::find_by_id(item_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Item {} not found", item_id))
                    })?;

                if kind == MovementKind::Decrease && item.quantity < amount {
                    return Err(ServiceError::InsufficientStock {
                        available: item.quantity,
                        requested: amount,
                    });
                }

                let now = Utc::now();
                let quantity_expr = match kind {
                    MovementKind::Increase => {
                        Expr::col(inventory_item::Column::Quantity).add(amount)
                    }
                    MovementKind::Decrease => {
                        Expr::col(inventory_item::Column::Quantity).sub(amount)
                    }
                };

                let mut update = inventory_item::Entity::update_many()
                    .col_expr(inventory_item::Column::Quantity, quantity_expr)
                    .col_expr(inventory_item::Column::UpdatedAt, Expr::value(now))
                    .filter(inventory_item::Column::Id.eq(item_id));
                if kind == MovementKind::Decrease {
                    update = update.filter(inventory_item::Column::Quantity.gte(amount));
                }

                let result = update.exec(txn).await.map_err(ServiceError::DatabaseError)?;
                if result.rows_affected == 0 {
                    // The guard rejected the write; report the quantity a
                    // concurrent writer left behind.
                    let fresh = inventory_item::Entity::find_by_id(item_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Item {} not found", item_id))
                        })?;
                    return Err(ServiceError::InsufficientStock {
                        available: fresh.quantity,
                        requested: amount,
                    });
                }

                let entry = stock_movement::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    item_id: Set(item_id),
                    user_id: Set(actor_id),
                    kind: Set(kind.as_str().to_string()),
                    amount: Set(amount),
                    note: Set(note),
                    recorded_at: Set(now),
                }
                .insert(txn)
                .await
                .map_err(ServiceError::DatabaseError)?;

                let item = inventory_item::Entity::find_by_id(item_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Item {} not found", item_id))
                    })?;

                Ok(MovementOutcome { item, entry })
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    /// Fetches one ledger entry with its item and actor resolved.
    #[instrument(skip(self))]
    pub async fn get_movement(&self, movement_id: Uuid) -> Result<MovementRecord, ServiceError> {
        let db = self.db_pool.as_ref();

        let (entry, item) = stock_movement::Entity::find_by_id(movement_id)
            .find_also_related(inventory_item::Entity)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Movement {} not found", movement_id)))?;

        let item = item.ok_or_else(|| {
            ServiceError::InternalError(format!("Movement {} has no item", movement_id))
        })?;

        let actor = user::Entity::find_by_id(entry.user_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(build_record(entry, &item, actor.as_ref()))
    }

    /// Lists ledger entries newest-first with optional filters. `search`
    /// matches the owning item's name or SKU, or the entry's note,
    /// case-insensitively.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        filter: MovementFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<MovementRecord>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = stock_movement::Entity::find()
            .find_also_related(inventory_item::Entity)
            .order_by_desc(stock_movement::Column::RecordedAt);

        if let Some(item_id) = filter.item_id {
            query = query.filter(stock_movement::Column::ItemId.eq(item_id));
        }
        if let Some(kind) = filter.kind {
            query = query.filter(stock_movement::Column::Kind.eq(kind.as_str()));
        }
        if let Some(search) = filter.search.as_deref() {
            let pattern = format!("%{}%", search.to_lowercase());
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            inventory_item::Entity,
                            inventory_item::Column::Name,
                        ))))
                        .like(pattern.clone()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            inventory_item::Entity,
                            inventory_item::Column::Sku,
                        ))))
                        .like(pattern.clone()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            stock_movement::Entity,
                            stock_movement::Column::Note,
                        ))))
                        .like(pattern),
                    ),
            );
        }

        let paginator = query.paginate(db, page_size.max(1));
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        // Resolve actors in one pass instead of a query per row
        let actor_ids: Vec<Uuid> = rows.iter().map(|(m, _)| m.user_id).collect();
        let actors: HashMap<Uuid, user::Model> = if actor_ids.is_empty() {
            HashMap::new()
        } else {
            user::Entity::find()
                .filter(user::Column::Id.is_in(actor_ids))
                .all(db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .into_iter()
                .map(|u| (u.id, u))
                .collect()
        };

        let mut records = Vec::with_capacity(rows.len());
        for (entry, item) in rows {
            let item = item.ok_or_else(|| {
                ServiceError::InternalError(format!("Movement {} has no item", entry.id))
            })?;
            let actor = actors.get(&entry.user_id);
            records.push(build_record(entry, &item, actor));
        }

        Ok((records, total))
    }
}

fn build_record(
    entry: stock_movement::Model,
    item: &inventory_item::Model,
    actor: Option<&user::Model>,
) -> MovementRecord {
    MovementRecord {
        id: entry.id,
        item: ItemSummary::from(item),
        actor: actor.map(UserSummary::from),
        kind: entry.kind,
        amount: entry.amount,
        note: entry.note,
        recorded_at: entry.recorded_at,
    }
}

/// Transient errors worth retrying inside the service rather than failing
/// the request.
fn is_lock_conflict(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("deadlock")
        || msg.contains("lock")
        || msg.contains("busy")
        || msg.contains("could not serialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflicts_are_recognized() {
        assert!(is_lock_conflict(&DbErr::Custom(
            "database is locked".into()
        )));
        assert!(is_lock_conflict(&DbErr::Custom(
            "deadlock detected".into()
        )));
        assert!(is_lock_conflict(&DbErr::Custom(
            "could not serialize access due to concurrent update".into()
        )));
        assert!(!is_lock_conflict(&DbErr::Custom(
            "syntax error at or near".into()
        )));
    }
}
