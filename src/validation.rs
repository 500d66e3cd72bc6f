use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{inventory_item, stock_movement::MovementKind};
use crate::errors::{FieldError, ServiceError};

/// SKU format: three hyphen-separated groups, upper-case alphanumerics,
/// 1-4 / 1-4 / 1-5 characters, digits only in the last group.
static SKU_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{1,4}-[A-Z0-9]{1,4}-[0-9]{1,5}$").expect("valid regex"));

pub const MAX_SKU_LEN: usize = 15;
pub const MAX_NOTE_LEN: usize = 1000;

pub fn is_valid_sku(sku: &str) -> bool {
    sku.len() <= MAX_SKU_LEN && SKU_PATTERN.is_match(sku)
}

/// A movement request after the gate has checked its structure. The ledger
/// service re-reads the item inside its transaction, so the gate hands back
/// only the parsed fields.
#[derive(Debug, Clone)]
pub struct CheckedMovement {
    pub kind: MovementKind,
    pub amount: i32,
    pub note: Option<String>,
}

/// Pre-flight gate for movement requests. Rejects structurally invalid input
/// with field-level detail before the ledger service is invoked.
///
/// For decreases this also runs an advisory stock check against a best-effort
/// read. The authoritative check happens inside the ledger transaction, which
/// can still reject a request this gate approved.
pub async fn validate_movement(
    db: &DbPool,
    item_id: Uuid,
    kind: &str,
    amount: i64,
    note: Option<&str>,
) -> Result<CheckedMovement, ServiceError> {
    let mut errors = Vec::new();

    let item = inventory_item::Entity::find_by_id(item_id).one(db).await?;
    if item.is_none() {
        errors.push(FieldError::new("item_id", "The selected item does not exist."));
    }

    let parsed_kind = MovementKind::parse(kind);
    if parsed_kind.is_none() {
        errors.push(FieldError::new("kind", "Invalid movement kind selected."));
    }

    if amount < 1 {
        errors.push(FieldError::new("amount", "Amount must be at least 1."));
    } else if amount > i32::MAX as i64 {
        errors.push(FieldError::new("amount", "Amount is too large."));
    }

    if let Some(n) = note {
        if n.chars().count() > MAX_NOTE_LEN {
            errors.push(FieldError::new(
                "note",
                "Note cannot exceed 1000 characters.",
            ));
        }
    }

    // Advisory only; a concurrent decrease can invalidate this between the
    // read and the transaction.
    if let (Some(item), Some(MovementKind::Decrease)) = (&item, parsed_kind) {
        if errors.is_empty() && item.quantity < amount as i32 {
            errors.push(FieldError::new(
                "amount",
                format!(
                    "Insufficient stock. Current stock is {} units, but you're trying to reduce by {} units.",
                    item.quantity, amount
                ),
            ));
        }
    }

    if !errors.is_empty() {
        return Err(ServiceError::ValidationFailed(errors));
    }

    let Some(kind) = parsed_kind else {
        return Err(ServiceError::InternalError(
            "movement validation reached an inconsistent state".into(),
        ));
    };

    Ok(CheckedMovement {
        kind,
        amount: amount as i32,
        note: note.map(|n| n.to_string()),
    })
}
