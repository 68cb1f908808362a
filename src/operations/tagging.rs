//! Tag operations on references

use crate::domain::{AddTagsOutcome, RemoveTagsOutcome, TagPage};
use crate::error::{RegistryError, RegistryResult};
use crate::infrastructure::database::queries::{reference, tags};
use crate::infrastructure::database::queries::tags::TagOrder;
use crate::infrastructure::database::Database;
use sea_orm::TransactionTrait;
use uuid::Uuid;

async fn require_owned_reference(
    conn: &sea_orm::DatabaseTransaction,
    reference_id: Uuid,
    owner_id: &str,
) -> RegistryResult<()> {
    let reference_model = reference::get_reference_by_id(conn, reference_id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("reference {reference_id}")))?;
    if !reference_model.visible_to(owner_id) {
        return Err(RegistryError::NotFound(format!("reference {reference_id}")));
    }
    Ok(())
}

/// Add tags to a reference.
pub async fn apply_tags(
    db: &Database,
    reference_id: Uuid,
    tag_names: &[String],
    origin: &str,
    owner_id: &str,
) -> RegistryResult<AddTagsOutcome> {
    let txn = db.conn().begin().await?;
    require_owned_reference(&txn, reference_id, owner_id).await?;
    let outcome = tags::add_tags_to_reference(&txn, reference_id, tag_names, origin).await?;
    txn.commit().await?;
    Ok(outcome)
}

/// Remove tags from a reference.
pub async fn remove_tags(
    db: &Database,
    reference_id: Uuid,
    tag_names: &[String],
    owner_id: &str,
) -> RegistryResult<RemoveTagsOutcome> {
    let txn = db.conn().begin().await?;
    require_owned_reference(&txn, reference_id, owner_id).await?;
    let outcome = tags::remove_tags_from_reference(&txn, reference_id, tag_names).await?;
    txn.commit().await?;
    Ok(outcome)
}

/// List tags with usage counts over references visible to the caller.
pub async fn list_tags(
    db: &Database,
    owner_id: &str,
    prefix: Option<&str>,
    include_zero: bool,
    order: TagOrder,
    limit: u64,
    offset: u64,
) -> RegistryResult<TagPage> {
    let limit = limit.clamp(1, 1000);
    let (rows, total) =
        tags::list_tags_with_usage(db.conn(), owner_id, prefix, include_zero, order, limit, offset)
            .await?;
    Ok(TagPage { tags: rows, total })
}
