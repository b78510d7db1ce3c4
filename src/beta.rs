//! Guilds admitted to the closed beta. Only consulted when `closed_beta` is on.

use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait};

use crate::model::closed_beta;

pub async fn is_allowed<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<bool, DbErr> {
    Ok(closed_beta::Entity::find_by_id(guild_id).one(db).await?.is_some())
}

/// Returns false when the guild was already admitted.
pub async fn allow<C: ConnectionTrait>(db: &C, guild_id: i64, added_by: i64) -> Result<bool, DbErr> {
    if is_allowed(db, guild_id).await? {
        return Ok(false);
    }
    closed_beta::ActiveModel {
        guild_id: Set(guild_id),
        added_by: Set(added_by),
    }
    .insert(db)
    .await?;
    Ok(true)
}

pub async fn revoke<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<bool, DbErr> {
    match closed_beta::Entity::find_by_id(guild_id).one(db).await? {
        Some(row) => row.delete(db).await.map(|_| true),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[tokio::test]
    async fn admits_and_revokes() -> Result<(), DbErr> {
        let db = test_db().await?;
        assert!(!is_allowed(&db, 7).await?);
        assert!(allow(&db, 7, 1).await?);
        assert!(!allow(&db, 7, 2).await?);
        assert!(is_allowed(&db, 7).await?);
        assert!(revoke(&db, 7).await?);
        assert!(!revoke(&db, 7).await?);
        assert!(!is_allowed(&db, 7).await?);
        Ok(())
    }
}
