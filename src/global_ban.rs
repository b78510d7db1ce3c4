//! Users banned across every guild that opted in, with per-guild exemptions.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter};

use serenity::all::{GuildId, Http, UserId};

use crate::error::BotError;
use crate::model::{global_ban, global_ban_exemption, guild};

const AUDIT_REASON_LIMIT: usize = 512;

pub async fn find<C: ConnectionTrait>(db: &C, user_id: i64) -> Result<Option<global_ban::Model>, DbErr> {
    global_ban::Entity::find()
        .filter(global_ban::Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn all<C: ConnectionTrait>(db: &C) -> Result<Vec<global_ban::Model>, DbErr> {
    global_ban::Entity::find().all(db).await
}

/// Returns false when the user was already listed.
pub async fn add<C: ConnectionTrait>(db: &C, user_id: i64, reason: Option<String>, moderator_id: i64) -> Result<bool, DbErr> {
    if find(db, user_id).await?.is_some() {
        return Ok(false);
    }
    global_ban::ActiveModel {
        user_id: Set(user_id),
        reason: Set(reason),
        moderator_id: Set(moderator_id),
        created: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(true)
}

pub async fn remove<C: ConnectionTrait>(db: &C, user_id: i64) -> Result<bool, DbErr> {
    match find(db, user_id).await? {
        Some(row) => row.delete(db).await.map(|_| true),
        None => Ok(false),
    }
}

async fn find_exemption<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
) -> Result<Option<global_ban_exemption::Model>, DbErr> {
    global_ban_exemption::Entity::find()
        .filter(global_ban_exemption::Column::GuildId.eq(guild_id))
        .filter(global_ban_exemption::Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn exempt<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64, added_by: i64) -> Result<bool, DbErr> {
    if find_exemption(db, guild_id, user_id).await?.is_some() {
        return Ok(false);
    }
    global_ban_exemption::ActiveModel {
        guild_id: Set(guild_id),
        user_id: Set(user_id),
        added_by: Set(added_by),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(true)
}

pub async fn unexempt<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<bool, DbErr> {
    match find_exemption(db, guild_id, user_id).await? {
        Some(row) => row.delete(db).await.map(|_| true),
        None => Ok(false),
    }
}

/// The ban to enforce when this user is in this guild, if any.
pub async fn enforceable<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
) -> Result<Option<global_ban::Model>, DbErr> {
    let opted_in = guild::Entity::find_by_id(guild_id)
        .one(db)
        .await?
        .is_some_and(|settings| settings.global_bans);
    if !opted_in {
        return Ok(None);
    }
    let Some(ban) = find(db, user_id).await? else {
        return Ok(None);
    };
    if find_exemption(db, guild_id, user_id).await?.is_some() {
        return Ok(None);
    }
    Ok(Some(ban))
}

pub fn audit_reason(ban: &global_ban::Model) -> String {
    let reason = match &ban.reason {
        Some(reason) => format!("Global ban: {}", reason),
        None => "Global ban".to_string(),
    };
    reason.chars().take(AUDIT_REASON_LIMIT).collect()
}

/// Bans the user from the guild if a global ban applies there. Returns whether it did.
pub async fn enforce<C: ConnectionTrait>(db: &C, http: &Http, guild_id: GuildId, user_id: UserId) -> Result<bool, BotError> {
    let Some(ban) = enforceable(db, guild_id.get() as i64, user_id.get() as i64).await? else {
        return Ok(false);
    };
    guild_id.ban_with_reason(http, user_id, 0, audit_reason(&ban)).await?;
    tracing::info!(%guild_id, %user_id, "enforced global ban");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    async fn opt_in<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<(), DbErr> {
        let mut settings: guild::ActiveModel = guild::ensure(db, guild_id).await?.into();
        settings.global_bans = Set(true);
        settings.update(db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn enforced_only_in_opted_in_guilds_without_exemption() -> Result<(), DbErr> {
        let db = test_db().await?;
        assert!(add(&db, 50, Some("raids".into()), 1).await?);
        assert!(!add(&db, 50, None, 1).await?);

        guild::ensure(&db, 1).await?;
        assert!(enforceable(&db, 1, 50).await?.is_none());

        opt_in(&db, 1).await?;
        let ban = enforceable(&db, 1, 50).await?.expect("ban applies");
        assert_eq!(audit_reason(&ban), "Global ban: raids");
        assert!(enforceable(&db, 1, 51).await?.is_none());

        assert!(exempt(&db, 1, 50, 9).await?);
        assert!(enforceable(&db, 1, 50).await?.is_none());
        assert!(unexempt(&db, 1, 50).await?);
        assert!(enforceable(&db, 1, 50).await?.is_some());

        assert!(remove(&db, 50).await?);
        assert!(enforceable(&db, 1, 50).await?.is_none());
        Ok(())
    }
}
