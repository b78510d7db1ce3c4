use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter, QueryOrder};

use crate::model::cooldown;

const PRUNE_THRESHOLD: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    /// `0` for direct messages.
    pub guild_id: u64,
    pub command: String,
    pub user_id: u64,
}

impl CooldownKey {
    pub fn new(guild_id: Option<u64>, command: &str, user_id: u64) -> Self {
        CooldownKey {
            guild_id: guild_id.unwrap_or(0),
            command: command.to_string(),
            user_id,
        }
    }
}

/// Remembers when each (guild, command, user) may run again.
#[derive(Default)]
pub struct CooldownTracker {
    ready_at: Mutex<HashMap<CooldownKey, Instant>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an invocation, or returns how long the caller still has to wait.
    /// A rejected attempt does not push the deadline back.
    pub fn hit(&self, key: CooldownKey, cooldown: Duration, now: Instant) -> Result<(), Duration> {
        if cooldown.is_zero() {
            return Ok(());
        }

        let mut ready_at = self.ready_at.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(deadline) = ready_at.get(&key) {
            if *deadline > now {
                return Err(*deadline - now);
            }
        }

        if ready_at.len() >= PRUNE_THRESHOLD {
            ready_at.retain(|_, deadline| *deadline > now);
        }
        ready_at.insert(key, now + cooldown);
        Ok(())
    }

    /// Forgets every pending cooldown of a command in a guild.
    pub fn reset(&self, guild_id: u64, command: &str) {
        let mut ready_at = self.ready_at.lock().unwrap_or_else(PoisonError::into_inner);
        ready_at.retain(|key, _| !(key.guild_id == guild_id && key.command == command));
    }
}

pub fn from_deciseconds(deciseconds: i64) -> Duration {
    Duration::from_millis(deciseconds.max(0) as u64 * 100)
}

pub fn to_deciseconds(duration: Duration) -> i64 {
    (duration.as_millis() / 100).min(i64::MAX as u128) as i64
}

/// The guild's override for a command if it set one, otherwise the command's default.
pub async fn effective_cooldown<C: ConnectionTrait>(
    db: &C,
    guild_id: Option<u64>,
    command: &str,
    default: Option<Duration>,
) -> Result<Duration, DbErr> {
    if let Some(guild_id) = guild_id {
        if let Some(row) = cooldown::find(db, guild_id as i64, command).await? {
            return Ok(from_deciseconds(row.cooldown));
        }
    }
    Ok(default.unwrap_or(Duration::ZERO))
}

/// Stores a guild's cooldown for a command, replacing any earlier override.
pub async fn set_override<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    command: &str,
    cooldown: Duration,
) -> Result<cooldown::Model, DbErr> {
    match cooldown::find(db, guild_id, command).await? {
        Some(existing) => {
            let mut row: cooldown::ActiveModel = existing.into();
            row.cooldown = Set(to_deciseconds(cooldown));
            row.update(db).await
        }
        None => {
            cooldown::ActiveModel {
                guild_id: Set(guild_id),
                command: Set(command.to_string()),
                cooldown: Set(to_deciseconds(cooldown)),
                ..Default::default()
            }
            .insert(db)
            .await
        }
    }
}

/// Returns false when the guild had no override for the command.
pub async fn clear_override<C: ConnectionTrait>(db: &C, guild_id: i64, command: &str) -> Result<bool, DbErr> {
    match cooldown::find(db, guild_id, command).await? {
        Some(row) => row.delete(db).await.map(|_| true),
        None => Ok(false),
    }
}

pub async fn overrides<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Vec<cooldown::Model>, DbErr> {
    cooldown::Entity::find()
        .filter(cooldown::Column::GuildId.eq(guild_id))
        .order_by_asc(cooldown::Column::Command)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    fn key(user_id: u64) -> CooldownKey {
        CooldownKey::new(Some(1), "work", user_id)
    }

    #[test]
    fn rejects_within_window_and_reports_remaining() {
        let tracker = CooldownTracker::new();
        let start = Instant::now();
        let hour = Duration::from_secs(3600);

        assert!(tracker.hit(key(5), hour, start).is_ok());
        let remaining = tracker.hit(key(5), hour, start + Duration::from_secs(600)).unwrap_err();
        assert_eq!(remaining, Duration::from_secs(3000));

        // other users are unaffected
        assert!(tracker.hit(key(6), hour, start + Duration::from_secs(600)).is_ok());
        assert!(tracker.hit(key(5), hour, start + hour).is_ok());
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_window() {
        let tracker = CooldownTracker::new();
        let start = Instant::now();
        let minute = Duration::from_secs(60);

        tracker.hit(key(5), minute, start).unwrap();
        assert!(tracker.hit(key(5), minute, start + Duration::from_secs(59)).is_err());
        assert!(tracker.hit(key(5), minute, start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn zero_cooldown_never_throttles() {
        let tracker = CooldownTracker::new();
        let now = Instant::now();
        for _ in 0..3 {
            assert!(tracker.hit(key(5), Duration::ZERO, now).is_ok());
        }
    }

    #[test]
    fn reset_clears_one_command_in_one_guild() {
        let tracker = CooldownTracker::new();
        let now = Instant::now();
        let hour = Duration::from_secs(3600);
        tracker.hit(key(5), hour, now).unwrap();
        tracker.hit(CooldownKey::new(Some(2), "work", 5), hour, now).unwrap();

        tracker.reset(1, "work");
        assert!(tracker.hit(key(5), hour, now).is_ok());
        assert!(tracker.hit(CooldownKey::new(Some(2), "work", 5), hour, now).is_err());
    }

    #[test]
    fn converts_deciseconds() {
        assert_eq!(from_deciseconds(25), Duration::from_millis(2500));
        assert_eq!(to_deciseconds(Duration::from_secs(3600)), 36_000);
        assert_eq!(from_deciseconds(-4), Duration::ZERO);
    }

    #[tokio::test]
    async fn guild_override_wins_over_default() -> Result<(), DbErr> {
        let db = test_db().await?;
        cooldown::ActiveModel {
            guild_id: Set(1),
            command: Set("work".to_string()),
            cooldown: Set(50),
            ..Default::default()
        }
        .insert(&db)
        .await?;

        let default = Some(Duration::from_secs(3600));
        assert_eq!(effective_cooldown(&db, Some(1), "work", default).await?, Duration::from_secs(5));
        assert_eq!(effective_cooldown(&db, Some(2), "work", default).await?, Duration::from_secs(3600));
        assert_eq!(effective_cooldown(&db, None, "crime", None).await?, Duration::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn overrides_are_replaced_and_cleared() -> Result<(), DbErr> {
        let db = test_db().await?;
        set_override(&db, 1, "work", Duration::from_secs(60)).await?;
        set_override(&db, 1, "work", Duration::from_secs(90)).await?;
        set_override(&db, 1, "daily", Duration::ZERO).await?;

        let rows = overrides(&db, 1).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].command, "daily");
        assert_eq!(from_deciseconds(rows[1].cooldown), Duration::from_secs(90));

        assert!(clear_override(&db, 1, "work").await?);
        assert!(!clear_override(&db, 1, "work").await?);
        assert!(overrides(&db, 2).await?.is_empty());
        Ok(())
    }
}
