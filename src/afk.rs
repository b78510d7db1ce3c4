use std::sync::LazyLock;

use regex::Regex;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr};
use serenity::all::{EditMember, GuildId, Http, UserId};

use crate::model::afk;

pub const DEFAULT_REASON: &str = "Do not disturb";

const NICKNAME_LIMIT: usize = 32;
const NICKNAME_TAG: &str = "[AFK] ";

static INVITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://)?(www\.)?(discord\.(gg|io|me|li)|discordapp\.com/invite|discord\.com/invite)/\S*[a-z0-9]")
        .expect("invite pattern is valid")
});

pub fn contains_invite(text: &str) -> bool {
    INVITE.is_match(text)
}

/// `[AFK] name`, cut to Discord's nickname limit.
pub fn away_nickname(display_name: &str) -> String {
    format!("{}{}", NICKNAME_TAG, display_name)
        .chars()
        .take(NICKNAME_LIMIT)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Toggle {
    /// Now away; carries the nickname to apply.
    Away { nickname: String },
    /// Back again; carries the nickname to restore.
    Back { previous_nick: Option<String> },
}

/// Flips a member's AFK state. Going away records the current nickname so it can be restored.
pub async fn toggle<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    reason: &str,
    nickname: Option<&str>,
    display_name: &str,
) -> Result<Toggle, DbErr> {
    match afk::find(db, guild_id, user_id).await? {
        Some(row) if row.state => {
            let previous_nick = row.previous_nick.clone();
            let mut row: afk::ActiveModel = row.into();
            row.state = Set(false);
            row.update(db).await?;
            Ok(Toggle::Back { previous_nick })
        }
        Some(row) => {
            let mut row: afk::ActiveModel = row.into();
            row.state = Set(true);
            row.message = Set(reason.to_string());
            row.previous_nick = Set(nickname.map(str::to_string));
            row.update(db).await?;
            Ok(Toggle::Away { nickname: away_nickname(display_name) })
        }
        None => {
            afk::ActiveModel {
                guild_id: Set(guild_id),
                user_id: Set(user_id),
                message: Set(reason.to_string()),
                state: Set(true),
                previous_nick: Set(nickname.map(str::to_string)),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok(Toggle::Away { nickname: away_nickname(display_name) })
        }
    }
}

/// Clears AFK for a member who was away, returning the nickname to restore.
pub async fn come_back<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<Option<Option<String>>, DbErr> {
    let Some(row) = afk::find_away(db, guild_id, user_id).await? else {
        return Ok(None);
    };
    let previous_nick = row.previous_nick.clone();
    let mut row: afk::ActiveModel = row.into();
    row.state = Set(false);
    row.update(db).await?;
    Ok(Some(previous_nick))
}

/// Sets or clears (`None`) a nickname. Owners and members above the bot cannot be
/// renamed, which is not worth failing over.
pub async fn apply_nickname(http: &Http, guild_id: GuildId, user_id: UserId, nickname: Option<String>) {
    let builder = EditMember::new().nickname(nickname.unwrap_or_default());
    if let Err(err) = guild_id.edit_member(http, user_id, builder).await {
        tracing::debug!(%guild_id, %user_id, "could not change nickname: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[test]
    fn detects_invite_links() {
        assert!(contains_invite("join discord.gg/abc123"));
        assert!(contains_invite("https://discord.com/invite/rust"));
        assert!(contains_invite("https://discordapp.com/invite/xyz"));
        assert!(!contains_invite("out for lunch"));
        assert!(!contains_invite("discord is down"));
    }

    #[test]
    fn nickname_is_tagged_and_truncated() {
        assert_eq!(away_nickname("ferris"), "[AFK] ferris");
        let long = "x".repeat(40);
        assert_eq!(away_nickname(&long).chars().count(), 32);
    }

    #[tokio::test]
    async fn toggles_and_restores_nickname() -> Result<(), DbErr> {
        let db = test_db().await?;

        let first = toggle(&db, 1, 2, DEFAULT_REASON, Some("crab"), "crab").await?;
        assert_eq!(first, Toggle::Away { nickname: "[AFK] crab".into() });
        assert_eq!(afk::find_away(&db, 1, 2).await?.map(|row| row.message), Some(DEFAULT_REASON.into()));

        let second = toggle(&db, 1, 2, "ignored", None, "crab").await?;
        assert_eq!(second, Toggle::Back { previous_nick: Some("crab".into()) });
        assert!(afk::find_away(&db, 1, 2).await?.is_none());

        toggle(&db, 1, 2, "lunch", None, "ferris").await?;
        assert_eq!(come_back(&db, 1, 2).await?, Some(None));
        assert_eq!(come_back(&db, 1, 2).await?, None);
        Ok(())
    }
}
