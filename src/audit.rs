//! Event logging to a per-guild webhook. Each event type is a module a guild
//! can switch on or off; nothing is sent while logging is off.

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr};
use serenity::all::{
    ChannelId, Colour, CreateEmbed, CreateEmbedFooter, ExecuteWebhook, GuildId, Http, Message, User, Webhook,
};

use crate::error::BotError;
use crate::model::log_config;
use crate::model::NameList;

pub const WEBHOOK_NAME: &str = "Lumin - Log";

/// Longest message excerpt quoted in a log embed.
const EXCERPT_LIMIT: usize = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogModule {
    MessageDelete,
    MessageEdit,
    MemberJoin,
    MemberLeave,
    MemberBan,
    MemberUnban,
}

impl LogModule {
    pub const ALL: [LogModule; 6] = [
        LogModule::MessageDelete,
        LogModule::MessageEdit,
        LogModule::MemberJoin,
        LogModule::MemberLeave,
        LogModule::MemberBan,
        LogModule::MemberUnban,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogModule::MessageDelete => "message_delete",
            LogModule::MessageEdit => "message_edit",
            LogModule::MemberJoin => "member_join",
            LogModule::MemberLeave => "member_leave",
            LogModule::MemberBan => "member_ban",
            LogModule::MemberUnban => "member_unban",
        }
    }

    pub fn parse(name: &str) -> Option<LogModule> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|module| module.name() == name)
    }

    pub fn all_names() -> Vec<String> {
        Self::ALL.iter().map(|module| module.name().to_string()).collect()
    }
}

pub fn is_enabled(config: &log_config::Model, module: LogModule) -> bool {
    config.is_on && config.modules.0.iter().any(|name| name == module.name())
}

/// Turns logging on, pointing it at a webhook. The module selection survives.
pub async fn enable<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    webhook: String,
    channel: i64,
) -> Result<log_config::Model, DbErr> {
    match log_config::find(db, guild_id).await? {
        Some(existing) => {
            let mut row: log_config::ActiveModel = existing.into();
            row.webhook = Set(webhook);
            row.channel = Set(channel);
            row.is_on = Set(true);
            row.update(db).await
        }
        None => {
            log_config::ActiveModel {
                guild_id: Set(guild_id),
                webhook: Set(webhook),
                channel: Set(channel),
                is_on: Set(true),
                modules: Set(NameList(LogModule::all_names())),
                ..Default::default()
            }
            .insert(db)
            .await
        }
    }
}

/// Returns false when the guild never set logging up.
pub async fn disable<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<bool, DbErr> {
    let Some(existing) = log_config::find(db, guild_id).await? else {
        return Ok(false);
    };
    let mut row: log_config::ActiveModel = existing.into();
    row.is_on = Set(false);
    row.update(db).await?;
    Ok(true)
}

/// `"all"` or a single module name.
fn resolve_modules(name: &str) -> Result<Vec<LogModule>, BotError> {
    if name.trim().eq_ignore_ascii_case("all") {
        return Ok(LogModule::ALL.to_vec());
    }
    LogModule::parse(name).map(|module| vec![module]).ok_or_else(|| {
        BotError::bad_argument(format!(
            "`{}` is not a log module. Available: {}, all",
            name,
            LogModule::all_names().join(", ")
        ))
    })
}

async fn update_modules<C, F>(db: &C, guild_id: i64, name: &str, apply: F) -> Result<Vec<String>, BotError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut Vec<String>, Vec<LogModule>),
{
    let modules = resolve_modules(name)?;
    let existing = log_config::find(db, guild_id)
        .await?
        .ok_or_else(|| BotError::refused("Logging is not set up. Use `log on` first."))?;

    let mut names = existing.modules.0.clone();
    apply(&mut names, modules);
    let mut row: log_config::ActiveModel = existing.into();
    row.modules = Set(NameList(names.clone()));
    row.update(db).await?;
    Ok(names)
}

pub async fn add_module<C: ConnectionTrait>(db: &C, guild_id: i64, name: &str) -> Result<Vec<String>, BotError> {
    update_modules(db, guild_id, name, |names, modules| {
        for module in modules {
            if !names.iter().any(|existing| existing == module.name()) {
                names.push(module.name().to_string());
            }
        }
    })
    .await
}

pub async fn remove_module<C: ConnectionTrait>(db: &C, guild_id: i64, name: &str) -> Result<Vec<String>, BotError> {
    update_modules(db, guild_id, name, |names, modules| {
        names.retain(|existing| !modules.iter().any(|module| module.name() == existing));
    })
    .await
}

/// Posts an embed to the guild's log webhook if the module is enabled there.
pub async fn send<C: ConnectionTrait>(
    db: &C,
    http: &Http,
    guild_id: GuildId,
    module: LogModule,
    embed: CreateEmbed,
) -> Result<(), BotError> {
    let Some(config) = log_config::find(db, guild_id.get() as i64).await? else {
        return Ok(());
    };
    if !is_enabled(&config, module) {
        return Ok(());
    }

    let webhook = Webhook::from_url(http, &config.webhook).await?;
    webhook.execute(http, false, ExecuteWebhook::new().embed(embed)).await?;
    tracing::debug!(guild_id = guild_id.get(), module = module.name(), "sent log entry");
    Ok(())
}

fn excerpt(content: &str) -> String {
    if content.is_empty() {
        return "*no text content*".to_string();
    }
    let mut text: String = content.chars().take(EXCERPT_LIMIT).collect();
    if content.chars().count() > EXCERPT_LIMIT {
        text.push('…');
    }
    text
}

fn base(title: &str, colour: Colour) -> CreateEmbed {
    CreateEmbed::new().title(title).colour(colour).timestamp(Utc::now())
}

fn user_footer(user: &User) -> CreateEmbedFooter {
    CreateEmbedFooter::new(format!("User ID: {}", user.id))
}

pub fn message_deleted(channel_id: ChannelId, message: Option<&Message>) -> CreateEmbed {
    let embed = base("Message deleted", Colour::RED).field("Channel", format!("<#{}>", channel_id), true);
    match message {
        Some(message) => embed
            .field("Author", format!("<@{}>", message.author.id), true)
            .description(excerpt(&message.content))
            .footer(user_footer(&message.author)),
        None => embed.description("*message was not cached*"),
    }
}

pub fn message_edited(before: Option<&str>, after: &Message) -> CreateEmbed {
    base("Message edited", Colour::GOLD)
        .field("Channel", format!("<#{}>", after.channel_id), true)
        .field("Author", format!("<@{}>", after.author.id), true)
        .field("Before", excerpt(before.unwrap_or("")), false)
        .field("After", excerpt(&after.content), false)
        .footer(user_footer(&after.author))
}

pub fn member_joined(user: &User) -> CreateEmbed {
    base("Member joined", Colour::DARK_GREEN)
        .description(format!("<@{}> ({})", user.id, user.name))
        .field("Account created", format!("<t:{}:R>", user.created_at().unix_timestamp()), true)
        .footer(user_footer(user))
}

pub fn member_left(user: &User) -> CreateEmbed {
    base("Member left", Colour::ORANGE)
        .description(format!("<@{}> ({})", user.id, user.name))
        .footer(user_footer(user))
}

pub fn member_banned(user: &User) -> CreateEmbed {
    base("Member banned", Colour::DARK_RED)
        .description(format!("<@{}> ({})", user.id, user.name))
        .footer(user_footer(user))
}

pub fn member_unbanned(user: &User) -> CreateEmbed {
    base("Member unbanned", Colour::BLURPLE)
        .description(format!("<@{}> ({})", user.id, user.name))
        .footer(user_footer(user))
}

#[cfg(test)]
mod tests {
    use sea_orm::EntityTrait;

    use super::*;
    use crate::model::test_db;

    #[test]
    fn parses_module_names() {
        assert_eq!(LogModule::parse("Message_Delete"), Some(LogModule::MessageDelete));
        assert_eq!(LogModule::parse("member_unban"), Some(LogModule::MemberUnban));
        assert_eq!(LogModule::parse("reactions"), None);
        assert_eq!(resolve_modules("ALL").map(|all| all.len()).ok(), Some(6));
    }

    #[tokio::test]
    async fn modules_gate_sending() -> Result<(), BotError> {
        let db = test_db().await?;
        let config = enable(&db, 1, "https://example.invalid/hook".into(), 5).await?;
        assert!(is_enabled(&config, LogModule::MemberBan));

        let names = remove_module(&db, 1, "member_ban").await?;
        assert!(!names.contains(&"member_ban".to_string()));
        assert_eq!(names.len(), 5);

        let config = log_config::find(&db, 1).await?.unwrap();
        assert!(!is_enabled(&config, LogModule::MemberBan));
        assert!(is_enabled(&config, LogModule::MemberJoin));

        remove_module(&db, 1, "all").await?;
        let names = add_module(&db, 1, "message_edit").await?;
        assert_eq!(names, vec!["message_edit".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn disabling_keeps_modules_and_stops_logging() -> Result<(), BotError> {
        let db = test_db().await?;
        assert!(!disable(&db, 1).await?);

        enable(&db, 1, "https://example.invalid/hook".into(), 5).await?;
        remove_module(&db, 1, "member_join").await?;
        assert!(disable(&db, 1).await?);

        let config = log_config::find(&db, 1).await?.unwrap();
        assert!(!is_enabled(&config, LogModule::MessageDelete));

        let config = enable(&db, 1, "https://example.invalid/other".into(), 6).await?;
        assert!(config.is_on);
        assert_eq!(config.modules.0.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn module_changes_require_setup() -> Result<(), DbErr> {
        let db = test_db().await?;
        assert!(matches!(add_module(&db, 1, "all").await, Err(BotError::Refused(_))));
        assert!(matches!(add_module(&db, 1, "nope").await, Err(BotError::BadArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn second_row_for_a_guild_is_rejected() -> Result<(), DbErr> {
        let db = test_db().await?;
        let row = || log_config::ActiveModel {
            guild_id: Set(1),
            webhook: Set("https://example.invalid/hook".into()),
            channel: Set(5),
            is_on: Set(true),
            modules: Set(NameList(LogModule::all_names())),
            ..Default::default()
        };
        row().insert(&db).await?;
        assert!(row().insert(&db).await.is_err());
        assert_eq!(log_config::Entity::find().all(&db).await?.len(), 1);
        Ok(())
    }
}
