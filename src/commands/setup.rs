//! Per-guild settings: prefix, embed colour and global ban participation.

use sea_orm::ActiveModelTrait;
use sea_orm::ActiveValue::Set;
use serenity::all::{Context, GuildId, Permissions, UserId};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::global_ban;
use crate::model::guild;
use crate::state::BotState;

const PREFIX_LIMIT: usize = 10;

const PREFIX_PARAMS: &[Param] = &[
    Param::required("value", ParamKind::String, "The new prefix"),
    Param::optional("mention", ParamKind::Boolean, "Whether mentioning the bot also works as a prefix"),
];
const COLOR_PARAMS: &[Param] =
    &[Param::required("hex", ParamKind::String, "Colour such as #5865F2, or `reset` for the default")];
const GLOBAL_BAN_PARAMS: &[Param] =
    &[Param::required("enabled", ParamKind::Boolean, "Whether users on the global ban list are banned here")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("prefix", "Change the prefix for text commands")
        .params(PREFIX_PARAMS)
        .permissions(Permissions::ADMINISTRATOR),
    CommandInfo::new("settings color", "Change the colour of the bot's embeds")
        .params(COLOR_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("settings globalbans", "Opt in or out of global bans")
        .params(GLOBAL_BAN_PARAMS)
        .permissions(Permissions::MANAGE_GUILD)
        .bot_permissions(Permissions::BAN_MEMBERS),
    CommandInfo::new("settings show", "Show this server's settings"),
];

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let settings = match &invocation.settings {
        Some(settings) => settings.clone(),
        None => guild::ensure(&state.db, guild_id.get() as i64).await?,
    };

    match invocation.info.name {
        "prefix" => {
            let prefix = validate_prefix(&invocation.args.require_string("value")?)?;
            let mention = invocation.args.boolean("mention").unwrap_or(settings.mention);
            let mut row: guild::ActiveModel = settings.into();
            row.prefix = Set(prefix.clone());
            row.mention = Set(mention);
            row.update(&state.db).await?;
            let suffix = if mention { " Mentioning me works too." } else { "" };
            Ok(Reply::text(format!("The prefix is now `{}`.{}", prefix, suffix)))
        }
        "settings color" => {
            let color = parse_colour(&invocation.args.require_string("hex")?)?;
            let mut row: guild::ActiveModel = settings.into();
            row.color = Set(color);
            row.update(&state.db).await?;
            Ok(Reply::text(match color {
                Some(color) => format!("Embeds now use `#{:06X}`.", color),
                None => "Embeds use the default colour again.".to_string(),
            }))
        }
        "settings globalbans" => {
            let enabled = invocation.args.require_boolean("enabled")?;
            let mut row: guild::ActiveModel = settings.into();
            row.global_bans = Set(enabled);
            row.update(&state.db).await?;
            if !enabled {
                return Ok(Reply::text("Global bans are no longer enforced here."));
            }
            let banned = ban_listed_members(ctx, state, guild_id).await?;
            Ok(Reply::text(format!(
                "Global bans are now enforced here. {} listed member(s) were banned.",
                banned
            )))
        }
        "settings show" => {
            let color = settings
                .color
                .map_or_else(|| "Default".to_string(), |color| format!("#{:06X}", color));
            let log_channel = settings
                .log_channel
                .map_or_else(|| "Off".to_string(), |channel| format!("<#{}>", channel));
            let embed = invocation
                .embed()
                .title("Server settings")
                .field("Prefix", format!("`{}`", settings.prefix), true)
                .field("Mention prefix", on_off(settings.mention), true)
                .field("Colour", color, true)
                .field("Global bans", on_off(settings.global_bans), true)
                .field("Log channel", log_channel, true);
            Ok(Reply::embed(embed))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "On"
    } else {
        "Off"
    }
}

fn validate_prefix(value: &str) -> Result<String, BotError> {
    let prefix = value.trim();
    if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
        return Err(BotError::bad_argument("The prefix cannot be empty or contain spaces."));
    }
    if prefix.chars().count() > PREFIX_LIMIT {
        return Err(BotError::bad_argument(format!(
            "The prefix can be at most {} characters long.",
            PREFIX_LIMIT
        )));
    }
    Ok(prefix.to_string())
}

/// `#5865F2`, `5865f2` or `0x5865F2`. `reset` and `default` go back to the default colour.
fn parse_colour(value: &str) -> Result<Option<i32>, BotError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("reset") || value.eq_ignore_ascii_case("default") {
        return Ok(None);
    }
    let digits = value
        .strip_prefix('#')
        .or_else(|| value.strip_prefix("0x"))
        .unwrap_or(value);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BotError::bad_argument(format!("`{}` is not a hex colour.", value)));
    }
    i32::from_str_radix(digits, 16)
        .map(Some)
        .map_err(|_| BotError::bad_argument(format!("`{}` is not a hex colour.", value)))
}

/// Bans cached members who are on the global ban list, for guilds that just opted in.
async fn ban_listed_members(ctx: &Context, state: &BotState, guild_id: GuildId) -> Result<usize, BotError> {
    let members: Vec<UserId> = match ctx.cache.guild(guild_id) {
        Some(guild) => guild.members.keys().copied().collect(),
        None => Vec::new(),
    };

    let mut banned = 0;
    for ban in global_ban::all(&state.db).await? {
        let user_id = UserId::new(ban.user_id as u64);
        if !members.contains(&user_id) {
            continue;
        }
        match global_ban::enforce(&state.db, &ctx.http, guild_id, user_id).await {
            Ok(true) => banned += 1,
            Ok(false) => {}
            Err(err) => tracing::warn!(%guild_id, %user_id, "could not enforce global ban: {}", err),
        }
    }
    Ok(banned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_short_and_unspaced() {
        assert_eq!(validate_prefix(" !! ").unwrap(), "!!");
        assert!(validate_prefix("a b").is_err());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("abcdefghijk").is_err());
    }

    #[test]
    fn colours_accept_common_notations() {
        assert_eq!(parse_colour("#5865F2").unwrap(), Some(0x5865F2));
        assert_eq!(parse_colour("ff0000").unwrap(), Some(0xFF0000));
        assert_eq!(parse_colour("0x00ff00").unwrap(), Some(0x00FF00));
        assert_eq!(parse_colour("reset").unwrap(), None);
        assert!(parse_colour("#12345").is_err());
        assert!(parse_colour("purple").is_err());
    }
}
