use chrono::Utc;
use serenity::all::{Context, Permissions};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::giveaway::{self, NewGiveaway};
use crate::model::giveaway as giveaway_model;
use crate::state::BotState;

const MAX_WINNERS: i64 = 20;
const MIN_LENGTH_SECS: u64 = 10;

const START_PARAMS: &[Param] = &[
    Param::required("duration", ParamKind::Duration, "How long the giveaway runs, e.g. 1d"),
    Param::required("winners", ParamKind::Integer, "Number of winners"),
    Param::required("prize", ParamKind::String, "What is being given away").rest(),
];
const MESSAGE_PARAMS: &[Param] = &[Param::required("message_id", ParamKind::String, "ID of the giveaway message")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("giveaway start", "Start a giveaway in this channel")
        .params(START_PARAMS)
        .permissions(Permissions::MANAGE_GUILD)
        .bot_permissions(Permissions::ADD_REACTIONS.union(Permissions::EMBED_LINKS)),
    CommandInfo::new("giveaway end", "End a giveaway now")
        .params(MESSAGE_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("giveaway reroll", "Draw new winners for an ended giveaway")
        .params(MESSAGE_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("giveaway list", "Show the running giveaways"),
];

fn parse_message_id(raw: &str) -> Result<i64, BotError> {
    // accepts a bare id or a message link
    let id = raw.trim().rsplit('/').next().unwrap_or_default();
    id.parse::<u64>()
        .ok()
        .filter(|id| *id != 0 && *id <= i64::MAX as u64)
        .map(|id| id as i64)
        .ok_or_else(|| BotError::bad_argument(format!("`{}` is not a message id.", raw.trim())))
}

async fn require_giveaway(
    state: &BotState,
    guild_id: i64,
    invocation: &Invocation<'_>,
) -> Result<giveaway_model::Model, BotError> {
    let message_id = parse_message_id(&invocation.args.require_string("message_id")?)?;
    giveaway::find_by_message(&state.db, guild_id, message_id)
        .await?
        .ok_or_else(|| BotError::NotFound("Giveaway".to_string()))
}

fn winners_text(winners: &[serenity::all::UserId]) -> String {
    if winners.is_empty() {
        "Nobody entered, so there are no winners.".to_string()
    } else {
        let mentions: Vec<String> = winners.iter().map(|id| format!("<@{}>", id)).collect();
        format!("Winners: {}", mentions.join(", "))
    }
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?.get() as i64;

    match invocation.info.name {
        "giveaway start" => {
            let duration = invocation.args.require_duration("duration")?;
            let winners = invocation.args.require_integer("winners")?;
            let prize = invocation.args.require_string("prize")?;
            if !(1..=MAX_WINNERS).contains(&winners) {
                return Err(BotError::bad_argument(format!(
                    "A giveaway needs between 1 and {} winners.",
                    MAX_WINNERS
                )));
            }
            if duration.as_secs() < MIN_LENGTH_SECS {
                return Err(BotError::bad_argument(format!(
                    "A giveaway must run for at least {} seconds.",
                    MIN_LENGTH_SECS
                )));
            }
            let ends_at = chrono::Duration::from_std(duration)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta))
                .ok_or_else(|| BotError::bad_argument("That duration is too long."))?;

            let new = NewGiveaway {
                guild_id,
                channel_id: invocation.channel_id,
                host_id: invocation.author.id,
                prize,
                winners: winners as i32,
                ends_at,
            };
            let row = giveaway::start(&state.db, &ctx.http, new).await?;
            Ok(Reply::text(format!(
                "Giveaway started! It ends <t:{}:R>. Message id: `{}`",
                row.ends_at.timestamp(),
                row.message_id
            )))
        }
        "giveaway end" => {
            let row = require_giveaway(state, guild_id, invocation).await?;
            if row.ended {
                return Err(BotError::refused("That giveaway has already ended."));
            }
            let winners = giveaway::resolve(&state.db, &ctx.http, row).await?;
            Ok(Reply::text(format!("Giveaway ended. {}", winners_text(&winners))))
        }
        "giveaway reroll" => {
            let row = require_giveaway(state, guild_id, invocation).await?;
            let winners = giveaway::reroll(&state.db, &ctx.http, row).await?;
            Ok(Reply::text(format!("Rerolled. {}", winners_text(&winners))))
        }
        "giveaway list" => {
            let running = giveaway::running(&state.db, guild_id).await?;
            if running.is_empty() {
                return Ok(Reply::text("There are no running giveaways."));
            }
            let lines: Vec<String> = running
                .iter()
                .map(|row| {
                    format!(
                        "**{}** in <#{}>, ends <t:{}:R> (`{}`)",
                        row.prize,
                        row.channel_id,
                        row.ends_at.timestamp(),
                        row.message_id
                    )
                })
                .collect();
            Ok(Reply::embed(invocation.embed().title("Giveaways").description(lines.join("\n"))))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_and_links_are_accepted() {
        assert_eq!(parse_message_id("1234").unwrap(), 1234);
        assert_eq!(
            parse_message_id("https://discord.com/channels/1/2/987654321").unwrap(),
            987654321
        );
        assert!(parse_message_id("0").is_err());
        assert!(parse_message_id("soon").is_err());
    }
}
