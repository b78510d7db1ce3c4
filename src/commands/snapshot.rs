use serenity::all::{Context, CreateMessage, Guild, GuildId, Permissions, UserId};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::snapshot::{self, Payload};
use crate::state::BotState;

const LIST_LIMIT: usize = 10;

const CREATE_PARAMS: &[Param] = &[Param::optional("name", ParamKind::String, "A name to remember it by").rest()];
const LOAD_PARAMS: &[Param] = &[Param::required("code", ParamKind::String, "The snapshot's code")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("snapshot create", "Save this server's roles and channels")
        .params(CREATE_PARAMS)
        .permissions(Permissions::ADMINISTRATOR),
    CommandInfo::new("snapshot load", "Replace this server's roles and channels with a snapshot")
        .params(LOAD_PARAMS)
        .permissions(Permissions::ADMINISTRATOR)
        .bot_permissions(Permissions::ADMINISTRATOR),
    CommandInfo::new("snapshot list", "List this server's snapshots").permissions(Permissions::ADMINISTRATOR),
];

fn cached_guild(ctx: &Context, guild_id: GuildId) -> Result<Guild, BotError> {
    ctx.cache
        .guild(guild_id)
        .map(|guild| (*guild).clone())
        .ok_or_else(|| BotError::NotFound("Server".to_string()))
}

async fn direct_message(ctx: &Context, user_id: UserId, content: String) {
    if let Err(err) = user_id.direct_message(ctx, CreateMessage::new().content(content)).await {
        tracing::warn!(%user_id, "could not send snapshot notice: {}", err);
    }
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let author_id = invocation.author.id;

    match invocation.info.name {
        "snapshot create" => {
            let guild = cached_guild(ctx, guild_id)?;
            let name = invocation.args.string("name").unwrap_or_else(|| guild.name.clone());
            let payload = Payload::capture(&guild);
            let row = snapshot::save(&state.db, guild_id.get() as i64, &name, author_id.get() as i64, &payload).await?;
            Ok(Reply::text(format!(
                "Saved **{}** ({} roles, {} channels). Code: `{}`",
                row.name,
                payload.roles.len(),
                payload.channels.len(),
                row.code
            )))
        }
        "snapshot load" => {
            let code = invocation.args.require_string("code")?;
            let row = snapshot::find(&state.db, &code)
                .await?
                .ok_or_else(|| BotError::NotFound("Snapshot".to_string()))?;
            let payload = snapshot::payload_of(&row)?;
            let guild = cached_guild(ctx, guild_id)?;

            let safety = snapshot::save(
                &state.db,
                guild_id.get() as i64,
                &format!("Before loading {}", row.code),
                author_id.get() as i64,
                &Payload::capture(&guild),
            )
            .await?;
            if guild.owner_id != author_id {
                direct_message(
                    ctx,
                    guild.owner_id,
                    format!(
                        "<@{}> is loading a snapshot in **{}**. If this was not intended, restore the previous layout with code `{}`.",
                        author_id, guild.name, safety.code
                    ),
                )
                .await;
            }
            tracing::info!(%guild_id, code = %row.code, "loading snapshot");

            let report = snapshot::restore(&ctx.http, &guild, &payload).await;
            let summary = format!(
                "Loaded snapshot `{}` in **{}**: {} roles and {} channels created, {} failures. The previous layout was saved as `{}`.",
                row.code, guild.name, report.roles, report.channels, report.failures, safety.code
            );
            // the invoking channel is usually gone by now
            direct_message(ctx, author_id, summary.clone()).await;
            Ok(Reply::text(summary))
        }
        "snapshot list" => {
            let rows = snapshot::for_guild(&state.db, guild_id.get() as i64).await?;
            if rows.is_empty() {
                return Ok(Reply::text("This server has no snapshots."));
            }
            let lines: Vec<String> = rows
                .iter()
                .take(LIST_LIMIT)
                .map(|row| format!("**{}** <t:{}:d> by <@{}>\n`{}`", row.name, row.date.timestamp(), row.author_id, row.code))
                .collect();
            Ok(Reply::embed(invocation.embed().title("Snapshots").description(lines.join("\n"))))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}
