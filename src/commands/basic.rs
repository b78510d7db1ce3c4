use std::time::Instant;

use serenity::all::{Command, Context, CreateEmbedFooter};

use super::{application_commands, CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::state::BotState;

const SYNC_PARAMS: &[Param] = &[Param::optional("scope", ParamKind::String, "Register globally or only in this server")
    .choices(&["global", "guild"])];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("ping", "Check the bot's response times").anywhere(),
    CommandInfo::new("sync", "Register the slash commands with Discord")
        .params(SYNC_PARAMS)
        .anywhere()
        .developer_only(),
];

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    match invocation.info.name {
        "ping" => ping(ctx, state, invocation).await,
        "sync" => sync(ctx, invocation).await,
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

async fn ping(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let started = Instant::now();
    ctx.http.get_current_user().await?;
    let rest = started.elapsed();

    let started = Instant::now();
    state.db.ping().await?;
    let database = started.elapsed();

    let embed = invocation
        .embed()
        .title("Pong!")
        .field("REST", format!("{} ms", rest.as_millis()), true)
        .field("Database", format!("{} ms", database.as_millis()), true)
        .footer(CreateEmbedFooter::new(format!("Shard {}", ctx.shard_id.0)));
    Ok(Reply::embed(embed))
}

async fn sync(ctx: &Context, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let commands = application_commands();
    match invocation.args.string("scope").as_deref() {
        Some("guild") => {
            let guild_id = invocation.require_guild()?;
            let registered = guild_id.set_commands(&ctx.http, commands).await?;
            tracing::info!(%guild_id, count = registered.len(), "registered guild commands");
            Ok(Reply::text(format!("Registered {} commands in this server.", registered.len())))
        }
        _ => {
            let registered = Command::set_global_commands(&ctx.http, commands).await?;
            tracing::info!(count = registered.len(), "registered global commands");
            Ok(Reply::text(format!(
                "Registered {} global commands. Discord may take a moment to show them.",
                registered.len()
            )))
        }
    }
}
