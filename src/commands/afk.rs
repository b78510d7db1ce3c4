use serenity::all::Context;

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::afk::{self, Toggle, DEFAULT_REASON};
use crate::error::BotError;
use crate::state::BotState;

const AFK_PARAMS: &[Param] = &[Param::optional("reason", ParamKind::String, "Shown to anyone who mentions you").rest()];

pub static COMMANDS: &[CommandInfo] = &[CommandInfo::new("afk", "Toggle your AFK status").params(AFK_PARAMS)];

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let reason = invocation
        .args
        .string("reason")
        .unwrap_or_else(|| DEFAULT_REASON.to_string());
    if afk::contains_invite(&reason) {
        return Err(BotError::refused("AFK reasons cannot contain invite links."));
    }

    let member = invocation.author_member(ctx).await?;
    let toggle = afk::toggle(
        &state.db,
        guild_id.get() as i64,
        member.user.id.get() as i64,
        &reason,
        member.nick.as_deref(),
        member.display_name(),
    )
    .await?;

    match toggle {
        Toggle::Away { nickname } => {
            afk::apply_nickname(&ctx.http, guild_id, member.user.id, Some(nickname)).await;
            Ok(Reply::text(format!("You are now AFK: {}", reason)))
        }
        Toggle::Back { previous_nick } => {
            afk::apply_nickname(&ctx.http, guild_id, member.user.id, previous_nick).await;
            Ok(Reply::text("Welcome back! I removed your AFK status."))
        }
    }
}
