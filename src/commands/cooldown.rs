use serenity::all::{Context, Permissions};

use super::{find, CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::cooldown::{self, from_deciseconds};
use crate::duration::format_duration;
use crate::error::BotError;
use crate::state::BotState;

const SET_PARAMS: &[Param] = &[
    Param::required("command", ParamKind::String, "Command name; quote names with spaces"),
    Param::required("duration", ParamKind::Duration, "Time between uses per member, e.g. 30s"),
];
const RESET_PARAMS: &[Param] = &[Param::required("command", ParamKind::String, "Command name").rest()];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("cooldown set", "Override a command's cooldown in this server")
        .params(SET_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("cooldown reset", "Go back to a command's default cooldown")
        .params(RESET_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("cooldown list", "Show this server's cooldown overrides").permissions(Permissions::MANAGE_GUILD),
];

fn require_command(invocation: &Invocation<'_>) -> Result<&'static CommandInfo, BotError> {
    let name = invocation.args.require_string("command")?;
    find(&name).ok_or_else(|| BotError::NotFound(format!("Command `{}`", name.trim())))
}

fn describe(duration: std::time::Duration) -> String {
    if duration.as_millis() < 1000 {
        "none".to_string()
    } else {
        format_duration(duration.as_secs())
    }
}

pub async fn run(_ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?.get();

    match invocation.info.name {
        "cooldown set" => {
            let command = require_command(invocation)?;
            let duration = invocation.args.require_duration("duration")?;
            cooldown::set_override(&state.db, guild_id as i64, command.name, duration).await?;
            state.cooldowns.reset(guild_id, command.name);
            Ok(Reply::text(format!(
                "`{}` now has a cooldown of {} in this server.",
                command.name,
                describe(duration)
            )))
        }
        "cooldown reset" => {
            let command = require_command(invocation)?;
            let cleared = cooldown::clear_override(&state.db, guild_id as i64, command.name).await?;
            state.cooldowns.reset(guild_id, command.name);
            let default = describe(command.cooldown.unwrap_or_default());
            if cleared {
                Ok(Reply::text(format!("`{}` is back to its default cooldown ({}).", command.name, default)))
            } else {
                Ok(Reply::text(format!(
                    "Cleared running cooldowns for `{}`. Its cooldown is the default ({}).",
                    command.name, default
                )))
            }
        }
        "cooldown list" => {
            let rows = cooldown::overrides(&state.db, guild_id as i64).await?;
            if rows.is_empty() {
                return Ok(Reply::text("Every command uses its default cooldown."));
            }
            let lines: Vec<String> = rows
                .iter()
                .map(|row| format!("`{}`: {}", row.command, describe(from_deciseconds(row.cooldown))))
                .collect();
            Ok(Reply::embed(invocation.embed().title("Cooldowns").description(lines.join("\n"))))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}
