use serenity::all::Context;

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::beta;
use crate::error::BotError;
use crate::state::BotState;

const GUILD_PARAMS: &[Param] = &[Param::required("guild_id", ParamKind::String, "ID of the server")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("beta add", "Admit a server to the closed beta")
        .params(GUILD_PARAMS)
        .anywhere()
        .developer_only(),
    CommandInfo::new("beta remove", "Remove a server from the closed beta")
        .params(GUILD_PARAMS)
        .anywhere()
        .developer_only(),
];

fn parse_guild_id(raw: &str) -> Result<i64, BotError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0 && *id <= i64::MAX as u64)
        .map(|id| id as i64)
        .ok_or_else(|| BotError::bad_argument(format!("`{}` is not a server id.", raw.trim())))
}

pub async fn run(_ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = parse_guild_id(&invocation.args.require_string("guild_id")?)?;

    match invocation.info.name {
        "beta add" => {
            if beta::allow(&state.db, guild_id, invocation.author.id.get() as i64).await? {
                Ok(Reply::text(format!("`{}` is now in the closed beta.", guild_id)))
            } else {
                Err(BotError::refused("That server is already in the closed beta."))
            }
        }
        "beta remove" => {
            if beta::revoke(&state.db, guild_id).await? {
                Ok(Reply::text(format!("`{}` was removed from the closed beta.", guild_id)))
            } else {
                Err(BotError::NotFound("Closed beta entry".to_string()))
            }
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_ids_must_be_snowflakes() {
        assert_eq!(parse_guild_id(" 81384788765712384 ").unwrap(), 81384788765712384);
        assert!(parse_guild_id("0").is_err());
        assert!(parse_guild_id("rust").is_err());
    }
}
