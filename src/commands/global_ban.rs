use serenity::all::{Context, Permissions};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::global_ban;
use crate::state::BotState;

const ADD_PARAMS: &[Param] = &[
    Param::required("user", ParamKind::User, "User to ban everywhere"),
    Param::optional("reason", ParamKind::String, "Why").rest(),
];
const USER_PARAMS: &[Param] = &[Param::required("user", ParamKind::User, "The user")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("globalban add", "Add a user to the global ban list")
        .params(ADD_PARAMS)
        .anywhere()
        .developer_only(),
    CommandInfo::new("globalban remove", "Remove a user from the global ban list")
        .params(USER_PARAMS)
        .anywhere()
        .developer_only(),
    CommandInfo::new("globalban exempt", "Let a globally banned user into this server")
        .params(USER_PARAMS)
        .permissions(Permissions::BAN_MEMBERS),
    CommandInfo::new("globalban unexempt", "Enforce the global ban for a user again")
        .params(USER_PARAMS)
        .permissions(Permissions::BAN_MEMBERS),
];

pub async fn run(_ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let user = invocation.args.require_user("user")?;
    let user_id = user.get() as i64;
    let author_id = invocation.author.id.get() as i64;

    match invocation.info.name {
        "globalban add" => {
            let reason = invocation.args.string("reason");
            if global_ban::add(&state.db, user_id, reason, author_id).await? {
                tracing::info!(%user, moderator = author_id, "added global ban");
                Ok(Reply::text(format!("<@{}> is now globally banned.", user)))
            } else {
                Err(BotError::refused("That user is already globally banned."))
            }
        }
        "globalban remove" => {
            if global_ban::remove(&state.db, user_id).await? {
                Ok(Reply::text(format!("<@{}> is no longer globally banned.", user)))
            } else {
                Err(BotError::NotFound("Global ban".to_string()))
            }
        }
        "globalban exempt" => {
            let guild_id = invocation.require_guild()?.get() as i64;
            if global_ban::exempt(&state.db, guild_id, user_id, author_id).await? {
                Ok(Reply::text(format!("<@{}> is exempt from global bans here.", user)))
            } else {
                Err(BotError::refused("That user is already exempt."))
            }
        }
        "globalban unexempt" => {
            let guild_id = invocation.require_guild()?.get() as i64;
            if global_ban::unexempt(&state.db, guild_id, user_id).await? {
                Ok(Reply::text(format!("Global bans apply to <@{}> here again.", user)))
            } else {
                Err(BotError::refused("That user was not exempt."))
            }
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}
