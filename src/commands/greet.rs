use serenity::all::{Context, Permissions};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::greet::{self, Greeting, Placeholders};
use crate::state::BotState;

const SET_PARAMS: &[Param] = &[
    Param::required("channel", ParamKind::Channel, "Where to post the message"),
    Param::required(
        "message",
        ParamKind::String,
        "Supports {user}, {user.name}, {guild} and {count}",
    )
    .rest(),
];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("welcome set", "Greet new members in a channel")
        .params(SET_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("welcome off", "Stop greeting new members").permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("goodbye set", "Say goodbye to members who leave")
        .params(SET_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("goodbye off", "Stop saying goodbye").permissions(Permissions::MANAGE_GUILD),
];

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let (root, action) = invocation.info.name.split_once(' ').unwrap_or((invocation.info.name, ""));
    let kind = if root == "welcome" { Greeting::Welcome } else { Greeting::Goodbye };

    match action {
        "set" => {
            let channel_id = invocation.args.require_channel("channel")?;
            let message = invocation.args.require_string("message")?;
            greet::set(&state.db, kind, guild_id.get() as i64, channel_id.get() as i64, &message).await?;

            let (guild_name, member_count) = ctx
                .cache
                .guild(guild_id)
                .map(|guild| (guild.name.clone(), guild.member_count))
                .unwrap_or_default();
            let preview = greet::render(
                &message,
                &Placeholders {
                    user_id: invocation.author.id.get(),
                    user_name: &invocation.author.name,
                    guild_name: &guild_name,
                    member_count,
                },
            );
            Ok(Reply::text(format!(
                "The {} message will be posted in <#{}>. Preview:\n{}",
                kind.label(),
                channel_id,
                preview
            )))
        }
        "off" => {
            if greet::clear(&state.db, kind, guild_id.get() as i64).await? {
                Ok(Reply::text(format!("The {} message is off.", kind.label())))
            } else {
                Err(BotError::refused(format!("No {} message was set.", kind.label())))
            }
        }
        _ => Err(BotError::NotFound(format!("Command `{}`", invocation.info.name))),
    }
}
