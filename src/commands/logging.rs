use sea_orm::ActiveModelTrait;
use sea_orm::ActiveValue::Set;
use serenity::all::{ChannelId, Context, CreateWebhook, Http, Permissions};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::audit::{self, WEBHOOK_NAME};
use crate::error::BotError;
use crate::model::guild;
use crate::state::BotState;

const MODULE_CHOICES: &[&str] = &[
    "message_delete",
    "message_edit",
    "member_join",
    "member_leave",
    "member_ban",
    "member_unban",
    "all",
];

const ON_PARAMS: &[Param] = &[Param::required("channel", ParamKind::Channel, "Where to post the log")];
const MODULE_PARAMS: &[Param] =
    &[Param::required("module", ParamKind::String, "Which events to log").choices(MODULE_CHOICES)];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("log on", "Start logging server events to a channel")
        .params(ON_PARAMS)
        .permissions(Permissions::MANAGE_GUILD)
        .bot_permissions(Permissions::MANAGE_WEBHOOKS),
    CommandInfo::new("log off", "Stop logging server events").permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("log module add", "Log another kind of event")
        .params(MODULE_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
    CommandInfo::new("log module remove", "Stop logging a kind of event")
        .params(MODULE_PARAMS)
        .permissions(Permissions::MANAGE_GUILD),
];

/// The channel's log webhook, created on first use.
async fn webhook_url(http: &Http, channel_id: ChannelId) -> Result<String, BotError> {
    let existing = channel_id
        .webhooks(http)
        .await?
        .into_iter()
        .find(|webhook| webhook.name.as_deref() == Some(WEBHOOK_NAME) && webhook.token.is_some());
    let webhook = match existing {
        Some(webhook) => webhook,
        None => channel_id.create_webhook(http, CreateWebhook::new(WEBHOOK_NAME)).await?,
    };
    Ok(webhook.url()?)
}

fn module_list(modules: &[String]) -> String {
    if modules.is_empty() {
        "none".to_string()
    } else {
        modules.iter().map(|name| format!("`{}`", name)).collect::<Vec<_>>().join(", ")
    }
}

async fn remember_channel(state: &BotState, guild_id: i64, channel: Option<i64>) -> Result<(), BotError> {
    let mut row: guild::ActiveModel = guild::ensure(&state.db, guild_id).await?.into();
    row.log_channel = Set(channel);
    row.update(&state.db).await?;
    Ok(())
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?.get() as i64;

    match invocation.info.name {
        "log on" => {
            let channel_id = invocation.args.require_channel("channel")?;
            let url = webhook_url(&ctx.http, channel_id).await?;
            let config = audit::enable(&state.db, guild_id, url, channel_id.get() as i64).await?;
            remember_channel(state, guild_id, Some(channel_id.get() as i64)).await?;
            Ok(Reply::text(format!(
                "Logging to <#{}>. Modules: {}",
                channel_id,
                module_list(&config.modules.0)
            )))
        }
        "log off" => {
            if !audit::disable(&state.db, guild_id).await? {
                return Err(BotError::refused("Logging is not set up in this server."));
            }
            remember_channel(state, guild_id, None).await?;
            Ok(Reply::text("Logging is off."))
        }
        "log module add" => {
            let modules = audit::add_module(&state.db, guild_id, &invocation.args.require_string("module")?).await?;
            Ok(Reply::text(format!("Now logging: {}", module_list(&modules))))
        }
        "log module remove" => {
            let modules = audit::remove_module(&state.db, guild_id, &invocation.args.require_string("module")?).await?;
            Ok(Reply::text(format!("Now logging: {}", module_list(&modules))))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogModule;

    #[test]
    fn choices_cover_every_module() {
        for module in LogModule::ALL {
            assert!(MODULE_CHOICES.contains(&module.name()), "{}", module.name());
        }
        assert_eq!(MODULE_CHOICES.len(), LogModule::ALL.len() + 1);
    }
}
