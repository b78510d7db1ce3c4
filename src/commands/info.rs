use serenity::all::{Context, CreateEmbedFooter, Timestamp};

use super::{all, CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::error::BotError;
use crate::model::message_count;
use crate::state::BotState;

const SHOWN_ROLES: usize = 15;

const USER_PARAMS: &[Param] = &[Param::optional("user", ParamKind::User, "Who to look up (defaults to you)")];
const ROLE_PARAMS: &[Param] = &[Param::required("role", ParamKind::Role, "The role")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("info user", "Information about a member").params(USER_PARAMS),
    CommandInfo::new("info server", "Information about this server"),
    CommandInfo::new("info role", "Information about a role").params(ROLE_PARAMS),
    CommandInfo::new("info bot", "Information about the bot").anywhere(),
];

fn relative(timestamp: Timestamp) -> String {
    format!("<t:{}:R>", timestamp.unix_timestamp())
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    match invocation.info.name {
        "info user" => user_info(ctx, state, invocation).await,
        "info server" => server_info(ctx, invocation),
        "info role" => role_info(ctx, invocation),
        "info bot" => Ok(bot_info(ctx, invocation)),
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

async fn user_info(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let user_id = invocation.args.user("user").unwrap_or(invocation.author.id);
    let member = guild_id.member(ctx, user_id).await.ok();
    let user = match &member {
        Some(member) => member.user.clone(),
        None => ctx.http.get_user(user_id).await?,
    };
    let messages = message_count::get(&state.db, guild_id.get() as i64, user_id.get() as i64).await?;

    let mut embed = invocation
        .embed()
        .title(user.tag())
        .thumbnail(user.face())
        .field("ID", user.id.to_string(), true)
        .field("Account created", relative(user.id.created_at()), true)
        .field("Messages", messages.to_string(), true);
    if user.bot {
        embed = embed.field("Bot", "Yes", true);
    }
    match member {
        Some(member) => {
            if let Some(joined) = member.joined_at {
                embed = embed.field("Joined", relative(joined), true);
            }
            if let Some(nick) = &member.nick {
                embed = embed.field("Nickname", nick.clone(), true);
            }
            let roles: Vec<String> = member
                .roles
                .iter()
                .take(SHOWN_ROLES)
                .map(|role| format!("<@&{}>", role))
                .collect();
            let roles = if roles.is_empty() { "None".to_string() } else { roles.join(" ") };
            embed = embed.field(format!("Roles ({})", member.roles.len()), roles, false);
        }
        None => embed = embed.footer(CreateEmbedFooter::new("Not a member of this server")),
    }
    Ok(Reply::embed(embed))
}

fn server_info(ctx: &Context, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let guild = ctx
        .cache
        .guild(guild_id)
        .map(|guild| {
            (
                guild.name.clone(),
                guild.owner_id,
                guild.member_count,
                guild.channels.len(),
                guild.roles.len(),
                guild.icon_url(),
            )
        })
        .ok_or_else(|| BotError::NotFound("Server".to_string()))?;
    let (name, owner_id, member_count, channels, roles, icon) = guild;

    let mut embed = invocation
        .embed()
        .title(name)
        .field("ID", guild_id.to_string(), true)
        .field("Owner", format!("<@{}>", owner_id), true)
        .field("Created", relative(guild_id.created_at()), true)
        .field("Members", member_count.to_string(), true)
        .field("Channels", channels.to_string(), true)
        .field("Roles", roles.to_string(), true);
    if let Some(icon) = icon {
        embed = embed.thumbnail(icon);
    }
    Ok(Reply::embed(embed))
}

fn role_info(ctx: &Context, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?;
    let role_id = invocation.args.require_role("role")?;
    let (role, holders) = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| {
            let role = guild.roles.get(&role_id)?.clone();
            let holders = guild.members.values().filter(|member| member.roles.contains(&role_id)).count();
            Some((role, holders))
        })
        .ok_or_else(|| BotError::NotFound("Role".to_string()))?;

    let yes_no = |value: bool| if value { "Yes" } else { "No" };
    let embed = invocation
        .embed()
        .title(role.name.clone())
        .colour(role.colour)
        .field("ID", role.id.to_string(), true)
        .field("Colour", format!("#{:06X}", role.colour.0), true)
        .field("Position", role.position.to_string(), true)
        .field("Members", holders.to_string(), true)
        .field("Mentionable", yes_no(role.mentionable), true)
        .field("Hoisted", yes_no(role.hoist), true)
        .field("Managed", yes_no(role.managed), true)
        .field("Created", relative(role.id.created_at()), true);
    Ok(Reply::embed(embed))
}

fn bot_info(ctx: &Context, invocation: &Invocation<'_>) -> Reply {
    let (name, face) = {
        let me = ctx.cache.current_user();
        (me.name.clone(), me.face())
    };
    let embed = invocation
        .embed()
        .title(name)
        .thumbnail(face)
        .field("Servers", ctx.cache.guild_count().to_string(), true)
        .field("Commands", all().count().to_string(), true)
        .field("Version", env!("CARGO_PKG_VERSION"), true);
    Reply::embed(embed)
}
