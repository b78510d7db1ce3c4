//! Reactions to gateway events other than commands: AFK, message counting,
//! greetings, global bans, the closed beta and the audit log.

use serenity::all::{
    ChannelId, Context, CreateAllowedMentions, CreateEmbed, CreateMessage, Guild, GuildId, Member, Message, MessageId, User,
};

use crate::audit::{self, LogModule};
use crate::error::BotError;
use crate::greet::{self, Greeting, Placeholders};
use crate::model::{afk as afk_model, guild, message_count};
use crate::state::BotState;
use crate::{afk, beta, commands, global_ban};

pub async fn on_message(ctx: &Context, state: &BotState, message: &Message) -> Result<(), BotError> {
    if message.author.bot {
        return Ok(());
    }

    let settings = match message.guild_id {
        Some(guild_id) => Some(guild::ensure(&state.db, guild_id.get() as i64).await?),
        None => None,
    };
    let handled = commands::handle_message(ctx, state, message, settings).await;

    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };
    let (guild, user) = (guild_id.get() as i64, message.author.id.get() as i64);
    message_count::increment(&state.db, guild, user).await?;
    if handled {
        return Ok(());
    }

    if let Some(previous_nick) = afk::come_back(&state.db, guild, user).await? {
        afk::apply_nickname(&ctx.http, guild_id, message.author.id, previous_nick).await;
        message
            .reply(&ctx.http, "Welcome back! I removed your AFK status.")
            .await?;
        return Ok(());
    }

    if let [mentioned] = message.mentions.as_slice() {
        if let Some(away) = afk_model::find_away(&state.db, guild, mentioned.id.get() as i64).await? {
            let notice = format!("**{}** is AFK: {}", mentioned.name, away.message);
            message
                .channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new()
                        .content(notice)
                        .reference_message(message)
                        .allowed_mentions(CreateAllowedMentions::new()),
                )
                .await?;
        }
    }
    Ok(())
}

/// Creates the settings row for every guild, and leaves guilds outside the closed beta.
pub async fn on_guild_create(ctx: &Context, state: &BotState, guild: &Guild) -> Result<(), BotError> {
    let guild_id = guild.id.get() as i64;
    guild::ensure(&state.db, guild_id).await?;

    if state.config.closed_beta && !beta::is_allowed(&state.db, guild_id).await? {
        tracing::info!(guild = %guild.id, name = %guild.name, "leaving guild outside the closed beta");
        guild.id.leave(&ctx.http).await?;
    }
    Ok(())
}

async fn post_greeting(
    ctx: &Context,
    state: &BotState,
    kind: Greeting,
    guild_id: GuildId,
    user: &User,
) -> Result<(), BotError> {
    let Some(config) = greet::find(&state.db, kind, guild_id.get() as i64).await? else {
        return Ok(());
    };
    let (guild_name, member_count) = ctx
        .cache
        .guild(guild_id)
        .map(|guild| (guild.name.clone(), guild.member_count))
        .unwrap_or_default();
    let text = greet::render(
        &config.message,
        &Placeholders {
            user_id: user.id.get(),
            user_name: &user.name,
            guild_name: &guild_name,
            member_count,
        },
    );
    ChannelId::new(config.channel_id as u64)
        .send_message(&ctx.http, CreateMessage::new().content(text))
        .await?;
    Ok(())
}

pub async fn on_member_join(ctx: &Context, state: &BotState, member: &Member) -> Result<(), BotError> {
    if global_ban::enforce(&state.db, &ctx.http, member.guild_id, member.user.id).await? {
        return Ok(());
    }
    post_greeting(ctx, state, Greeting::Welcome, member.guild_id, &member.user).await?;
    log(ctx, state, member.guild_id, LogModule::MemberJoin, audit::member_joined(&member.user)).await;
    Ok(())
}

pub async fn on_member_leave(ctx: &Context, state: &BotState, guild_id: GuildId, user: &User) -> Result<(), BotError> {
    post_greeting(ctx, state, Greeting::Goodbye, guild_id, user).await?;
    log(ctx, state, guild_id, LogModule::MemberLeave, audit::member_left(user)).await;
    Ok(())
}

pub async fn on_message_delete(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    channel_id: ChannelId,
    message_id: MessageId,
) {
    let cached = ctx.cache.message(channel_id, message_id).map(|message| (*message).clone());
    if cached.as_ref().is_some_and(|message| message.author.bot) {
        return;
    }
    log(ctx, state, guild_id, LogModule::MessageDelete, audit::message_deleted(channel_id, cached.as_ref())).await;
}

pub async fn on_message_edit(ctx: &Context, state: &BotState, before: Option<&Message>, after: &Message) {
    let Some(guild_id) = after.guild_id else {
        return;
    };
    if after.author.bot {
        return;
    }
    let before = before.map(|message| message.content.as_str());
    // embed unfurls also arrive as edits
    if before == Some(after.content.as_str()) {
        return;
    }
    log(ctx, state, guild_id, LogModule::MessageEdit, audit::message_edited(before, after)).await;
}

pub async fn on_ban(ctx: &Context, state: &BotState, guild_id: GuildId, user: &User, banned: bool) {
    let (module, embed) = if banned {
        (LogModule::MemberBan, audit::member_banned(user))
    } else {
        (LogModule::MemberUnban, audit::member_unbanned(user))
    };
    log(ctx, state, guild_id, module, embed).await;
}

async fn log(ctx: &Context, state: &BotState, guild_id: GuildId, module: LogModule, embed: CreateEmbed) {
    if let Err(err) = audit::send(&state.db, &ctx.http, guild_id, module, embed).await {
        tracing::warn!(%guild_id, module = module.name(), "failed to write log entry: {}", err);
    }
}
