mod afk;
mod audit;
mod beta;
mod cases;
mod commands;
mod config;
mod cooldown;
mod duration;
mod economy;
mod error;
mod events;
mod giveaway;
mod global_ban;
mod greet;
mod model;
mod shop;
mod snapshot;
mod state;
mod tasks;

use std::sync::Arc;

use sea_orm::{DatabaseConnection, SqlxPostgresConnector};
use serenity::all::{
    ApplicationId, ChannelId, Command, Context, EventHandler, GatewayIntents, Guild, GuildId, Interaction, Member, Message,
    MessageId, MessageUpdateEvent, Ready, User,
};
use serenity::async_trait;
use serenity::cache::Settings as CacheSettings;
use serenity::Client;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crate::error::BotError;
use crate::state::BotState;

/// Messages kept per channel so deletions and edits can be logged with their content.
const CACHED_MESSAGES: usize = 200;

struct LuminEventHandler {
    state: Arc<BotState>,
}

fn log_failure(event: &str, result: Result<(), BotError>) {
    if let Err(err) = result {
        tracing::error!(event, "listener failed: {}", err);
    }
}

#[async_trait]
impl EventHandler for LuminEventHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("Connected to discord as {} in {} guilds", ready.user.tag(), ready.guilds.len());
        if !self.state.claim_task_start() {
            return;
        }

        match Command::set_global_commands(&ctx.http, commands::application_commands()).await {
            Ok(registered) => tracing::info!(count = registered.len(), "registered application commands"),
            Err(err) => tracing::error!("failed to register application commands: {}", err),
        }
        tasks::spawn_all(&ctx, &self.state);
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        log_failure("guild_create", events::on_guild_create(&ctx, &self.state, &guild).await);
    }

    async fn message(&self, ctx: Context, new_message: Message) {
        log_failure("message", events::on_message(&ctx, &self.state, &new_message).await);
    }

    async fn message_update(
        &self,
        ctx: Context,
        old_if_available: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        // only cached messages carry enough to describe the edit
        if let Some(new) = new {
            events::on_message_edit(&ctx, &self.state, old_if_available.as_ref(), &new).await;
        }
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        if let Some(guild_id) = guild_id {
            events::on_message_delete(&ctx, &self.state, guild_id, channel_id, deleted_message_id).await;
        }
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        log_failure("member_join", events::on_member_join(&ctx, &self.state, &new_member).await);
    }

    async fn guild_member_removal(&self, ctx: Context, guild_id: GuildId, user: User, _member: Option<Member>) {
        log_failure("member_leave", events::on_member_leave(&ctx, &self.state, guild_id, &user).await);
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        events::on_ban(&ctx, &self.state, guild_id, &banned_user, true).await;
    }

    async fn guild_ban_removal(&self, ctx: Context, guild_id: GuildId, unbanned_user: User) {
        events::on_ban(&ctx, &self.state, guild_id, &unbanned_user, false).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match &interaction {
            Interaction::Command(command) => commands::handle_interaction(&ctx, &self.state, command).await,
            other => tracing::debug!(kind = ?other.kind(), "ignoring interaction"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BotError> {
    let config = match config::load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pool = PgPoolOptions::new()
        .max_connections(32)
        .connect(&config.database_url())
        .await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!(host = %config.db_host, database = %config.db_name, "database ready");

    let db: DatabaseConnection = SqlxPostgresConnector::from_sqlx_postgres_pool(pool);

    let mut cache_settings = CacheSettings::default();
    cache_settings.max_messages = CACHED_MESSAGES;

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS | GatewayIntents::MESSAGE_CONTENT;
    let token = config.token.clone();
    let application_id = config.application_id;
    let state = Arc::new(BotState::new(db, config));

    let mut builder = Client::builder(&token, intents)
        .event_handler(LuminEventHandler { state })
        .cache_settings(cache_settings);
    if let Some(application_id) = application_id {
        builder = builder.application_id(ApplicationId::new(application_id));
    }
    let mut client = builder.await?;

    if let Err(err) = client.start_autosharded().await {
        tracing::error!("Discord client stopped: {:?}", err);
        return Err(err.into());
    }
    Ok(())
}
