//! Loops spawned once the gateway is ready.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use serenity::all::{ActivityData, Context};

use crate::commands::{self, CommandInfo};
use crate::state::BotState;
use crate::{cases, giveaway};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

pub fn spawn_all(ctx: &Context, state: &Arc<BotState>) {
    tokio::spawn(case_expiry(ctx.clone(), Arc::clone(state)));
    tokio::spawn(giveaway_deadlines(ctx.clone(), Arc::clone(state)));
    tokio::spawn(status_rotation(ctx.clone()));
}

/// Reverses temporary mutes and bans once they run out.
async fn case_expiry(ctx: Context, state: Arc<BotState>) {
    let mut interval_timer = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval_timer.tick().await;

        match cases::expire_due(&state.db, ctx.http.as_ref(), Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => tracing::info!(expired, "expired moderation cases"),
            Err(err) => tracing::error!("case expiry sweep failed: {}", err),
        }
    }
}

async fn giveaway_deadlines(ctx: Context, state: Arc<BotState>) {
    let mut interval_timer = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval_timer.tick().await;

        match giveaway::resolve_due(&state.db, &ctx.http, Utc::now()).await {
            Ok(0) => {}
            Ok(ended) => tracing::info!(ended, "ended giveaways"),
            Err(err) => tracing::error!("giveaway sweep failed: {}", err),
        }
    }
}

/// "N servers | /command", advertising a random top-level slash command.
fn status_text(guild_count: usize, command: &CommandInfo) -> String {
    let root = command.name.split(' ').next().unwrap_or(command.name);
    let noun = if guild_count == 1 { "server" } else { "servers" };
    format!("{} {} | /{}", guild_count, noun, root)
}

async fn status_rotation(ctx: Context) {
    let commands: Vec<&'static CommandInfo> = commands::all().filter(|info| !info.developer_only).collect();
    let mut interval_timer = tokio::time::interval(STATUS_INTERVAL);
    loop {
        interval_timer.tick().await;

        let Some(command) = commands.choose(&mut rand::thread_rng()).copied() else {
            return;
        };
        let text = status_text(ctx.cache.guild_count(), command);
        ctx.set_activity(Some(ActivityData::custom(text)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_the_command_root() {
        let balance = commands::find("balance").unwrap();
        assert_eq!(status_text(12, balance), "12 servers | /balance");

        let case_info = commands::find("case info").unwrap();
        assert_eq!(status_text(1, case_info), "1 server | /case");
    }
}
