use std::sync::atomic::{AtomicBool, Ordering};

use sea_orm::DatabaseConnection;

use crate::config::Config;
use crate::cooldown::CooldownTracker;

/// Shared by the event handler, every command and the background tasks.
pub struct BotState {
    pub db: DatabaseConnection,
    pub config: Config,
    pub cooldowns: CooldownTracker,
    tasks_started: AtomicBool,
}

impl BotState {
    pub fn new(db: DatabaseConnection, config: Config) -> Self {
        BotState {
            db,
            config,
            cooldowns: CooldownTracker::new(),
            tasks_started: AtomicBool::new(false),
        }
    }

    /// True exactly once, for the first `ready` event. Reconnects fire `ready` again.
    pub fn claim_task_start(&self) -> bool {
        !self.tasks_started.swap(true, Ordering::SeqCst)
    }
}
