use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::duration::format_duration;

/// Everything a command, listener or background task can fail with.
///
/// The first group of variants is meant for the invoking user and is rendered
/// verbatim. The wrapped library errors are internal: the user only gets a
/// report id and the details go to the log.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("This command can only be used in servers.")]
    GuildOnly,
    #[error("Only the bot developers can use this command.")]
    NotDeveloper,
    #[error("You are missing the following permissions: {}", .0.join(", "))]
    MissingPermissions(Vec<String>),
    #[error("I am missing the following permissions: {}", .0.join(", "))]
    BotMissingPermissions(Vec<String>),
    #[error("This command is on cooldown. Try again in {}.", format_duration(.0.as_secs().max(1)))]
    OnCooldown(Duration),
    #[error("Missing required argument `{0}`.")]
    MissingArgument(String),
    #[error("Invalid argument: {0}")]
    BadArgument(String),
    #[error("{0} not found.")]
    NotFound(String),
    #[error("{0}")]
    Refused(String),
    #[error("I don't have permission to do that.")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("discord error: {0}")]
    Discord(serenity::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database pool error: {0}")]
    Pool(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        if http_status(&err) == Some(403) {
            BotError::Forbidden
        } else {
            BotError::Discord(err)
        }
    }
}

impl BotError {
    pub fn refused(message: impl Into<String>) -> Self {
        BotError::Refused(message.into())
    }

    pub fn bad_argument(message: impl Into<String>) -> Self {
        BotError::BadArgument(message.into())
    }

    /// Internal errors are reported to the developers instead of being shown.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            BotError::Database(_)
                | BotError::Discord(_)
                | BotError::Json(_)
                | BotError::Config(_)
                | BotError::Pool(_)
                | BotError::Migrate(_)
        )
    }

    /// The text sent back to whoever triggered the failure.
    pub fn user_message(&self, report_id: u64) -> String {
        if self.is_internal() {
            format!(
                "An error has occurred and has been reported to the developers. Report ID: `{}`",
                report_id
            )
        } else {
            self.to_string()
        }
    }
}

/// HTTP status of a failed REST call, if the error came from one.
pub fn http_status(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(response)) => {
            Some(response.status_code.as_u16())
        }
        _ => None,
    }
}

/// Swallows a 404 from Discord, e.g. unbanning someone who is not banned.
pub fn ignore_not_found(result: Result<(), serenity::Error>) -> Result<(), BotError> {
    match result {
        Err(err) if http_status(&err) == Some(404) => Ok(()),
        other => other.map_err(BotError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_shown_verbatim() {
        let err = BotError::MissingPermissions(vec!["Ban Members".into(), "Kick Members".into()]);
        assert!(!err.is_internal());
        assert_eq!(
            err.user_message(1),
            "You are missing the following permissions: Ban Members, Kick Members"
        );
    }

    #[test]
    fn internal_errors_only_show_the_report_id() {
        let err = BotError::Database(DbErr::Custom("connection reset".into()));
        assert!(err.is_internal());
        let message = err.user_message(42);
        assert!(message.contains("`42`"));
        assert!(!message.contains("connection reset"));
    }

    #[test]
    fn cooldown_renders_remaining_time() {
        let err = BotError::OnCooldown(Duration::from_secs(3_661));
        assert_eq!(err.to_string(), "This command is on cooldown. Try again in 1h 1m 1s.");
    }
}
