//! Moderation case lifecycle: opening a case applies the action, expiring or
//! deleting an active case reverses it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, ModelTrait};
use serenity::all::{ChannelId, CreateMessage, EditMember, GuildId, Http, UserId};
use serenity::async_trait;

use crate::duration::format_duration;
use crate::error::{ignore_not_found, BotError};
use crate::model::case::{self, CaseKind};
use crate::model::is_unique_violation;

/// Discord caps timeouts at 28 days.
pub const MAX_MUTE: Duration = Duration::from_secs(28 * 24 * 60 * 60);

const MAX_AUDIT_REASON: usize = 512;

/// The Discord side of a case. Implemented by `Http`; tests substitute a recorder.
#[async_trait]
pub trait CaseActions: Send + Sync {
    async fn notify(&self, user_id: UserId, text: &str) -> serenity::Result<()>;
    async fn timeout(&self, guild_id: GuildId, user_id: UserId, until: DateTime<Utc>) -> serenity::Result<()>;
    async fn clear_timeout(&self, guild_id: GuildId, user_id: UserId) -> serenity::Result<()>;
    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: Option<&str>) -> serenity::Result<()>;
    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: Option<&str>) -> serenity::Result<()>;
    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> serenity::Result<()>;
}

fn audit_reason(reason: &str) -> String {
    reason.chars().take(MAX_AUDIT_REASON).collect()
}

#[async_trait]
impl CaseActions for Http {
    async fn notify(&self, user_id: UserId, text: &str) -> serenity::Result<()> {
        let channel: ChannelId = user_id.create_dm_channel(self).await?.id;
        channel.send_message(self, CreateMessage::new().content(text)).await?;
        Ok(())
    }

    async fn timeout(&self, guild_id: GuildId, user_id: UserId, until: DateTime<Utc>) -> serenity::Result<()> {
        guild_id
            .edit_member(self, user_id, EditMember::new().disable_communication_until(until.to_rfc3339()))
            .await?;
        Ok(())
    }

    async fn clear_timeout(&self, guild_id: GuildId, user_id: UserId) -> serenity::Result<()> {
        guild_id
            .edit_member(self, user_id, EditMember::new().enable_communication())
            .await?;
        Ok(())
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: Option<&str>) -> serenity::Result<()> {
        match reason {
            Some(reason) => guild_id.kick_with_reason(self, user_id, &audit_reason(reason)).await,
            None => guild_id.kick(self, user_id).await,
        }
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: Option<&str>) -> serenity::Result<()> {
        match reason {
            Some(reason) => guild_id.ban_with_reason(self, user_id, 0, &audit_reason(reason)).await,
            None => guild_id.ban(self, user_id, 0).await,
        }
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId) -> serenity::Result<()> {
        guild_id.unban(self, user_id).await
    }
}

/// Position in the guild hierarchy, used to stop members acting on their peers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rank {
    pub is_owner: bool,
    pub top_role: u16,
}

impl Rank {
    pub fn outranks(&self, other: &Rank) -> bool {
        if other.is_owner {
            return false;
        }
        self.is_owner || self.top_role > other.top_role
    }
}

#[derive(Clone, Debug)]
pub struct NewCase {
    pub kind: CaseKind,
    pub guild_id: GuildId,
    pub guild_name: String,
    pub user_id: UserId,
    pub moderator_id: UserId,
    pub reason: Option<String>,
    pub duration: Option<Duration>,
    /// Content of the message the moderator replied to.
    pub message: Option<String>,
}

fn past_tense(kind: CaseKind) -> &'static str {
    match kind {
        CaseKind::Warn => "warned",
        CaseKind::Mute => "muted",
        CaseKind::Kick => "kicked",
        CaseKind::Ban => "banned",
    }
}

/// Direct message sent to the target of a case.
pub fn notice(kind: CaseKind, guild_name: &str, reason: Option<&str>, duration: Option<Duration>) -> String {
    let mut text = format!("You have been {} in **{}**", past_tense(kind), guild_name);
    if let Some(duration) = duration {
        text.push_str(&format!(" for {}", format_duration(duration.as_secs())));
    }
    text.push('.');
    if let Some(reason) = reason {
        text.push_str(&format!("\nReason: {}", reason));
    }
    text
}

fn expiry(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, BotError> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| BotError::bad_argument("That duration is too long."))
}

/// Retries when another case in the same guild claimed the id first.
const CASE_ID_ATTEMPTS: usize = 5;

async fn insert_next<C: ConnectionTrait>(db: &C, guild_id: i64, row: case::ActiveModel) -> Result<case::Model, DbErr> {
    let mut attempt = 1;
    loop {
        let mut candidate = row.clone();
        candidate.case_id = Set(case::next_case_id(db, guild_id).await?);
        match candidate.insert(db).await {
            Err(err) if attempt < CASE_ID_ATTEMPTS && is_unique_violation(&err) => attempt += 1,
            result => return result,
        }
    }
}

async fn apply<A>(actions: &A, new: &NewCase, text: &str, until: Option<DateTime<Utc>>) -> Result<(), BotError>
where
    A: CaseActions + ?Sized,
{
    let reason = new.reason.as_deref();
    match new.kind {
        CaseKind::Warn => {
            let _ = actions.notify(new.user_id, text).await;
        }
        CaseKind::Mute => {
            if let Some(until) = until {
                actions.timeout(new.guild_id, new.user_id, until).await?;
            }
            let _ = actions.notify(new.user_id, text).await;
        }
        CaseKind::Kick => {
            let _ = actions.notify(new.user_id, text).await;
            actions.kick(new.guild_id, new.user_id, reason).await?;
        }
        CaseKind::Ban => {
            let _ = actions.notify(new.user_id, text).await;
            actions.ban(new.guild_id, new.user_id, reason).await?;
        }
    }
    Ok(())
}

/// Records a moderation action as the guild's next case and applies it. The case
/// number is reserved first; if Discord refuses the action the case is withdrawn.
pub async fn open<C, A>(db: &C, actions: &A, new: NewCase, now: DateTime<Utc>) -> Result<case::Model, BotError>
where
    C: ConnectionTrait,
    A: CaseActions + ?Sized,
{
    let expires = match new.duration {
        Some(duration) => Some(expiry(now, duration)?),
        None => None,
    };
    if new.kind == CaseKind::Mute {
        match new.duration {
            None => return Err(BotError::MissingArgument("duration".to_string())),
            Some(duration) if duration > MAX_MUTE => {
                return Err(BotError::bad_argument("Mutes cannot be longer than 28 days."))
            }
            Some(_) => {}
        }
    }

    let guild_id = new.guild_id.get() as i64;
    let row = case::ActiveModel {
        kind: Set(new.kind),
        guild_id: Set(guild_id),
        user_id: Set(new.user_id.get() as i64),
        moderator_id: Set(new.moderator_id.get() as i64),
        reason: Set(new.reason.clone()),
        expires: Set(expires),
        message: Set(new.message.clone()),
        created: Set(now),
        // kicks have nothing to undo
        resolved: Set(new.kind == CaseKind::Kick),
        ..Default::default()
    };
    let row = insert_next(db, guild_id, row).await?;

    let text = notice(new.kind, &new.guild_name, new.reason.as_deref(), new.duration);
    if let Err(err) = apply(actions, &new, &text, expires).await {
        tracing::warn!(guild_id, case_id = row.case_id, "action failed, withdrawing case: {}", err);
        row.delete(db).await?;
        return Err(err);
    }

    tracing::info!(guild_id, case_id = row.case_id, kind = new.kind.label(), "opened case");
    Ok(row)
}

/// Undoes the Discord side of a case. Members who left or were already unbanned are fine.
pub async fn reverse<A>(actions: &A, case: &case::Model) -> Result<(), BotError>
where
    A: CaseActions + ?Sized,
{
    let guild_id = GuildId::new(case.guild_id as u64);
    let user_id = UserId::new(case.user_id as u64);
    match case.kind {
        CaseKind::Mute => ignore_not_found(actions.clear_timeout(guild_id, user_id).await),
        CaseKind::Ban => ignore_not_found(actions.unban(guild_id, user_id).await),
        CaseKind::Warn | CaseKind::Kick => Ok(()),
    }
}

async fn mark_resolved<C: ConnectionTrait>(db: &C, case: case::Model) -> Result<case::Model, DbErr> {
    let mut row: case::ActiveModel = case.into();
    row.resolved = Set(true);
    row.update(db).await
}

/// Reverses and resolves every case whose expiry has passed. Cases whose reversal
/// fails stay unresolved and are retried on the next sweep.
pub async fn expire_due<C, A>(db: &C, actions: &A, now: DateTime<Utc>) -> Result<usize, DbErr>
where
    C: ConnectionTrait,
    A: CaseActions + ?Sized,
{
    let mut expired = 0;
    for case in case::due(db, now).await? {
        if let Err(err) = reverse(actions, &case).await {
            tracing::warn!(guild_id = case.guild_id, case_id = case.case_id, "failed to reverse expired case: {}", err);
            continue;
        }
        mark_resolved(db, case).await?;
        expired += 1;
    }
    Ok(expired)
}

/// Ends a mute or ban early, e.g. from `unmute`/`unban`, resolving its open cases.
pub async fn lift<C, A>(
    db: &C,
    actions: &A,
    guild_id: GuildId,
    user_id: UserId,
    kind: CaseKind,
) -> Result<usize, BotError>
where
    C: ConnectionTrait,
    A: CaseActions + ?Sized,
{
    match kind {
        CaseKind::Mute => actions.clear_timeout(guild_id, user_id).await?,
        CaseKind::Ban => actions.unban(guild_id, user_id).await?,
        CaseKind::Warn | CaseKind::Kick => return Err(BotError::refused("Only mutes and bans can be lifted.")),
    }

    let open = case::open_for_user(db, guild_id.get() as i64, user_id.get() as i64, kind).await?;
    let count = open.len();
    for case in open {
        mark_resolved(db, case).await?;
    }
    Ok(count)
}

/// Deletes a case, first reversing its action if it is still in effect.
pub async fn delete<C, A>(db: &C, actions: &A, case: case::Model, now: DateTime<Utc>) -> Result<(), BotError>
where
    C: ConnectionTrait,
    A: CaseActions + ?Sized,
{
    if case.kind.is_reversible() && case.is_active(now) {
        reverse(actions, &case).await?;
    }
    case.delete(db).await?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseEdit {
    Expires(Duration),
    Reason(String),
    Message(String),
}

impl CaseEdit {
    pub fn parse(field: &str, value: &str) -> Result<CaseEdit, BotError> {
        match field.trim().to_lowercase().as_str() {
            "expires" => Ok(CaseEdit::Expires(crate::duration::parse_duration(value)?)),
            "reason" => Ok(CaseEdit::Reason(value.to_string())),
            "message" => Ok(CaseEdit::Message(value.to_string())),
            other => Err(BotError::bad_argument(format!(
                "`{}` is not editable. Choose one of `expires`, `reason` or `message`.",
                other
            ))),
        }
    }
}

/// Applies an edit. A new expiry on an active mute is pushed to Discord as well.
pub async fn edit<C, A>(
    db: &C,
    actions: &A,
    case: case::Model,
    change: CaseEdit,
    now: DateTime<Utc>,
) -> Result<case::Model, BotError>
where
    C: ConnectionTrait,
    A: CaseActions + ?Sized,
{
    let is_active = case.is_active(now);
    let kind = case.kind;
    let (guild_id, user_id) = (GuildId::new(case.guild_id as u64), UserId::new(case.user_id as u64));
    let mut row: case::ActiveModel = case.into();

    match change {
        CaseEdit::Expires(duration) => {
            let until = expiry(now, duration)?;
            if kind == CaseKind::Mute {
                if duration > MAX_MUTE {
                    return Err(BotError::bad_argument("Mutes cannot be longer than 28 days."));
                }
                if is_active {
                    actions.timeout(guild_id, user_id, until).await?;
                }
            }
            row.expires = Set(Some(until));
        }
        CaseEdit::Reason(reason) => row.reason = Set(Some(reason)),
        CaseEdit::Message(message) => row.message = Set(Some(message)),
    }

    Ok(row.update(db).await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sea_orm::EntityTrait;

    use super::*;
    use crate::model::test_db;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_ban: bool,
        fail_unban: bool,
    }

    impl Recorder {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaseActions for Recorder {
        async fn notify(&self, user_id: UserId, _text: &str) -> serenity::Result<()> {
            self.record(format!("notify {}", user_id));
            Ok(())
        }

        async fn timeout(&self, _guild_id: GuildId, user_id: UserId, _until: DateTime<Utc>) -> serenity::Result<()> {
            self.record(format!("timeout {}", user_id));
            Ok(())
        }

        async fn clear_timeout(&self, _guild_id: GuildId, user_id: UserId) -> serenity::Result<()> {
            self.record(format!("clear_timeout {}", user_id));
            Ok(())
        }

        async fn kick(&self, _guild_id: GuildId, user_id: UserId, _reason: Option<&str>) -> serenity::Result<()> {
            self.record(format!("kick {}", user_id));
            Ok(())
        }

        async fn ban(&self, _guild_id: GuildId, user_id: UserId, _reason: Option<&str>) -> serenity::Result<()> {
            if self.fail_ban {
                return Err(serenity::Error::Other("missing permissions"));
            }
            self.record(format!("ban {}", user_id));
            Ok(())
        }

        async fn unban(&self, _guild_id: GuildId, user_id: UserId) -> serenity::Result<()> {
            if self.fail_unban {
                return Err(serenity::Error::Other("unban failed"));
            }
            self.record(format!("unban {}", user_id));
            Ok(())
        }
    }

    fn new_case(kind: CaseKind, guild: u64, user: u64, duration: Option<Duration>) -> NewCase {
        NewCase {
            kind,
            guild_id: GuildId::new(guild),
            guild_name: "Test Guild".to_string(),
            user_id: UserId::new(user),
            moderator_id: UserId::new(99),
            reason: Some("spam".to_string()),
            duration,
            message: None,
        }
    }

    #[test]
    fn owner_outranks_everyone_and_is_outranked_by_nobody() {
        let owner = Rank { is_owner: true, top_role: 0 };
        let admin = Rank { is_owner: false, top_role: 10 };
        let member = Rank { is_owner: false, top_role: 2 };

        assert!(owner.outranks(&admin));
        assert!(!admin.outranks(&owner));
        assert!(admin.outranks(&member));
        assert!(!member.outranks(&admin));
        assert!(!member.outranks(&member));
    }

    #[test]
    fn notice_mentions_duration_and_reason() {
        let text = notice(CaseKind::Mute, "Lumin HQ", Some("spam"), Some(Duration::from_secs(3600)));
        assert_eq!(text, "You have been muted in **Lumin HQ** for 1h.\nReason: spam");
        assert_eq!(notice(CaseKind::Kick, "Lumin HQ", None, None), "You have been kicked in **Lumin HQ**.");
    }

    #[tokio::test]
    async fn case_ids_are_sequential_per_guild() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let now = Utc::now();

        let first = open(&db, &actions, new_case(CaseKind::Warn, 1, 10, None), now).await?;
        let second = open(&db, &actions, new_case(CaseKind::Kick, 1, 11, None), now).await?;
        let other_guild = open(&db, &actions, new_case(CaseKind::Warn, 2, 10, None), now).await?;

        assert_eq!((first.case_id, second.case_id, other_guild.case_id), (1, 2, 1));
        assert!(second.resolved);
        assert_eq!(actions.calls(), vec!["notify 10", "notify 11", "kick 11", "notify 10"]);
        Ok(())
    }

    #[tokio::test]
    async fn simultaneous_cases_get_distinct_ids() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let now = Utc::now();

        let (first, second) = tokio::join!(
            open(&db, &actions, new_case(CaseKind::Ban, 1, 10, None), now),
            open(&db, &actions, new_case(CaseKind::Ban, 1, 11, None), now),
        );
        let mut ids = vec![first?.case_id, second?.case_id];
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(actions.calls().iter().filter(|call| call.starts_with("ban")).count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn refused_action_leaves_no_case() -> Result<(), BotError> {
        let db = test_db().await?;
        let failing = Recorder {
            fail_ban: true,
            ..Default::default()
        };

        let err = open(&db, &failing, new_case(CaseKind::Ban, 1, 10, None), Utc::now()).await.unwrap_err();
        assert!(matches!(err, BotError::Discord(_)));
        assert!(case::Entity::find().all(&db).await?.is_empty());

        let next = open(&db, &Recorder::default(), new_case(CaseKind::Warn, 1, 10, None), Utc::now()).await?;
        assert_eq!(next.case_id, 1);
        Ok(())
    }

    #[tokio::test]
    async fn mutes_are_capped() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let too_long = Some(MAX_MUTE + Duration::from_secs(1));

        let err = open(&db, &actions, new_case(CaseKind::Mute, 1, 10, too_long), Utc::now()).await.unwrap_err();
        assert!(matches!(err, BotError::BadArgument(_)));
        assert!(actions.calls().is_empty());
        assert!(case::Entity::find().all(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sweep_reverses_only_due_unresolved_cases() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let start = Utc::now();
        let minute = Some(Duration::from_secs(60));
        let day = Some(Duration::from_secs(86_400));

        open(&db, &actions, new_case(CaseKind::Mute, 1, 10, minute), start).await?;
        open(&db, &actions, new_case(CaseKind::Ban, 1, 11, minute), start).await?;
        open(&db, &actions, new_case(CaseKind::Ban, 1, 12, day), start).await?;
        open(&db, &actions, new_case(CaseKind::Ban, 1, 13, None), start).await?;

        let later = start + chrono::Duration::minutes(2);
        assert_eq!(expire_due(&db, &actions, later).await?, 2);
        assert_eq!(expire_due(&db, &actions, later).await?, 0);

        let calls = actions.calls();
        assert!(calls.contains(&"clear_timeout 10".to_string()));
        assert!(calls.contains(&"unban 11".to_string()));
        assert!(!calls.contains(&"unban 12".to_string()));

        let resolved: Vec<i64> = case::Entity::find()
            .all(&db)
            .await?
            .into_iter()
            .filter(|case| case.resolved)
            .map(|case| case.user_id)
            .collect();
        assert_eq!(resolved, vec![10, 11]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_reversal_is_retried() -> Result<(), BotError> {
        let db = test_db().await?;
        let start = Utc::now();
        let failing = Recorder {
            fail_unban: true,
            ..Default::default()
        };
        open(&db, &failing, new_case(CaseKind::Ban, 1, 11, Some(Duration::from_secs(60))), start).await?;

        let later = start + chrono::Duration::minutes(2);
        assert_eq!(expire_due(&db, &failing, later).await?, 0);
        assert_eq!(expire_due(&db, &Recorder::default(), later).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_an_active_ban_unbans() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let now = Utc::now();
        let ban = open(&db, &actions, new_case(CaseKind::Ban, 1, 11, None), now).await?;
        let warn = open(&db, &actions, new_case(CaseKind::Warn, 1, 12, None), now).await?;

        delete(&db, &actions, ban, now).await?;
        delete(&db, &actions, warn, now).await?;

        assert!(actions.calls().contains(&"unban 11".to_string()));
        assert!(case::Entity::find().all(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn editing_a_mute_expiry_extends_the_timeout() -> Result<(), BotError> {
        let db = test_db().await?;
        let actions = Recorder::default();
        let now = Utc::now();
        let mute = open(&db, &actions, new_case(CaseKind::Mute, 1, 10, Some(Duration::from_secs(60))), now).await?;

        let change = CaseEdit::parse("expires", "2h")?;
        let edited = edit(&db, &actions, mute, change, now).await?;
        assert_eq!(
            edited.expires.map(|expires| expires.timestamp()),
            Some((now + chrono::Duration::hours(2)).timestamp())
        );
        assert_eq!(actions.calls().iter().filter(|call| *call == "timeout 10").count(), 2);

        assert!(CaseEdit::parse("moderator", "x").is_err());
        Ok(())
    }
}
