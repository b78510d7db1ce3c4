use chrono::Utc;
use serenity::all::{Context, CreateEmbed, CreateEmbedFooter, Permissions, UserId};

use super::{missing_permissions, CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::cases::{self, CaseEdit};
use crate::error::BotError;
use crate::model::case;
use crate::state::BotState;

const LIST_LIMIT: u64 = 10;

const ID_PARAMS: &[Param] = &[Param::required("id", ParamKind::Integer, "Case number")];
const EDIT_PARAMS: &[Param] = &[
    Param::required("id", ParamKind::Integer, "Case number"),
    Param::required("field", ParamKind::String, "What to change").choices(&["expires", "reason", "message"]),
    Param::required("value", ParamKind::String, "The new value; expiry is a duration from now").rest(),
];
const LIST_PARAMS: &[Param] = &[Param::optional("user", ParamKind::User, "Whose cases to list (defaults to you)")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("case info", "Show a moderation case").params(ID_PARAMS),
    CommandInfo::new("case delete", "Delete a case, undoing it if still active")
        .params(ID_PARAMS)
        .permissions(Permissions::MODERATE_MEMBERS),
    CommandInfo::new("case edit", "Change a case's expiry, reason or message")
        .params(EDIT_PARAMS)
        .permissions(Permissions::MODERATE_MEMBERS),
    CommandInfo::new("case list", "List the latest cases against a user").params(LIST_PARAMS),
];

pub(super) fn case_embed(invocation: &Invocation<'_>, case: &case::Model) -> CreateEmbed {
    let status = if case.resolved {
        "Resolved"
    } else if case.is_active(Utc::now()) {
        "Active"
    } else {
        "Expired"
    };
    let mut embed = invocation
        .embed()
        .title(format!("Case #{} | {}", case.case_id, case.kind.label()))
        .field("User", format!("<@{}>", case.user_id), true)
        .field("Moderator", format!("<@{}>", case.moderator_id), true)
        .field("Status", status, true)
        .field("Reason", case.reason.as_deref().unwrap_or("No reason given"), false)
        .timestamp(case.created);
    if let Some(expires) = case.expires {
        embed = embed.field("Expires", format!("<t:{}:R>", expires.timestamp()), true);
    }
    if let Some(message) = &case.message {
        let message: String = message.chars().take(1024).collect();
        embed = embed.field("Message", message, false);
    }
    embed
}

fn can_view_others(invocation: &Invocation<'_>) -> bool {
    missing_permissions(Permissions::MODERATE_MEMBERS, invocation.permissions).is_empty()
}

async fn require_case(state: &BotState, guild_id: i64, invocation: &Invocation<'_>) -> Result<case::Model, BotError> {
    let id = invocation.args.require_integer("id")?;
    case::find(&state.db, guild_id, id)
        .await?
        .ok_or_else(|| BotError::NotFound(format!("Case #{}", id)))
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?.get() as i64;

    match invocation.info.name {
        "case info" => {
            let case = require_case(state, guild_id, invocation).await?;
            if case.user_id != invocation.author.id.get() as i64 && !can_view_others(invocation) {
                return Err(BotError::MissingPermissions(vec!["Moderate Members".to_string()]));
            }
            Ok(Reply::embed(case_embed(invocation, &case)))
        }
        "case delete" => {
            let case = require_case(state, guild_id, invocation).await?;
            let case_id = case.case_id;
            cases::delete(&state.db, ctx.http.as_ref(), case, Utc::now()).await?;
            Ok(Reply::text(format!("Deleted case #{}.", case_id)))
        }
        "case edit" => {
            let case = require_case(state, guild_id, invocation).await?;
            let change = CaseEdit::parse(
                &invocation.args.require_string("field")?,
                &invocation.args.require_string("value")?,
            )?;
            let case = cases::edit(&state.db, ctx.http.as_ref(), case, change, Utc::now()).await?;
            Ok(Reply::embed(case_embed(invocation, &case)))
        }
        "case list" => {
            let user: UserId = invocation.args.user("user").unwrap_or(invocation.author.id);
            if user != invocation.author.id && !can_view_others(invocation) {
                return Err(BotError::MissingPermissions(vec!["Moderate Members".to_string()]));
            }
            let rows = case::for_user(&state.db, guild_id, user.get() as i64, LIST_LIMIT).await?;
            if rows.is_empty() {
                return Ok(Reply::text(format!("<@{}> has no cases.", user)));
            }
            let lines: Vec<String> = rows
                .iter()
                .map(|case| {
                    format!(
                        "`#{}` **{}** <t:{}:d> {}",
                        case.case_id,
                        case.kind.label(),
                        case.created.timestamp(),
                        case.reason.as_deref().unwrap_or("No reason given")
                    )
                })
                .collect();
            let embed = invocation
                .embed()
                .title("Cases")
                .description(format!("<@{}>\n\n{}", user, lines.join("\n")))
                .footer(CreateEmbedFooter::new(format!("Showing the latest {}", rows.len())));
            Ok(Reply::embed(embed))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}
