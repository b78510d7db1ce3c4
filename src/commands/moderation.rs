use std::collections::HashMap;

use chrono::Utc;
use serenity::all::{Context, GuildId, Permissions, Role, RoleId, UserId};

use super::cases::case_embed;
use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::cases::{self, NewCase, Rank};
use crate::error::{http_status, BotError};
use crate::model::case::CaseKind;
use crate::state::BotState;

const WARN_PARAMS: &[Param] = &[
    Param::required("user", ParamKind::User, "Member to warn"),
    Param::optional("duration", ParamKind::Duration, "How long the warning stays active, e.g. 7d"),
    Param::optional("reason", ParamKind::String, "Why they are being warned").rest(),
];
const MUTE_PARAMS: &[Param] = &[
    Param::required("user", ParamKind::User, "Member to mute"),
    Param::required("duration", ParamKind::Duration, "How long, e.g. 1h30m (at most 28 days)"),
    Param::optional("reason", ParamKind::String, "Why they are being muted").rest(),
];
const KICK_PARAMS: &[Param] = &[
    Param::required("user", ParamKind::User, "Member to kick"),
    Param::optional("reason", ParamKind::String, "Why they are being kicked").rest(),
];
const BAN_PARAMS: &[Param] = &[
    Param::required("user", ParamKind::User, "User to ban"),
    Param::optional("duration", ParamKind::Duration, "Unban automatically after this long"),
    Param::optional("reason", ParamKind::String, "Why they are being banned").rest(),
];
const TARGET_PARAMS: &[Param] = &[Param::required("user", ParamKind::User, "The user")];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("warn", "Warn a member")
        .params(WARN_PARAMS)
        .permissions(Permissions::MODERATE_MEMBERS),
    CommandInfo::new("mute", "Time out a member")
        .params(MUTE_PARAMS)
        .permissions(Permissions::MODERATE_MEMBERS)
        .bot_permissions(Permissions::MODERATE_MEMBERS),
    CommandInfo::new("unmute", "Remove a member's timeout")
        .params(TARGET_PARAMS)
        .permissions(Permissions::MODERATE_MEMBERS)
        .bot_permissions(Permissions::MODERATE_MEMBERS),
    CommandInfo::new("kick", "Kick a member")
        .params(KICK_PARAMS)
        .permissions(Permissions::KICK_MEMBERS)
        .bot_permissions(Permissions::KICK_MEMBERS),
    CommandInfo::new("ban", "Ban a user, optionally for a limited time")
        .params(BAN_PARAMS)
        .permissions(Permissions::BAN_MEMBERS)
        .bot_permissions(Permissions::BAN_MEMBERS),
    CommandInfo::new("unban", "Lift a ban")
        .params(TARGET_PARAMS)
        .permissions(Permissions::BAN_MEMBERS)
        .bot_permissions(Permissions::BAN_MEMBERS),
];

/// Every role of a guild and its owner, from the cache or else over HTTP.
pub(super) async fn guild_roles(ctx: &Context, guild_id: GuildId) -> Result<(HashMap<RoleId, Role>, UserId), BotError> {
    let cached = ctx.cache.guild(guild_id).map(|guild| (guild.roles.clone(), guild.owner_id));
    if let Some(cached) = cached {
        return Ok(cached);
    }
    let guild = guild_id.to_partial_guild(&ctx.http).await?;
    Ok((guild.roles, guild.owner_id))
}

fn rank_from(member_roles: &[RoleId], roles: &HashMap<RoleId, Role>, owner_id: UserId, user_id: UserId) -> Rank {
    let top_role = member_roles
        .iter()
        .filter_map(|role_id| roles.get(role_id))
        .map(|role| role.position)
        .max()
        .unwrap_or(0);
    Rank {
        is_owner: owner_id == user_id,
        top_role,
    }
}

/// The member's place in the role hierarchy. `None` when they are not in the guild.
pub(super) async fn rank_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<Option<Rank>, BotError> {
    let member_roles = match guild_id.member(ctx, user_id).await {
        Ok(member) => member.roles,
        Err(err) if http_status(&err) == Some(404) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let (roles, owner_id) = guild_roles(ctx, guild_id).await?;
    Ok(Some(rank_from(&member_roles, &roles, owner_id, user_id)))
}

/// Moderators may only act on members below them. Users outside the guild can still be banned.
fn check_hierarchy(kind: CaseKind, author: Option<Rank>, target: Option<Rank>) -> Result<(), BotError> {
    let Some(author) = author else {
        return Err(BotError::refused("I couldn't work out your place in the role hierarchy."));
    };
    match target {
        Some(target) if !author.outranks(&target) => Err(BotError::refused("You can only act on members below you.")),
        Some(_) => Ok(()),
        None if kind == CaseKind::Ban => Ok(()),
        None => Err(BotError::NotFound("Member".to_string())),
    }
}

fn kind_of(name: &str) -> Option<CaseKind> {
    match name {
        "warn" => Some(CaseKind::Warn),
        "mute" | "unmute" => Some(CaseKind::Mute),
        "kick" => Some(CaseKind::Kick),
        "ban" | "unban" => Some(CaseKind::Ban),
        _ => None,
    }
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let name = invocation.info.name;
    let kind = kind_of(name).ok_or_else(|| BotError::NotFound(format!("Command `{}`", name)))?;
    let guild_id = invocation.require_guild()?;
    let target = invocation.args.require_user("user")?;

    if target == ctx.cache.current_user().id {
        return Err(BotError::refused("I won't do that to myself."));
    }
    if target == invocation.author.id {
        return Err(BotError::refused("You can't do that to yourself."));
    }

    if name == "unmute" || name == "unban" {
        let resolved = cases::lift(&state.db, ctx.http.as_ref(), guild_id, target, kind).await?;
        let verb = if kind == CaseKind::Mute { "Unmuted" } else { "Unbanned" };
        return Ok(Reply::text(format!("{} <@{}> and closed {} open case(s).", verb, target, resolved)));
    }

    let author_rank = rank_of(ctx, guild_id, invocation.author.id).await?;
    let target_rank = rank_of(ctx, guild_id, target).await?;
    check_hierarchy(kind, author_rank, target_rank)?;

    let guild_name = ctx
        .cache
        .guild(guild_id)
        .map(|guild| guild.name.clone())
        .unwrap_or_else(|| "the server".to_string());

    let new = NewCase {
        kind,
        guild_id,
        guild_name,
        user_id: target,
        moderator_id: invocation.author.id,
        reason: invocation.args.string("reason"),
        duration: invocation.args.duration("duration"),
        message: invocation.replied_to().map(|message| message.content.clone()),
    };
    let case = cases::open(&state.db, ctx.http.as_ref(), new, Utc::now()).await?;
    Ok(Reply::embed(case_embed(invocation, &case)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_moderation_command_maps_to_a_case_kind() {
        for info in COMMANDS {
            assert!(kind_of(info.name).is_some(), "{}", info.name);
        }
        assert_eq!(kind_of("unban"), Some(CaseKind::Ban));
        assert_eq!(kind_of("case"), None);
    }

    #[test]
    fn unknown_author_rank_is_refused() {
        let member = Some(Rank { is_owner: false, top_role: 1 });
        for kind in [CaseKind::Warn, CaseKind::Ban] {
            assert!(matches!(check_hierarchy(kind, None, member), Err(BotError::Refused(_))));
            assert!(matches!(check_hierarchy(kind, None, None), Err(BotError::Refused(_))));
        }
    }

    #[test]
    fn only_bans_reach_users_outside_the_guild() {
        let moderator = Some(Rank { is_owner: false, top_role: 5 });
        assert!(check_hierarchy(CaseKind::Ban, moderator, None).is_ok());
        assert!(matches!(check_hierarchy(CaseKind::Kick, moderator, None), Err(BotError::NotFound(_))));
        assert!(matches!(check_hierarchy(CaseKind::Mute, moderator, None), Err(BotError::NotFound(_))));
    }

    #[test]
    fn peers_and_superiors_are_protected() {
        let moderator = Some(Rank { is_owner: false, top_role: 5 });
        let peer = Some(Rank { is_owner: false, top_role: 5 });
        let owner = Some(Rank { is_owner: true, top_role: 0 });
        let member = Some(Rank { is_owner: false, top_role: 1 });

        assert!(matches!(check_hierarchy(CaseKind::Warn, moderator, peer), Err(BotError::Refused(_))));
        assert!(matches!(check_hierarchy(CaseKind::Ban, moderator, owner), Err(BotError::Refused(_))));
        assert!(check_hierarchy(CaseKind::Kick, moderator, member).is_ok());
    }

    #[test]
    fn rank_comes_from_the_highest_known_role() {
        let roles: HashMap<RoleId, Role> = [(1, 3), (2, 7)]
            .into_iter()
            .map(|(id, position)| {
                let mut role = Role::default();
                role.id = RoleId::new(id);
                role.position = position;
                (role.id, role)
            })
            .collect();
        let owner = UserId::new(50);
        let held = [RoleId::new(1), RoleId::new(2), RoleId::new(9)];

        assert_eq!(rank_from(&held, &roles, owner, UserId::new(10)), Rank { is_owner: false, top_role: 7 });
        assert_eq!(rank_from(&[], &roles, owner, owner), Rank { is_owner: true, top_role: 0 });
    }
}
