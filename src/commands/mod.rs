mod afk;
mod basic;
mod beta;
mod cases;
mod cooldown;
mod economy;
mod giveaway;
mod global_ban;
mod greet;
mod info;
pub mod invocation;
mod logging;
mod moderation;
mod setup;
mod shop;
mod snapshot;

use std::time::{Duration, Instant};

use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, ExecuteWebhook, Message, Permissions, Webhook,
};

use crate::cooldown::{effective_cooldown, CooldownKey};
use crate::error::BotError;
use crate::model::guild;
use crate::state::BotState;

pub use invocation::{Invocation, Reply, Source};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    User,
    Integer,
    Boolean,
    Channel,
    Role,
    String,
    /// Text such as `1h30m`.
    Duration,
}

impl ParamKind {
    pub fn label(&self) -> &'static str {
        match self {
            ParamKind::User => "user",
            ParamKind::Integer => "number",
            ParamKind::Boolean => "on/off value",
            ParamKind::Channel => "channel",
            ParamKind::Role => "role",
            ParamKind::String => "text",
            ParamKind::Duration => "duration",
        }
    }

    fn option_type(&self) -> CommandOptionType {
        match self {
            ParamKind::User => CommandOptionType::User,
            ParamKind::Integer => CommandOptionType::Integer,
            ParamKind::Boolean => CommandOptionType::Boolean,
            ParamKind::Channel => CommandOptionType::Channel,
            ParamKind::Role => CommandOptionType::Role,
            ParamKind::String | ParamKind::Duration => CommandOptionType::String,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Takes the rest of the line in text commands. Only valid on the last parameter.
    pub rest: bool,
    pub choices: &'static [&'static str],
}

impl Param {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
        Param {
            name,
            description,
            kind,
            required: true,
            rest: false,
            choices: &[],
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Param {
        Param {
            required: false,
            ..Param::required(name, kind, description)
        }
    }

    pub const fn rest(self) -> Param {
        Param { rest: true, ..self }
    }

    pub const fn choices(self, choices: &'static [&'static str]) -> Param {
        Param { choices, ..self }
    }
}

/// Static description of a command: how it is called and who may call it.
#[derive(Clone, Debug)]
pub struct CommandInfo {
    /// Space separated for subcommands, e.g. `case info`.
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [Param],
    pub permissions: Permissions,
    pub bot_permissions: Permissions,
    pub guild_only: bool,
    pub developer_only: bool,
    /// Per user; guilds may override it with `cooldown set`.
    pub cooldown: Option<Duration>,
    /// Other names accepted by text commands.
    pub aliases: &'static [&'static str],
}

impl CommandInfo {
    pub const fn new(name: &'static str, description: &'static str) -> CommandInfo {
        CommandInfo {
            name,
            description,
            params: &[],
            permissions: Permissions::empty(),
            bot_permissions: Permissions::empty(),
            guild_only: true,
            developer_only: false,
            cooldown: None,
            aliases: &[],
        }
    }

    pub const fn params(self, params: &'static [Param]) -> CommandInfo {
        CommandInfo { params, ..self }
    }

    pub const fn permissions(self, permissions: Permissions) -> CommandInfo {
        CommandInfo { permissions, ..self }
    }

    pub const fn bot_permissions(self, bot_permissions: Permissions) -> CommandInfo {
        CommandInfo { bot_permissions, ..self }
    }

    pub const fn anywhere(self) -> CommandInfo {
        CommandInfo {
            guild_only: false,
            ..self
        }
    }

    pub const fn developer_only(self) -> CommandInfo {
        CommandInfo {
            developer_only: true,
            ..self
        }
    }

    pub const fn cooldown(self, secs: u64) -> CommandInfo {
        CommandInfo {
            cooldown: Some(Duration::from_secs(secs)),
            ..self
        }
    }

    pub const fn aliases(self, aliases: &'static [&'static str]) -> CommandInfo {
        CommandInfo { aliases, ..self }
    }

    fn root(&self) -> &'static str {
        self.name.split(' ').next().unwrap_or(self.name)
    }

    /// `?!warn <user> [duration] [reason...]`
    pub fn usage(&self, prefix: &str) -> String {
        let mut usage = format!("{}{}", prefix, self.name);
        for param in self.params {
            let name = if param.rest {
                format!("{}...", param.name)
            } else {
                param.name.to_string()
            };
            if param.required {
                usage.push_str(&format!(" <{}>", name));
            } else {
                usage.push_str(&format!(" [{}]", name));
            }
        }
        usage
    }
}

/// Every command, grouped by module.
pub fn all() -> impl Iterator<Item = &'static CommandInfo> {
    afk::COMMANDS
        .iter()
        .chain(basic::COMMANDS)
        .chain(setup::COMMANDS)
        .chain(moderation::COMMANDS)
        .chain(cases::COMMANDS)
        .chain(economy::COMMANDS)
        .chain(shop::COMMANDS)
        .chain(giveaway::COMMANDS)
        .chain(logging::COMMANDS)
        .chain(greet::COMMANDS)
        .chain(global_ban::COMMANDS)
        .chain(snapshot::COMMANDS)
        .chain(beta::COMMANDS)
        .chain(cooldown::COMMANDS)
        .chain(info::COMMANDS)
}

pub fn find(name: &str) -> Option<&'static CommandInfo> {
    let name = name.trim().to_lowercase();
    all().find(|info| info.name == name || info.aliases.contains(&name.as_str()))
}

fn leading_words(input: &str, count: usize) -> Option<(String, &str)> {
    let mut rest = input;
    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        words.push(trimmed[..end].to_lowercase());
        rest = &trimmed[end..];
    }
    Some((words.join(" "), rest))
}

/// The command named at the start of a text invocation, preferring the longest name.
pub fn resolve_text(input: &str) -> Option<(&'static CommandInfo, &str)> {
    (1..=3).rev().find_map(|count| {
        let (name, rest) = leading_words(input, count)?;
        find(&name).map(|info| (info, rest))
    })
}

fn group_description(root: &str) -> &'static str {
    match root {
        "case" => "Look up and manage moderation cases",
        "settings" => "Change how the bot behaves in this server",
        "shop" => "Buy roles with server currency",
        "giveaway" => "Run giveaways",
        "log" => "Log server events to a channel",
        "welcome" => "Greet members when they join",
        "goodbye" => "Say goodbye when members leave",
        "globalban" => "Bans that apply to every participating server",
        "snapshot" => "Save and restore the server layout",
        "beta" => "Closed beta access",
        "cooldown" => "Per-server command cooldowns",
        "info" => "Information about users, roles, the server or the bot",
        _ => "Commands",
    }
}

fn create_options(params: &'static [Param]) -> Vec<CreateCommandOption> {
    params
        .iter()
        .map(|param| {
            let mut option = CreateCommandOption::new(param.kind.option_type(), param.name, param.description)
                .required(param.required);
            for choice in param.choices {
                option = option.add_string_choice(*choice, *choice);
            }
            option
        })
        .collect()
}

fn create_subcommand(name: &str, info: &'static CommandInfo) -> CreateCommandOption {
    let mut option = CreateCommandOption::new(CommandOptionType::SubCommand, name, info.description);
    for sub_option in create_options(info.params) {
        option = option.add_sub_option(sub_option);
    }
    option
}

/// Slash command definitions. `case info` becomes the `info` subcommand of `/case`, and
/// `log module add` the `add` subcommand of the `module` group of `/log`.
pub fn application_commands() -> Vec<CreateCommand> {
    let mut roots: Vec<(&'static str, Vec<&'static CommandInfo>)> = Vec::new();
    for info in all() {
        match roots.iter_mut().find(|(root, _)| *root == info.root()) {
            Some((_, members)) => members.push(info),
            None => roots.push((info.root(), vec![info])),
        }
    }

    roots
        .into_iter()
        .map(|(root, members)| {
            if let [single] = members.as_slice() {
                if single.name == root {
                    let mut command = CreateCommand::new(root)
                        .description(single.description)
                        .set_options(create_options(single.params))
                        .dm_permission(!single.guild_only);
                    if !single.permissions.is_empty() {
                        command = command.default_member_permissions(single.permissions);
                    }
                    return command;
                }
            }

            let mut command = CreateCommand::new(root)
                .description(group_description(root))
                .dm_permission(!members.iter().all(|info| info.guild_only));
            let mut groups: Vec<(&str, CreateCommandOption)> = Vec::new();
            for info in members {
                let words: Vec<&str> = info.name.split(' ').collect();
                match words.as_slice() {
                    [_, sub] => command = command.add_option(create_subcommand(sub, info)),
                    [_, group, sub] => {
                        let subcommand = create_subcommand(sub, info);
                        match groups.iter().position(|(name, _)| name == group) {
                            Some(index) => {
                                let (name, option) = groups.remove(index);
                                groups.insert(index, (name, option.add_sub_option(subcommand)));
                            }
                            None => groups.push((
                                *group,
                                CreateCommandOption::new(
                                    CommandOptionType::SubCommandGroup,
                                    *group,
                                    format!("{} {}", root, group),
                                )
                                .add_sub_option(subcommand),
                            )),
                        }
                    }
                    _ => {}
                }
            }
            for (_, group) in groups {
                command = command.add_option(group);
            }
            command
        })
        .collect()
}

/// Names of the permissions in `required` that `held` lacks. Administrators lack nothing.
pub fn missing_permissions(required: Permissions, held: Permissions) -> Vec<String> {
    if held.contains(Permissions::ADMINISTRATOR) {
        return Vec::new();
    }
    required
        .difference(held)
        .get_permission_names()
        .into_iter()
        .map(String::from)
        .collect()
}

fn check_access(state: &BotState, invocation: &Invocation<'_>) -> Result<(), BotError> {
    let info = invocation.info;
    if info.guild_only && invocation.guild_id.is_none() {
        return Err(BotError::GuildOnly);
    }
    if info.developer_only && !state.config.is_developer(invocation.author.id.get()) {
        return Err(BotError::NotDeveloper);
    }
    if invocation.guild_id.is_some() {
        let missing = missing_permissions(info.permissions, invocation.permissions);
        if !missing.is_empty() {
            return Err(BotError::MissingPermissions(missing));
        }
        let missing = missing_permissions(info.bot_permissions, invocation.bot_permissions);
        if !missing.is_empty() {
            return Err(BotError::BotMissingPermissions(missing));
        }
    }
    Ok(())
}

async fn check_cooldown(state: &BotState, invocation: &Invocation<'_>) -> Result<(), BotError> {
    let guild_id = invocation.guild_id.map(|id| id.get());
    let cooldown = effective_cooldown(&state.db, guild_id, invocation.info.name, invocation.info.cooldown).await?;
    let key = CooldownKey::new(guild_id, invocation.info.name, invocation.author.id.get());
    state
        .cooldowns
        .hit(key, cooldown, Instant::now())
        .map_err(BotError::OnCooldown)
}

async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    match invocation.info.root() {
        "afk" => afk::run(ctx, state, invocation).await,
        "ping" | "sync" => basic::run(ctx, state, invocation).await,
        "prefix" | "settings" => setup::run(ctx, state, invocation).await,
        "warn" | "mute" | "unmute" | "kick" | "ban" | "unban" => moderation::run(ctx, state, invocation).await,
        "case" => cases::run(ctx, state, invocation).await,
        "balance" | "work" | "crime" | "daily" | "luck" | "slots" | "pay" | "deposit" | "withdraw" | "addmoney"
        | "removemoney" | "leaderboard" => economy::run(ctx, state, invocation).await,
        "shop" => shop::run(ctx, state, invocation).await,
        "giveaway" => giveaway::run(ctx, state, invocation).await,
        "log" => logging::run(ctx, state, invocation).await,
        "welcome" | "goodbye" => greet::run(ctx, state, invocation).await,
        "globalban" => global_ban::run(ctx, state, invocation).await,
        "snapshot" => snapshot::run(ctx, state, invocation).await,
        "beta" => beta::run(ctx, state, invocation).await,
        "cooldown" => cooldown::run(ctx, state, invocation).await,
        "info" => info::run(ctx, state, invocation).await,
        _ => Err(BotError::NotFound(format!("Command `{}`", invocation.info.name))),
    }
}

const REPORT_LIMIT: usize = 1700;

/// Logs an internal failure and forwards it to the developers' webhook, if one is configured.
async fn report(ctx: &Context, state: &BotState, report_id: u64, command: &str, location: String, err: &BotError) {
    tracing::error!(report_id, command, location = %location, "command failed: {:?}", err);

    let Some(url) = &state.config.error_webhook else {
        return;
    };
    let detail: String = format!("{:?}", err).chars().take(REPORT_LIMIT).collect();
    let content = format!(
        "**ID:** {}\n**Where:** {}\n**Command:** {}\n```{}```",
        report_id, location, command, detail
    );
    let sent = match Webhook::from_url(&ctx.http, url).await {
        Ok(webhook) => webhook
            .execute(&ctx.http, false, ExecuteWebhook::new().content(content))
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };
    if let Err(err) = sent {
        tracing::warn!(report_id, "failed to send error report: {}", err);
    }
}

async fn failure_reply(ctx: &Context, state: &BotState, invocation: &Invocation<'_>, err: BotError) -> Reply {
    let report_id = invocation.report_id();
    if err.is_internal() {
        let location = format!(
            "guild {} / user {} ({})",
            invocation.guild_id.map_or(0, |id| id.get()),
            invocation.author.name,
            invocation.author.id
        );
        report(ctx, state, report_id, invocation.info.name, location, &err).await;
    }

    let mut text = err.user_message(report_id);
    if matches!(err, BotError::MissingArgument(_) | BotError::BadArgument(_)) {
        if matches!(invocation.source, Source::Text(_)) {
            let prefix = invocation
                .settings
                .as_ref()
                .map_or(guild::DEFAULT_PREFIX, |settings| settings.prefix.as_str());
            text.push_str(&format!("\nUsage: `{}`", invocation.info.usage(prefix)));
        }
    }
    Reply::text(text)
}

async fn execute(ctx: &Context, state: &BotState, invocation: Invocation<'_>) {
    let result = match check_access(state, &invocation) {
        Ok(()) => match check_cooldown(state, &invocation).await {
            Ok(()) => run(ctx, state, &invocation).await,
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(err) => failure_reply(ctx, state, &invocation, err).await,
    };
    if let Err(err) = invocation.respond(&ctx.http, reply).await {
        tracing::warn!(command = invocation.info.name, "failed to send reply: {}", err);
    }
}

async fn settings_for(state: &BotState, guild_id: Option<serenity::all::GuildId>) -> Result<Option<guild::Model>, BotError> {
    match guild_id {
        Some(guild_id) => Ok(Some(guild::ensure(&state.db, guild_id.get() as i64).await?)),
        None => Ok(None),
    }
}

pub async fn handle_interaction(ctx: &Context, state: &BotState, interaction: &CommandInteraction) {
    let (path, options) = invocation::flatten_options(interaction.data.options());
    let name = std::iter::once(interaction.data.name.as_str())
        .chain(path)
        .collect::<Vec<_>>()
        .join(" ");

    let Some(info) = find(&name) else {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new().content("Unknown command").ephemeral(true),
        );
        if let Err(err) = interaction.create_response(&ctx.http, response).await {
            tracing::warn!("failed to answer unknown command {}: {}", name, err);
        }
        return;
    };

    if let Err(err) = interaction.defer(&ctx.http).await {
        tracing::warn!(command = info.name, "failed to defer interaction: {}", err);
        return;
    }

    let prepared = match settings_for(state, interaction.guild_id).await {
        Ok(settings) => Invocation::from_slash(interaction, info, &options, settings),
        Err(err) => Err(err),
    };
    match prepared {
        Ok(invocation) => execute(ctx, state, invocation).await,
        Err(err) => {
            if err.is_internal() {
                let location = format!("guild {:?} / user {}", interaction.guild_id, interaction.user.id);
                report(ctx, state, interaction.id.get(), info.name, location, &err).await;
            }
            let response = EditInteractionResponse::new().content(err.user_message(interaction.id.get()));
            if let Err(err) = interaction.edit_response(&ctx.http, response).await {
                tracing::warn!(command = info.name, "failed to send reply: {}", err);
            }
        }
    }
}

/// Runs a prefixed command if the message holds one. Returns whether it did.
pub async fn handle_message(ctx: &Context, state: &BotState, message: &Message, settings: Option<guild::Model>) -> bool {
    let bot_id = ctx.cache.current_user().id;
    let Some(body) = invocation::strip_prefix(&message.content, settings.as_ref(), message.guild_id.is_some(), bot_id)
    else {
        return false;
    };
    let Some((info, input)) = resolve_text(body) else {
        return false;
    };

    match Invocation::from_text(ctx, message, info, input, settings.clone()).await {
        Ok(invocation) => {
            if let Err(err) = invocation.acknowledge(&ctx.http).await {
                tracing::debug!(command = info.name, "failed to acknowledge: {}", err);
            }
            execute(ctx, state, invocation).await;
        }
        Err(err) => {
            let mut text = err.user_message(message.id.get());
            if err.is_internal() {
                let location = format!("guild {:?} / user {}", message.guild_id, message.author.id);
                report(ctx, state, message.id.get(), info.name, location, &err).await;
            } else {
                let prefix = settings
                    .as_ref()
                    .map_or(guild::DEFAULT_PREFIX, |settings| settings.prefix.as_str());
                text.push_str(&format!("\nUsage: `{}`", info.usage(prefix)));
            }
            if let Err(err) = message.reply(&ctx.http, text).await {
                tracing::warn!(command = info.name, "failed to send reply: {}", err);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn names_are_unique_and_lowercase() {
        let mut seen = HashSet::new();
        for info in all() {
            assert!(seen.insert(info.name), "duplicate command {}", info.name);
            assert_eq!(info.name, info.name.to_lowercase());
            assert!(info.name.split(' ').count() <= 3);
            assert!(!info.description.is_empty() && info.description.len() <= 100, "{}", info.name);
            for alias in info.aliases {
                assert!(seen.insert(*alias), "alias {} clashes", alias);
            }
        }
    }

    #[test]
    fn parameters_are_well_formed() {
        for info in all() {
            let mut optional_seen = false;
            for (index, param) in info.params.iter().enumerate() {
                assert!(!(param.required && optional_seen), "{}: required after optional", info.name);
                optional_seen |= !param.required;
                if param.rest {
                    assert_eq!(index, info.params.len() - 1, "{}: rest must be last", info.name);
                    assert_eq!(param.kind, ParamKind::String);
                }
                assert!(param.description.len() <= 100);
            }
        }
    }

    #[test]
    fn a_root_is_either_a_command_or_a_group() {
        let singles: HashSet<&str> = all().filter(|info| !info.name.contains(' ')).map(|info| info.name).collect();
        for info in all().filter(|info| info.name.contains(' ')) {
            assert!(!singles.contains(info.root()), "{} clashes with a plain command", info.name);
        }
    }

    #[test]
    fn one_slash_command_per_root() {
        let roots: HashSet<&str> = all().map(|info| info.root()).collect();
        assert_eq!(application_commands().len(), roots.len());
    }

    #[test]
    fn text_resolution_prefers_longest_name() {
        let (info, rest) = resolve_text("case info 12").expect("case info exists");
        assert_eq!(info.name, "case info");
        assert_eq!(rest.trim(), "12");

        let (info, rest) = resolve_text("log module add all").expect("log module add exists");
        assert_eq!(info.name, "log module add");
        assert_eq!(rest.trim(), "all");

        let (info, _) = resolve_text("BAL").expect("alias resolves");
        assert_eq!(info.name, "balance");

        assert!(resolve_text("definitely not a command").is_none());
        assert!(resolve_text("").is_none());
    }

    #[test]
    fn administrator_implies_everything() {
        let required = Permissions::BAN_MEMBERS | Permissions::KICK_MEMBERS;
        assert!(missing_permissions(required, Permissions::ADMINISTRATOR).is_empty());
        assert_eq!(missing_permissions(required, Permissions::KICK_MEMBERS), vec!["Ban Members".to_string()]);
        assert!(missing_permissions(Permissions::empty(), Permissions::empty()).is_empty());
    }

    #[test]
    fn usage_marks_optional_and_rest_params() {
        let info = find("warn").expect("warn exists");
        assert_eq!(info.usage("?!"), "?!warn <user> [duration] [reason...]");
    }
}
