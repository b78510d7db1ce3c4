//! One command call, whether it came from a slash interaction or a prefixed
//! message. Handlers only see `Invocation` and never care which it was.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serenity::all::{
    ChannelId, Colour, CommandInteraction, Context, CreateAllowedMentions, CreateEmbed, CreateMessage,
    EditInteractionResponse, GuildId, Http, Member, Message, Permissions, ResolvedOption, ResolvedValue, RoleId,
    User, UserId,
};

use super::{CommandInfo, Param, ParamKind};
use crate::duration::parse_duration;
use crate::error::BotError;
use crate::model::guild::{self, DEFAULT_PREFIX};

static USER_MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<@!?(\d+)>$").expect("user mention pattern is valid"));
static CHANNEL_MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<#(\d+)>$").expect("channel mention pattern is valid"));
static ROLE_MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<@&(\d+)>$").expect("role mention pattern is valid"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    User(UserId),
    Integer(i64),
    Boolean(bool),
    Channel(ChannelId),
    Role(RoleId),
    String(String),
    Duration(Duration),
}

/// Parsed arguments by parameter name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args(HashMap<&'static str, Arg>);

macro_rules! arg_accessors {
    ($get:ident, $require:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, name: &str) -> Option<$ty> {
            match self.0.get(name) {
                Some(Arg::$variant(value)) => Some(value.clone()),
                _ => None,
            }
        }

        pub fn $require(&self, name: &str) -> Result<$ty, BotError> {
            self.$get(name).ok_or_else(|| BotError::MissingArgument(name.to_string()))
        }
    };
}

impl Args {
    pub fn insert(&mut self, name: &'static str, arg: Arg) {
        self.0.insert(name, arg);
    }

    arg_accessors!(user, require_user, User, UserId);
    arg_accessors!(integer, require_integer, Integer, i64);
    arg_accessors!(boolean, require_boolean, Boolean, bool);
    arg_accessors!(channel, require_channel, Channel, ChannelId);
    arg_accessors!(role, require_role, Role, RoleId);
    arg_accessors!(string, require_string, String, String);
    arg_accessors!(duration, require_duration, Duration, Duration);
}

fn snowflake(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

fn mention_or_id(pattern: &Regex, token: &str) -> Option<u64> {
    match pattern.captures(token) {
        Some(captures) => snowflake(&captures[1]),
        None => snowflake(token),
    }
}

pub fn parse_boolean(token: &str) -> Option<bool> {
    match token.to_lowercase().as_str() {
        "on" | "true" | "yes" | "y" | "enable" | "enabled" | "1" => Some(true),
        "off" | "false" | "no" | "n" | "disable" | "disabled" | "0" => Some(false),
        _ => None,
    }
}

fn check_choice(param: &Param, value: String) -> Result<Arg, BotError> {
    if param.choices.is_empty() {
        return Ok(Arg::String(value));
    }
    param
        .choices
        .iter()
        .find(|choice| choice.eq_ignore_ascii_case(&value))
        .map(|choice| Arg::String(choice.to_string()))
        .ok_or_else(|| {
            BotError::bad_argument(format!(
                "`{}` must be one of: {}",
                param.name,
                param.choices.join(", ")
            ))
        })
}

/// Interprets one text token as a value of the parameter's kind.
fn parse_token(param: &Param, token: &str) -> Result<Arg, BotError> {
    let invalid = || BotError::bad_argument(format!("`{}` is not a valid {} for `{}`", token, param.kind.label(), param.name));
    match param.kind {
        ParamKind::User => mention_or_id(&USER_MENTION, token).map(|id| Arg::User(UserId::new(id))).ok_or_else(invalid),
        ParamKind::Channel => mention_or_id(&CHANNEL_MENTION, token)
            .map(|id| Arg::Channel(ChannelId::new(id)))
            .ok_or_else(invalid),
        ParamKind::Role => mention_or_id(&ROLE_MENTION, token).map(|id| Arg::Role(RoleId::new(id))).ok_or_else(invalid),
        ParamKind::Integer => token.replace(',', "").parse().map(Arg::Integer).map_err(|_| invalid()),
        ParamKind::Boolean => parse_boolean(token).map(Arg::Boolean).ok_or_else(invalid),
        ParamKind::Duration => parse_duration(token).map(Arg::Duration),
        ParamKind::String => check_choice(param, token.to_string()),
    }
}

/// Splits off the next whitespace separated token. A token may be wrapped in double quotes.
fn split_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    if let Some(quoted) = input.strip_prefix('"') {
        if let Some(end) = quoted.find('"') {
            return Some((&quoted[..end], &quoted[end + 1..]));
        }
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

/// Parses the text after a command name against its parameters.
///
/// An optional parameter that does not fit the next token is skipped without
/// consuming it, so `warn @user spamming` leaves the duration empty and takes
/// `spamming` as the reason.
pub fn parse_text_args(params: &'static [Param], input: &str) -> Result<Args, BotError> {
    let mut args = Args::default();
    let mut remaining = input;

    for param in params {
        if param.rest && param.kind == ParamKind::String {
            let rest = remaining.trim();
            if rest.is_empty() {
                if param.required {
                    return Err(BotError::MissingArgument(param.name.to_string()));
                }
            } else {
                args.insert(param.name, check_choice(param, rest.to_string())?);
                remaining = "";
            }
            continue;
        }

        let Some((token, after)) = split_token(remaining) else {
            if param.required {
                return Err(BotError::MissingArgument(param.name.to_string()));
            }
            continue;
        };

        match parse_token(param, token) {
            Ok(arg) => {
                args.insert(param.name, arg);
                remaining = after;
            }
            Err(err) if param.required => return Err(err),
            Err(_) => {}
        }
    }

    Ok(args)
}

/// Subcommand path and leaf options of a slash interaction.
pub fn flatten_options<'a>(options: Vec<ResolvedOption<'a>>) -> (Vec<&'a str>, Vec<ResolvedOption<'a>>) {
    let mut path = Vec::new();
    let mut current = options;
    loop {
        let is_nested = matches!(
            current.first(),
            Some(ResolvedOption {
                value: ResolvedValue::SubCommand(_) | ResolvedValue::SubCommandGroup(_),
                ..
            })
        );
        if !is_nested {
            return (path, current);
        }
        let nested = current.remove(0);
        path.push(nested.name);
        current = match nested.value {
            ResolvedValue::SubCommand(inner) | ResolvedValue::SubCommandGroup(inner) => inner,
            _ => Vec::new(),
        };
    }
}

fn parse_slash_args(params: &'static [Param], options: &[ResolvedOption<'_>]) -> Result<Args, BotError> {
    let mut args = Args::default();
    for param in params {
        let Some(option) = options.iter().find(|option| option.name == param.name) else {
            if param.required {
                return Err(BotError::MissingArgument(param.name.to_string()));
            }
            continue;
        };
        let arg = match (&param.kind, &option.value) {
            (ParamKind::User, ResolvedValue::User(user, _)) => Arg::User(user.id),
            (ParamKind::Integer, ResolvedValue::Integer(value)) => Arg::Integer(*value),
            (ParamKind::Boolean, ResolvedValue::Boolean(value)) => Arg::Boolean(*value),
            (ParamKind::Channel, ResolvedValue::Channel(channel)) => Arg::Channel(channel.id),
            (ParamKind::Role, ResolvedValue::Role(role)) => Arg::Role(role.id),
            (ParamKind::Duration, ResolvedValue::String(value)) => Arg::Duration(parse_duration(value)?),
            (ParamKind::String, ResolvedValue::String(value)) => check_choice(param, value.to_string())?,
            _ => return Err(BotError::bad_argument(format!("unexpected value for `{}`", param.name))),
        };
        args.insert(param.name, arg);
    }
    Ok(args)
}

/// Strips the guild's prefix (or a bot mention, where allowed) from a message.
pub fn strip_prefix<'a>(content: &'a str, settings: Option<&guild::Model>, in_guild: bool, bot_id: UserId) -> Option<&'a str> {
    let (prefix, mention) = match (in_guild, settings) {
        (false, _) => (DEFAULT_PREFIX, false),
        (true, None) => (DEFAULT_PREFIX, true),
        (true, Some(settings)) => (settings.prefix.as_str(), settings.mention),
    };

    if mention {
        for form in [format!("<@{}>", bot_id), format!("<@!{}>", bot_id)] {
            if let Some(rest) = content.strip_prefix(form.as_str()) {
                return Some(rest.trim_start());
            }
        }
    }
    content.strip_prefix(prefix)
}

pub enum Source<'a> {
    Slash(&'a CommandInteraction),
    Text(&'a Message),
}

/// What a handler sends back.
#[derive(Clone, Debug, Default)]
pub struct Reply {
    pub content: Option<String>,
    pub embeds: Vec<CreateEmbed>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Reply {
        Reply {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    pub fn embed(embed: CreateEmbed) -> Reply {
        Reply {
            content: None,
            embeds: vec![embed],
        }
    }
}

pub struct Invocation<'a> {
    pub source: Source<'a>,
    pub info: &'static CommandInfo,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub author: &'a User,
    pub args: Args,
    /// Present for every guild invocation; the row is created before dispatch.
    pub settings: Option<guild::Model>,
    pub permissions: Permissions,
    pub bot_permissions: Permissions,
}

impl<'a> Invocation<'a> {
    pub fn from_slash(
        interaction: &'a CommandInteraction,
        info: &'static CommandInfo,
        options: &[ResolvedOption<'_>],
        settings: Option<guild::Model>,
    ) -> Result<Invocation<'a>, BotError> {
        Ok(Invocation {
            source: Source::Slash(interaction),
            info,
            guild_id: interaction.guild_id,
            channel_id: interaction.channel_id,
            author: &interaction.user,
            args: parse_slash_args(info.params, options)?,
            settings,
            permissions: interaction
                .member
                .as_ref()
                .and_then(|member| member.permissions)
                .unwrap_or_else(Permissions::empty),
            bot_permissions: interaction.app_permissions.unwrap_or_else(Permissions::empty),
        })
    }

    pub async fn from_text(
        ctx: &Context,
        message: &'a Message,
        info: &'static CommandInfo,
        input: &str,
        settings: Option<guild::Model>,
    ) -> Result<Invocation<'a>, BotError> {
        let args = parse_text_args(info.params, input)?;
        let (permissions, bot_permissions) = match message.guild_id {
            Some(guild_id) => {
                let author = guild_id.member(ctx, message.author.id).await?;
                let bot_id = ctx.cache.current_user().id;
                let bot = guild_id.member(ctx, bot_id).await?;
                (
                    channel_permissions(ctx, guild_id, message.channel_id, &author),
                    channel_permissions(ctx, guild_id, message.channel_id, &bot),
                )
            }
            None => (Permissions::empty(), Permissions::empty()),
        };

        Ok(Invocation {
            source: Source::Text(message),
            info,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            author: &message.author,
            args,
            settings,
            permissions,
            bot_permissions,
        })
    }

    pub fn require_guild(&self) -> Result<GuildId, BotError> {
        self.guild_id.ok_or(BotError::GuildOnly)
    }

    /// Used to correlate a failure report with the message or interaction that caused it.
    pub fn report_id(&self) -> u64 {
        match self.source {
            Source::Slash(interaction) => interaction.id.get(),
            Source::Text(message) => message.id.get(),
        }
    }

    /// The message the author replied to when invoking a text command.
    pub fn replied_to(&self) -> Option<&Message> {
        match self.source {
            Source::Text(message) => message.referenced_message.as_deref(),
            Source::Slash(_) => None,
        }
    }

    pub async fn author_member(&self, ctx: &Context) -> Result<Member, BotError> {
        if let Source::Slash(interaction) = self.source {
            if let Some(member) = &interaction.member {
                return Ok((**member).clone());
            }
        }
        Ok(self.require_guild()?.member(ctx, self.author.id).await?)
    }

    pub fn colour(&self) -> Colour {
        self.settings
            .as_ref()
            .and_then(|settings| settings.color)
            .map(|color| Colour::new(color as u32))
            .unwrap_or(Colour::BLURPLE)
    }

    /// An embed in the guild's colour.
    pub fn embed(&self) -> CreateEmbed {
        CreateEmbed::new().colour(self.colour())
    }

    /// Slash commands are deferred, text commands show typing while they run.
    pub async fn acknowledge(&self, http: &Http) -> Result<(), BotError> {
        match self.source {
            Source::Slash(interaction) => interaction.defer(http).await?,
            Source::Text(message) => message.channel_id.broadcast_typing(http).await?,
        }
        Ok(())
    }

    pub async fn respond(&self, http: &Http, reply: Reply) -> Result<(), BotError> {
        let content = match (&reply.content, reply.embeds.is_empty()) {
            (None, true) => Some("Done.".to_string()),
            (content, _) => content.clone(),
        };
        match self.source {
            Source::Slash(interaction) => {
                let mut response = EditInteractionResponse::new().embeds(reply.embeds);
                if let Some(content) = content {
                    response = response.content(content);
                }
                interaction.edit_response(http, response).await?;
            }
            Source::Text(message) => {
                let mut builder = CreateMessage::new()
                    .embeds(reply.embeds)
                    .reference_message(message)
                    .allowed_mentions(CreateAllowedMentions::new().all_users(true).replied_user(false));
                if let Some(content) = content {
                    builder = builder.content(content);
                }
                message.channel_id.send_message(http, builder).await?;
            }
        }
        Ok(())
    }
}

/// Effective permissions of a member in a channel, from the cache. Threads use their parent.
pub fn channel_permissions(ctx: &Context, guild_id: GuildId, channel_id: ChannelId, member: &Member) -> Permissions {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Permissions::empty();
    };
    let channel = guild.channels.get(&channel_id).or_else(|| {
        guild
            .threads
            .iter()
            .find(|thread| thread.id == channel_id)
            .and_then(|thread| thread.parent_id)
            .and_then(|parent| guild.channels.get(&parent))
    });
    match channel {
        Some(channel) => guild.user_permissions_in(channel, member),
        None => Permissions::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WARN_PARAMS: [Param; 3] = [
        Param::required("user", ParamKind::User, "Member to warn"),
        Param::optional("duration", ParamKind::Duration, "How long the warning lasts"),
        Param::optional("reason", ParamKind::String, "Why").rest(),
    ];

    static PAY_PARAMS: [Param; 2] = [
        Param::required("member", ParamKind::User, "Who to pay"),
        Param::required("amount", ParamKind::Integer, "How much"),
    ];

    static MODULE_PARAMS: [Param; 1] =
        [Param::required("module", ParamKind::String, "Module").choices(&["message_delete", "all"])];

    fn settings(prefix: &str, mention: bool) -> guild::Model {
        guild::Model {
            prefix: prefix.to_string(),
            mention,
            ..guild::Model::defaults(1)
        }
    }

    #[test]
    fn prefix_resolution() {
        let bot = UserId::new(42);

        assert_eq!(strip_prefix("?!ping", None, false, bot), Some("ping"));
        assert_eq!(strip_prefix("<@42> ping", None, false, bot), None);

        assert_eq!(strip_prefix("?!ping", None, true, bot), Some("ping"));
        assert_eq!(strip_prefix("<@42> ping", None, true, bot), Some("ping"));
        assert_eq!(strip_prefix("<@!42>ping", None, true, bot), Some("ping"));

        let custom = settings("!", false);
        assert_eq!(strip_prefix("!ping", Some(&custom), true, bot), Some("ping"));
        assert_eq!(strip_prefix("?!ping", Some(&custom), true, bot), None);
        assert_eq!(strip_prefix("<@42> ping", Some(&custom), true, bot), None);

        let with_mention = settings("$", true);
        assert_eq!(strip_prefix("<@42> ping", Some(&with_mention), true, bot), Some("ping"));
        assert_eq!(strip_prefix("hello", Some(&with_mention), true, bot), None);
    }

    #[test]
    fn optional_params_are_skipped_when_they_do_not_fit() {
        let args = parse_text_args(&WARN_PARAMS, "<@!123> spamming in general").unwrap();
        assert_eq!(args.user("user"), Some(UserId::new(123)));
        assert_eq!(args.duration("duration"), None);
        assert_eq!(args.string("reason").as_deref(), Some("spamming in general"));

        let args = parse_text_args(&WARN_PARAMS, "123 1h30m spamming").unwrap();
        assert_eq!(args.duration("duration"), Some(Duration::from_secs(5400)));
        assert_eq!(args.string("reason").as_deref(), Some("spamming"));

        let args = parse_text_args(&WARN_PARAMS, "123").unwrap();
        assert_eq!(args.string("reason"), None);
    }

    #[test]
    fn required_params_report_missing_and_bad_values() {
        assert!(matches!(
            parse_text_args(&PAY_PARAMS, "<@5>"),
            Err(BotError::MissingArgument(name)) if name == "amount"
        ));
        assert!(matches!(parse_text_args(&PAY_PARAMS, "<@5> lots"), Err(BotError::BadArgument(_))));
        assert!(matches!(parse_text_args(&PAY_PARAMS, "nobody 5"), Err(BotError::BadArgument(_))));
        assert!(matches!(parse_text_args(&PAY_PARAMS, "0 5"), Err(BotError::BadArgument(_))));

        let args = parse_text_args(&PAY_PARAMS, "<@5> 1,000").unwrap();
        assert_eq!(args.integer("amount"), Some(1000));
    }

    #[test]
    fn quoted_tokens_and_choices() {
        static NAMED: [Param; 2] = [
            Param::required("name", ParamKind::String, "Name"),
            Param::required("price", ParamKind::Integer, "Price"),
        ];
        let args = parse_text_args(&NAMED, "\"VIP Pass\" 500").unwrap();
        assert_eq!(args.string("name").as_deref(), Some("VIP Pass"));
        assert_eq!(args.integer("price"), Some(500));

        let args = parse_text_args(&MODULE_PARAMS, "ALL").unwrap();
        assert_eq!(args.string("module").as_deref(), Some("all"));
        assert!(parse_text_args(&MODULE_PARAMS, "reactions").is_err());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(parse_boolean("On"), Some(true));
        assert_eq!(parse_boolean("disable"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn require_reports_the_parameter_name() {
        let args = Args::default();
        assert!(matches!(args.require_user("target"), Err(BotError::MissingArgument(name)) if name == "target"));
    }
}
