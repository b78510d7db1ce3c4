//! Server snapshots: a JSON copy of a guild's roles and channels that can be
//! restored later. Restoring wipes the guild first.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use serenity::all::{
    ChannelId, ChannelType, Colour, CreateChannel, EditRole, Guild, GuildChannel, GuildId, Http,
    PermissionOverwrite, PermissionOverwriteType, Permissions, Role, RoleId,
};
use uuid::Uuid;

use crate::error::BotError;
use crate::model::snapshot;

/// Pause between API calls while tearing down and rebuilding a guild.
const API_PAUSE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub id: u64,
    pub name: String,
    pub permissions: u64,
    pub colour: u32,
    pub hoist: bool,
    pub mentionable: bool,
    pub managed: bool,
    pub position: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotChannelKind {
    Category,
    Text,
    News,
    Voice,
    Stage,
    Forum,
}

impl SnapshotChannelKind {
    fn from_channel_type(kind: ChannelType) -> Option<Self> {
        match kind {
            ChannelType::Category => Some(Self::Category),
            ChannelType::Text => Some(Self::Text),
            ChannelType::News => Some(Self::News),
            ChannelType::Voice => Some(Self::Voice),
            ChannelType::Stage => Some(Self::Stage),
            ChannelType::Forum => Some(Self::Forum),
            _ => None,
        }
    }

    fn channel_type(self) -> ChannelType {
        match self {
            Self::Category => ChannelType::Category,
            Self::Text => ChannelType::Text,
            Self::News => ChannelType::News,
            Self::Voice => ChannelType::Voice,
            Self::Stage => ChannelType::Stage,
            Self::Forum => ChannelType::Forum,
        }
    }
}

/// A role permission overwrite, keyed by role name since role ids change on restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteSnapshot {
    pub role: String,
    pub allow: u64,
    pub deny: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub id: u64,
    pub name: String,
    pub kind: SnapshotChannelKind,
    pub position: u16,
    /// Name of the parent category.
    pub category: Option<String>,
    pub topic: Option<String>,
    pub nsfw: bool,
    pub slowmode: Option<u16>,
    pub bitrate: Option<u32>,
    pub user_limit: Option<u32>,
    pub overwrites: Vec<OverwriteSnapshot>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub roles: Vec<RoleSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
}

fn role_snapshot(role: &Role) -> RoleSnapshot {
    RoleSnapshot {
        id: role.id.get(),
        name: role.name.clone(),
        permissions: role.permissions.bits(),
        colour: role.colour.0,
        hoist: role.hoist,
        mentionable: role.mentionable,
        managed: role.managed,
        position: role.position,
    }
}

fn channel_snapshot(
    channel: &GuildChannel,
    channels: &HashMap<ChannelId, GuildChannel>,
    roles: &HashMap<RoleId, Role>,
) -> Option<ChannelSnapshot> {
    let kind = SnapshotChannelKind::from_channel_type(channel.kind)?;
    let overwrites = channel
        .permission_overwrites
        .iter()
        .filter_map(|overwrite| match overwrite.kind {
            PermissionOverwriteType::Role(role_id) => roles.get(&role_id).map(|role| OverwriteSnapshot {
                role: role.name.clone(),
                allow: overwrite.allow.bits(),
                deny: overwrite.deny.bits(),
            }),
            _ => None,
        })
        .collect();

    Some(ChannelSnapshot {
        id: channel.id.get(),
        name: channel.name.clone(),
        kind,
        position: channel.position,
        category: channel
            .parent_id
            .and_then(|parent| channels.get(&parent))
            .map(|parent| parent.name.clone()),
        topic: channel.topic.clone(),
        nsfw: channel.nsfw,
        slowmode: channel.rate_limit_per_user,
        bitrate: channel.bitrate,
        user_limit: channel.user_limit,
        overwrites,
    })
}

impl Payload {
    pub fn capture(guild: &Guild) -> Payload {
        let mut roles: Vec<RoleSnapshot> = guild.roles.values().map(role_snapshot).collect();
        roles.sort_by(|a, b| b.position.cmp(&a.position).then(a.id.cmp(&b.id)));

        let mut channels: Vec<ChannelSnapshot> = guild
            .channels
            .values()
            .filter_map(|channel| channel_snapshot(channel, &guild.channels, &guild.roles))
            .collect();
        channels.sort_by(|a, b| a.position.cmp(&b.position).then(a.id.cmp(&b.id)));

        Payload { roles, channels }
    }

    /// Roles to recreate, highest first. `@everyone` and integration roles are left alone.
    pub fn roles_to_restore(&self) -> Vec<&RoleSnapshot> {
        let mut roles: Vec<&RoleSnapshot> = self
            .roles
            .iter()
            .filter(|role| role.name != "@everyone" && !role.managed)
            .collect();
        roles.sort_by(|a, b| b.position.cmp(&a.position));
        roles
    }

    /// Categories first so that channels can be placed inside them.
    pub fn channels_to_restore(&self) -> Vec<&ChannelSnapshot> {
        let mut channels: Vec<&ChannelSnapshot> = self.channels.iter().collect();
        channels.sort_by_key(|channel| (channel.kind != SnapshotChannelKind::Category, channel.position));
        channels
    }
}

/// Stores a snapshot under a fresh code.
pub async fn save<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    name: &str,
    author_id: i64,
    payload: &Payload,
) -> Result<snapshot::Model, BotError> {
    let mut code = Uuid::new_v4().to_string();
    while find(db, &code).await?.is_some() {
        code = Uuid::new_v4().to_string();
    }

    let row = snapshot::ActiveModel {
        guild_id: Set(guild_id),
        name: Set(name.to_string()),
        payload: Set(serde_json::to_value(payload)?),
        author_id: Set(author_id),
        date: Set(Utc::now()),
        code: Set(code),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(row)
}

pub async fn find<C: ConnectionTrait>(db: &C, code: &str) -> Result<Option<snapshot::Model>, DbErr> {
    snapshot::Entity::find()
        .filter(snapshot::Column::Code.eq(code.trim()))
        .one(db)
        .await
}

pub async fn for_guild<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Vec<snapshot::Model>, DbErr> {
    snapshot::Entity::find()
        .filter(snapshot::Column::GuildId.eq(guild_id))
        .order_by_desc(snapshot::Column::Date)
        .all(db)
        .await
}

pub fn payload_of(row: &snapshot::Model) -> Result<Payload, BotError> {
    Ok(serde_json::from_value(row.payload.clone())?)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub roles: usize,
    pub channels: usize,
    pub failures: usize,
}

fn overwrites_for(channel: &ChannelSnapshot, roles: &HashMap<String, RoleId>) -> Vec<PermissionOverwrite> {
    channel
        .overwrites
        .iter()
        .filter_map(|overwrite| {
            roles.get(&overwrite.role).map(|role_id| PermissionOverwrite {
                allow: Permissions::from_bits_truncate(overwrite.allow),
                deny: Permissions::from_bits_truncate(overwrite.deny),
                kind: PermissionOverwriteType::Role(*role_id),
            })
        })
        .collect()
}

fn channel_builder(
    channel: &ChannelSnapshot,
    roles: &HashMap<String, RoleId>,
    categories: &HashMap<String, ChannelId>,
) -> CreateChannel<'static> {
    let mut builder = CreateChannel::new(channel.name.clone())
        .kind(channel.kind.channel_type())
        .position(channel.position)
        .permissions(overwrites_for(channel, roles));

    if channel.kind != SnapshotChannelKind::Category {
        if let Some(parent) = channel.category.as_ref().and_then(|name| categories.get(name)) {
            builder = builder.category(*parent);
        }
    }
    if let Some(topic) = &channel.topic {
        builder = builder.topic(topic.clone());
    }
    if matches!(
        channel.kind,
        SnapshotChannelKind::Text | SnapshotChannelKind::News | SnapshotChannelKind::Forum
    ) {
        builder = builder.nsfw(channel.nsfw);
        if let Some(slowmode) = channel.slowmode {
            builder = builder.rate_limit_per_user(slowmode);
        }
    }
    if channel.kind == SnapshotChannelKind::Voice {
        if let Some(bitrate) = channel.bitrate {
            builder = builder.bitrate(bitrate);
        }
        if let Some(user_limit) = channel.user_limit {
            builder = builder.user_limit(user_limit);
        }
    }
    builder
}

/// Deletes every channel and role of `guild`, then rebuilds the snapshot.
/// Individual API failures are logged and skipped.
pub async fn restore(http: &Http, guild: &Guild, payload: &Payload) -> RestoreReport {
    let mut report = RestoreReport::default();
    let guild_id: GuildId = guild.id;

    for channel_id in guild.channels.keys() {
        if let Err(err) = channel_id.delete(http).await {
            tracing::warn!(guild_id = guild_id.get(), "failed to delete channel {}: {}", channel_id, err);
        }
        tokio::time::sleep(API_PAUSE).await;
    }

    for role in guild.roles.values() {
        if role.id.get() == guild_id.get() || role.managed {
            continue;
        }
        if let Err(err) = guild_id.delete_role(http, role.id).await {
            tracing::warn!(guild_id = guild_id.get(), "failed to delete role {}: {}", role.id, err);
        }
        tokio::time::sleep(API_PAUSE).await;
    }

    let mut roles: HashMap<String, RoleId> = HashMap::new();
    roles.insert("@everyone".to_string(), RoleId::new(guild_id.get()));
    for role in payload.roles_to_restore() {
        let builder = EditRole::new()
            .name(role.name.clone())
            .permissions(Permissions::from_bits_truncate(role.permissions))
            .colour(Colour::new(role.colour))
            .hoist(role.hoist)
            .mentionable(role.mentionable);
        match guild_id.create_role(http, builder).await {
            Ok(created) => {
                roles.insert(role.name.clone(), created.id);
                report.roles += 1;
            }
            Err(err) => {
                tracing::warn!(guild_id = guild_id.get(), "failed to create role {}: {}", role.name, err);
                report.failures += 1;
            }
        }
        tokio::time::sleep(API_PAUSE).await;
    }

    let mut categories: HashMap<String, ChannelId> = HashMap::new();
    for channel in payload.channels_to_restore() {
        match guild_id.create_channel(http, channel_builder(channel, &roles, &categories)).await {
            Ok(created) => {
                if channel.kind == SnapshotChannelKind::Category {
                    categories.insert(channel.name.clone(), created.id);
                }
                report.channels += 1;
            }
            Err(err) => {
                tracing::warn!(guild_id = guild_id.get(), "failed to create channel {}: {}", channel.name, err);
                report.failures += 1;
            }
        }
        tokio::time::sleep(API_PAUSE).await;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    fn role(id: u64, name: &str, position: u16, managed: bool) -> RoleSnapshot {
        RoleSnapshot {
            id,
            name: name.to_string(),
            permissions: 0,
            colour: 0,
            hoist: false,
            mentionable: false,
            managed,
            position,
        }
    }

    fn channel(id: u64, name: &str, kind: SnapshotChannelKind, position: u16) -> ChannelSnapshot {
        ChannelSnapshot {
            id,
            name: name.to_string(),
            kind,
            position,
            category: None,
            topic: None,
            nsfw: false,
            slowmode: None,
            bitrate: None,
            user_limit: None,
            overwrites: Vec::new(),
        }
    }

    fn sample() -> Payload {
        Payload {
            roles: vec![
                role(1, "@everyone", 0, false),
                role(2, "Member", 1, false),
                role(3, "Music Bot", 4, true),
                role(4, "Admin", 5, false),
            ],
            channels: vec![
                channel(10, "general", SnapshotChannelKind::Text, 0),
                channel(11, "Voice", SnapshotChannelKind::Category, 1),
                channel(12, "lounge", SnapshotChannelKind::Voice, 0),
                channel(13, "Text", SnapshotChannelKind::Category, 0),
            ],
        }
    }

    #[test]
    fn roles_restore_highest_first_without_everyone_or_managed() {
        let payload = sample();
        let names: Vec<&str> = payload.roles_to_restore().iter().map(|role| role.name.as_str()).collect();
        assert_eq!(names, vec!["Admin", "Member"]);
    }

    #[test]
    fn categories_restore_before_channels() {
        let payload = sample();
        let names: Vec<&str> = payload.channels_to_restore().iter().map(|channel| channel.name.as_str()).collect();
        assert_eq!(names, vec!["Text", "Voice", "general", "lounge"]);
    }

    #[test]
    fn overwrites_follow_role_names() {
        let mut text = channel(10, "staff", SnapshotChannelKind::Text, 0);
        text.overwrites = vec![
            OverwriteSnapshot { role: "Admin".into(), allow: Permissions::VIEW_CHANNEL.bits(), deny: 0 },
            OverwriteSnapshot { role: "Gone".into(), allow: 0, deny: 0 },
        ];
        let roles = HashMap::from([("Admin".to_string(), RoleId::new(77))]);

        let overwrites = overwrites_for(&text, &roles);
        assert_eq!(overwrites.len(), 1);
        assert_eq!(overwrites[0].kind, PermissionOverwriteType::Role(RoleId::new(77)));
        assert_eq!(overwrites[0].allow, Permissions::VIEW_CHANNEL);
    }

    #[tokio::test]
    async fn saved_snapshots_load_back() -> Result<(), BotError> {
        let db = test_db().await?;
        let payload = sample();
        let first = save(&db, 1, "Server snapshot", 5, &payload).await?;
        let second = save(&db, 1, "Server snapshot", 5, &payload).await?;
        assert_ne!(first.code, second.code);

        let found = find(&db, &format!(" {} ", first.code)).await?.expect("snapshot exists");
        assert_eq!(payload_of(&found)?, payload);
        assert_eq!(for_guild(&db, 1).await?.len(), 2);
        assert!(find(&db, "missing").await?.is_none());
        Ok(())
    }
}
