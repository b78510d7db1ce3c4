use sea_orm::entity::prelude::*;
use sea_orm::{QueryOrder, QuerySelect};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum CaseKind {
    #[sea_orm(num_value = 1)]
    Warn,
    #[sea_orm(num_value = 2)]
    Mute,
    #[sea_orm(num_value = 3)]
    Kick,
    #[sea_orm(num_value = 4)]
    Ban,
}

impl CaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            CaseKind::Warn => "Warn",
            CaseKind::Mute => "Mute",
            CaseKind::Kick => "Kick",
            CaseKind::Ban => "Ban",
        }
    }

    /// Whether the action stays in effect until something reverses it.
    pub fn is_reversible(&self) -> bool {
        matches!(self, CaseKind::Mute | CaseKind::Ban)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(column_name = "type")]
    pub kind: CaseKind,
    pub guild_id: i64,
    /// Sequential per guild, starting at 1.
    pub case_id: i64,
    pub user_id: i64,
    pub moderator_id: i64,
    pub reason: Option<String>,
    pub expires: Option<DateTimeUtc>,
    /// Content of the message the moderator replied to, if any.
    pub message: Option<String>,
    pub created: DateTimeUtc,
    pub resolved: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A case is active while its action has neither expired nor been reversed.
    pub fn is_active(&self, now: DateTimeUtc) -> bool {
        !self.resolved && self.expires.map_or(true, |expires| expires > now)
    }
}

pub async fn next_case_id<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<i64, DbErr> {
    let current: Option<Option<i64>> = Entity::find()
        .select_only()
        .column_as(Column::CaseId.max(), "max_case_id")
        .filter(Column::GuildId.eq(guild_id))
        .into_tuple()
        .one(db)
        .await?;
    Ok(current.flatten().unwrap_or(0) + 1)
}

pub async fn find<C: ConnectionTrait>(db: &C, guild_id: i64, case_id: i64) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::CaseId.eq(case_id))
        .one(db)
        .await
}

/// Latest cases against a user in a guild, newest first.
pub async fn for_user<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    limit: u64,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .order_by_desc(Column::CaseId)
        .limit(limit)
        .all(db)
        .await
}

/// Unresolved cases of one kind against a user, e.g. every open ban when unbanning.
pub async fn open_for_user<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    kind: CaseKind,
) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .filter(Column::Kind.eq(kind))
        .filter(Column::Resolved.eq(false))
        .all(db)
        .await
}

/// Unresolved cases whose expiry has passed.
pub async fn due<C: ConnectionTrait>(db: &C, now: DateTimeUtc) -> Result<Vec<Model>, DbErr> {
    Entity::find()
        .filter(Column::Resolved.eq(false))
        .filter(Column::Expires.is_not_null())
        .filter(Column::Expires.lte(now))
        .order_by_asc(Column::Expires)
        .all(db)
        .await
}
