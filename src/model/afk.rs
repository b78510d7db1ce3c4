use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "afk")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub user_id: i64,
    pub message: String,
    /// Whether the member is currently away.
    pub state: bool,
    pub previous_nick: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn find_away<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .filter(Column::State.eq(true))
        .one(db)
        .await
}
