use sea_orm::entity::prelude::*;

/// A guild's override of a command's cooldown.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cooldowns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub command: String,
    /// Deciseconds.
    pub cooldown: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find<C: ConnectionTrait>(db: &C, guild_id: i64, command: &str) -> Result<Option<Model>, DbErr> {
    Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::Command.eq(command))
        .one(db)
        .await
}
