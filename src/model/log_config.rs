use sea_orm::entity::prelude::*;

use super::NameList;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub guild_id: i64,
    pub webhook: String,
    pub channel: i64,
    pub is_on: bool,
    pub modules: NameList,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Option<Model>, DbErr> {
    Entity::find().filter(Column::GuildId.eq(guild_id)).one(db).await
}
