use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "shop")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub item_name: String,
    pub item_description: String,
    pub item_price: i64,
    /// Role granted on purchase.
    pub role: i64,
    pub creator_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn for_guild<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Vec<Model>, DbErr> {
    Entity::find().filter(Column::GuildId.eq(guild_id)).all(db).await
}

/// Item names are matched case-insensitively.
pub async fn find_by_name<C: ConnectionTrait>(db: &C, guild_id: i64, name: &str) -> Result<Option<Model>, DbErr> {
    let wanted = name.trim().to_lowercase();
    Ok(for_guild(db, guild_id)
        .await?
        .into_iter()
        .find(|item| item.item_name.to_lowercase() == wanted))
}
