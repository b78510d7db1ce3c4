use sea_orm::entity::prelude::*;

use super::IdList;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "giveaway")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: i64,
    pub host_id: i64,
    pub prize: String,
    pub winners: i32,
    pub ends_at: DateTimeUtc,
    pub ended: bool,
    /// Filled in when the giveaway is drawn.
    pub winner_ids: IdList,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
