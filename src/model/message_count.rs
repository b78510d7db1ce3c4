use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

/// How many messages a member has sent in a guild since the bot joined.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub guild_id: i64,
    pub user_id: i64,
    pub count: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub async fn get<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<i64, DbErr> {
    Ok(Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .one(db)
        .await?
        .map_or(0, |row| row.count))
}

pub async fn increment<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<i64, DbErr> {
    let existing = Entity::find()
        .filter(Column::GuildId.eq(guild_id))
        .filter(Column::UserId.eq(user_id))
        .one(db)
        .await?;

    match existing {
        Some(row) => {
            let count = row.count + 1;
            let mut row: ActiveModel = row.into();
            row.count = Set(count);
            row.update(db).await?;
            Ok(count)
        }
        None => {
            ActiveModel {
                guild_id: Set(guild_id),
                user_id: Set(user_id),
                count: Set(1),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[tokio::test]
    async fn counts_per_member() -> Result<(), DbErr> {
        let db = test_db().await?;
        assert_eq!(get(&db, 1, 10).await?, 0);
        increment(&db, 1, 10).await?;
        increment(&db, 1, 10).await?;
        increment(&db, 2, 10).await?;
        assert_eq!(get(&db, 1, 10).await?, 2);
        assert_eq!(get(&db, 2, 10).await?, 1);
        Ok(())
    }
}
