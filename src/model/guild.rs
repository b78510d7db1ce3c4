use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

pub const DEFAULT_PREFIX: &str = "?!";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "guilds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub guild_id: i64,
    pub prefix: String,
    pub mention: bool,
    pub color: Option<i32>,
    pub global_bans: bool,
    pub log_channel: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn defaults(guild_id: i64) -> Model {
        Model {
            guild_id,
            prefix: DEFAULT_PREFIX.to_string(),
            mention: true,
            color: None,
            global_bans: false,
            log_channel: None,
        }
    }
}

/// Returns the settings row for a guild, creating it with defaults on first contact.
pub async fn ensure<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Model, DbErr> {
    if let Some(existing) = Entity::find_by_id(guild_id).one(db).await? {
        return Ok(existing);
    }

    let defaults = Model::defaults(guild_id);
    ActiveModel {
        guild_id: Set(defaults.guild_id),
        prefix: Set(defaults.prefix.clone()),
        mention: Set(defaults.mention),
        color: Set(defaults.color),
        global_bans: Set(defaults.global_bans),
        log_channel: Set(defaults.log_channel),
    }
    .insert(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[tokio::test]
    async fn ensure_creates_once() -> Result<(), DbErr> {
        let db = test_db().await?;

        let created = ensure(&db, 7).await?;
        assert_eq!(created.prefix, DEFAULT_PREFIX);
        assert!(created.mention);

        let mut changed: ActiveModel = created.into();
        changed.prefix = Set("!".to_string());
        changed.update(&db).await?;

        let again = ensure(&db, 7).await?;
        assert_eq!(again.prefix, "!");
        assert_eq!(Entity::find().count(&db).await?, 1);
        Ok(())
    }
}
