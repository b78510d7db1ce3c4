//! Database entities. Every table is keyed by guild and/or user snowflakes stored
//! as `BIGINT`; there are no foreign keys between tables.

pub mod afk;
pub mod case;
pub mod closed_beta;
pub mod cooldown;
pub mod economy;
pub mod giveaway;
pub mod global_ban;
pub mod global_ban_exemption;
pub mod greeting;
pub mod guild;
pub mod log_config;
pub mod message_count;
pub mod shop_item;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use sea_orm::{DbErr, FromJsonQueryResult, SqlErr};

/// A list of snowflakes stored in a json column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct IdList(pub Vec<i64>);

/// A list of names stored in a json column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct NameList(pub Vec<String>);

/// Whether an insert or update lost a race against a `UNIQUE` constraint.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Fresh in-memory SQLite database with every table created from the entities.
#[cfg(test)]
pub async fn test_db() -> Result<sea_orm::DatabaseConnection, sea_orm::DbErr> {
    use sea_orm::{ConnectionTrait, Database, EntityTrait, Schema};

    async fn create<E: EntityTrait>(db: &sea_orm::DatabaseConnection, entity: E) -> Result<(), sea_orm::DbErr> {
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        db.execute(backend.build(&schema.create_table_from_entity(entity))).await?;
        Ok(())
    }

    let db = Database::connect("sqlite::memory:").await?;
    create(&db, afk::Entity).await?;
    create(&db, case::Entity).await?;
    create(&db, closed_beta::Entity).await?;
    create(&db, cooldown::Entity).await?;
    create(&db, economy::Entity).await?;
    create(&db, giveaway::Entity).await?;
    create(&db, global_ban::Entity).await?;
    create(&db, global_ban_exemption::Entity).await?;
    create(&db, greeting::join::Entity).await?;
    create(&db, greeting::leave::Entity).await?;
    create(&db, guild::Entity).await?;
    create(&db, log_config::Entity).await?;
    create(&db, message_count::Entity).await?;
    create(&db, shop_item::Entity).await?;
    create(&db, snapshot::Entity).await?;

    // constraints the migration declares that the entities cannot express
    db.execute_unprepared("CREATE UNIQUE INDEX cases_guild_case ON cases (guild_id, case_id)")
        .await?;
    db.execute_unprepared("CREATE UNIQUE INDEX economy_guild_user ON economy (guild_id, user_id)")
        .await?;
    Ok(db)
}
