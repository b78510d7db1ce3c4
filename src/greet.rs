//! Welcome and goodbye messages posted when members join or leave.

use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait};

use crate::model::greeting::{join, leave};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Greeting {
    Welcome,
    Goodbye,
}

impl Greeting {
    pub fn label(&self) -> &'static str {
        match self {
            Greeting::Welcome => "welcome",
            Greeting::Goodbye => "goodbye",
        }
    }
}

/// Values substituted into a greeting template.
pub struct Placeholders<'a> {
    pub user_id: u64,
    pub user_name: &'a str,
    pub guild_name: &'a str,
    pub member_count: u64,
}

/// Fills in `{user}` (a mention), `{user.name}`, `{guild}` and `{count}`.
pub fn render(template: &str, values: &Placeholders<'_>) -> String {
    template
        .replace("{user.name}", values.user_name)
        .replace("{user}", &format!("<@{}>", values.user_id))
        .replace("{guild}", values.guild_name)
        .replace("{count}", &values.member_count.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GreetingConfig {
    pub channel_id: i64,
    pub message: String,
}

pub async fn find<C: ConnectionTrait>(db: &C, kind: Greeting, guild_id: i64) -> Result<Option<GreetingConfig>, DbErr> {
    Ok(match kind {
        Greeting::Welcome => join::Entity::find_by_id(guild_id).one(db).await?.map(|row| GreetingConfig {
            channel_id: row.channel_id,
            message: row.message,
        }),
        Greeting::Goodbye => leave::Entity::find_by_id(guild_id).one(db).await?.map(|row| GreetingConfig {
            channel_id: row.channel_id,
            message: row.message,
        }),
    })
}

pub async fn set<C: ConnectionTrait>(
    db: &C,
    kind: Greeting,
    guild_id: i64,
    channel_id: i64,
    message: &str,
) -> Result<(), DbErr> {
    match kind {
        Greeting::Welcome => {
            let row = join::ActiveModel {
                guild_id: Set(guild_id),
                channel_id: Set(channel_id),
                message: Set(message.to_string()),
            };
            if join::Entity::find_by_id(guild_id).one(db).await?.is_some() {
                row.update(db).await?;
            } else {
                row.insert(db).await?;
            }
        }
        Greeting::Goodbye => {
            let row = leave::ActiveModel {
                guild_id: Set(guild_id),
                channel_id: Set(channel_id),
                message: Set(message.to_string()),
            };
            if leave::Entity::find_by_id(guild_id).one(db).await?.is_some() {
                row.update(db).await?;
            } else {
                row.insert(db).await?;
            }
        }
    }
    Ok(())
}

/// Returns false when nothing was configured.
pub async fn clear<C: ConnectionTrait>(db: &C, kind: Greeting, guild_id: i64) -> Result<bool, DbErr> {
    match kind {
        Greeting::Welcome => match join::Entity::find_by_id(guild_id).one(db).await? {
            Some(row) => row.delete(db).await.map(|_| true),
            None => Ok(false),
        },
        Greeting::Goodbye => match leave::Entity::find_by_id(guild_id).one(db).await? {
            Some(row) => row.delete(db).await.map(|_| true),
            None => Ok(false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[test]
    fn renders_every_placeholder() {
        let values = Placeholders {
            user_id: 42,
            user_name: "ferris",
            guild_name: "Rustaceans",
            member_count: 1337,
        };
        assert_eq!(
            render("Welcome {user} ({user.name}) to {guild}! You are member #{count}.", &values),
            "Welcome <@42> (ferris) to Rustaceans! You are member #1337."
        );
        assert_eq!(render("{unknown} stays", &values), "{unknown} stays");
    }

    #[tokio::test]
    async fn welcome_and_goodbye_are_independent() -> Result<(), DbErr> {
        let db = test_db().await?;
        set(&db, Greeting::Welcome, 1, 10, "hi {user}").await?;
        set(&db, Greeting::Welcome, 1, 11, "hello {user}").await?;
        assert_eq!(
            find(&db, Greeting::Welcome, 1).await?,
            Some(GreetingConfig { channel_id: 11, message: "hello {user}".into() })
        );
        assert_eq!(find(&db, Greeting::Goodbye, 1).await?, None);

        assert!(clear(&db, Greeting::Welcome, 1).await?);
        assert!(!clear(&db, Greeting::Welcome, 1).await?);
        Ok(())
    }
}
