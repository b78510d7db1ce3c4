//! The role shop. Items sell a role for cash; this module owns the rules for
//! listing, delisting and buying them.

use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ConnectionTrait, ModelTrait};

use crate::economy;
use crate::error::BotError;
use crate::model::shop_item;

pub const MAX_ITEMS: usize = 10;
pub const NAME_LIMIT: usize = 50;

#[derive(Clone, Debug)]
pub struct NewItem {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub role_id: i64,
    pub creator_id: i64,
}

/// Lists a new item. Role hierarchy checks happen before this, against Discord.
pub async fn add<C: ConnectionTrait>(db: &C, guild_id: i64, item: NewItem) -> Result<shop_item::Model, BotError> {
    let name = item.name.trim().to_string();
    if name.is_empty() || name.chars().count() > NAME_LIMIT {
        return Err(BotError::bad_argument(format!(
            "Item names must be 1 to {} characters long.",
            NAME_LIMIT
        )));
    }
    if item.price < 0 {
        return Err(BotError::bad_argument("The price cannot be negative."));
    }
    // the @everyone role shares the guild's id
    if item.role_id == guild_id {
        return Err(BotError::bad_argument("@everyone cannot be sold."));
    }

    let items = shop_item::for_guild(db, guild_id).await?;
    if items.len() >= MAX_ITEMS {
        return Err(BotError::refused(format!("The shop can hold at most {} items.", MAX_ITEMS)));
    }
    let wanted = name.to_lowercase();
    if items.iter().any(|existing| existing.item_name.to_lowercase() == wanted) {
        return Err(BotError::refused(format!("There is already an item called `{}`.", name)));
    }

    let row = shop_item::ActiveModel {
        guild_id: Set(guild_id),
        item_name: Set(name),
        item_description: Set(item.description),
        item_price: Set(item.price),
        role: Set(item.role_id),
        creator_id: Set(item.creator_id),
        ..Default::default()
    }
    .insert(db)
    .await?;
    tracing::info!(guild_id, item = %row.item_name, price = row.item_price, "listed shop item");
    Ok(row)
}

pub async fn require<C: ConnectionTrait>(db: &C, guild_id: i64, name: &str) -> Result<shop_item::Model, BotError> {
    shop_item::find_by_name(db, guild_id, name)
        .await?
        .ok_or_else(|| BotError::NotFound(format!("Item `{}`", name.trim())))
}

/// Delists an item and returns it.
pub async fn remove<C: ConnectionTrait>(db: &C, guild_id: i64, name: &str) -> Result<shop_item::Model, BotError> {
    let item = require(db, guild_id, name).await?;
    item.clone().delete(db).await?;
    Ok(item)
}

/// Whether the member may buy `item`. Payment is taken once the role was granted.
pub async fn check_purchase<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    item: &shop_item::Model,
    owns_role: bool,
) -> Result<(), BotError> {
    if owns_role {
        return Err(BotError::refused("You already own that item."));
    }
    let balance = economy::get_balance(db, guild_id, user_id).await?;
    if balance.cash < item.item_price {
        return Err(BotError::refused(format!(
            "**{}** costs **{}** but you only have **{}** cash.",
            item.item_name, item.item_price, balance.cash
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sea_orm::EntityTrait;

    use super::*;
    use crate::economy::Wallet;
    use crate::model::test_db;

    const GUILD: i64 = 1;

    fn item(name: &str, price: i64, role_id: i64) -> NewItem {
        NewItem {
            name: name.to_string(),
            description: "A shiny role".to_string(),
            price,
            role_id,
            creator_id: 7,
        }
    }

    #[tokio::test]
    async fn shop_is_capped() -> Result<(), BotError> {
        let db = test_db().await?;
        for n in 0..MAX_ITEMS as i64 {
            add(&db, GUILD, item(&format!("Item {}", n), 10, 100 + n)).await?;
        }
        let err = add(&db, GUILD, item("One too many", 10, 999)).await.unwrap_err();
        assert!(matches!(err, BotError::Refused(_)));

        // the cap is per guild
        add(&db, 2, item("Item 0", 10, 100)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn names_are_unique_and_matched_case_insensitively() -> Result<(), BotError> {
        let db = test_db().await?;
        add(&db, GUILD, item("  VIP Pass ", 500, 100)).await?;

        let err = add(&db, GUILD, item("vip pass", 10, 101)).await.unwrap_err();
        assert!(matches!(err, BotError::Refused(_)));

        let found = require(&db, GUILD, "Vip PASS").await?;
        assert_eq!(found.item_name, "VIP Pass");
        assert!(matches!(require(&db, GUILD, "Gold").await, Err(BotError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_listings_are_rejected() -> Result<(), BotError> {
        let db = test_db().await?;
        let long_name = "x".repeat(NAME_LIMIT + 1);

        for listing in [item("Cheap", -1, 100), item("   ", 10, 100), item(&long_name, 10, 100), item("Everyone", 10, GUILD)] {
            let err = add(&db, GUILD, listing).await.unwrap_err();
            assert!(matches!(err, BotError::BadArgument(_)), "{:?}", err);
        }
        assert!(shop_item::Entity::find().all(&db).await?.is_empty());

        add(&db, GUILD, item("Free", 0, 100)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn removing_deletes_the_item() -> Result<(), BotError> {
        let db = test_db().await?;
        add(&db, GUILD, item("VIP", 500, 100)).await?;

        let removed = remove(&db, GUILD, "vip").await?;
        assert_eq!(removed.role, 100);
        assert!(shop_item::for_guild(&db, GUILD).await?.is_empty());
        assert!(matches!(remove(&db, GUILD, "vip").await, Err(BotError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn purchases_need_cash_and_a_role_not_yet_owned() -> Result<(), BotError> {
        let db = test_db().await?;
        let vip = add(&db, GUILD, item("VIP", 500, 100)).await?;
        economy::add_money(&db, GUILD, 20, 499, Wallet::Cash).await?;

        let err = check_purchase(&db, GUILD, 20, &vip, false).await.unwrap_err();
        assert!(err.to_string().contains("only have **499** cash"));

        economy::add_money(&db, GUILD, 20, 1, Wallet::Cash).await?;
        check_purchase(&db, GUILD, 20, &vip, false).await?;
        assert!(matches!(check_purchase(&db, GUILD, 20, &vip, true).await, Err(BotError::Refused(_))));

        // bank money does not count
        economy::add_money(&db, GUILD, 21, 1000, Wallet::Bank).await?;
        assert!(check_purchase(&db, GUILD, 21, &vip, false).await.is_err());
        Ok(())
    }
}
