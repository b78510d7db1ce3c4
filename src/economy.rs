//! Per-guild wallets. Every member has cash and a bank balance; a negative
//! bank balance is debt and is repaid before any income reaches the wallet.

use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::error::BotError;
use crate::model::{economy, is_unique_violation};

/// Bound on re-reads when other commands keep changing the same balance.
const UPDATE_ATTEMPTS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wallet {
    Cash,
    Bank,
}

impl Wallet {
    pub fn parse(value: &str) -> Option<Wallet> {
        match value.trim().to_lowercase().as_str() {
            "cash" | "wallet" => Some(Wallet::Cash),
            "bank" => Some(Wallet::Bank),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Balance {
    pub cash: i64,
    pub bank: i64,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.cash.saturating_add(self.bank)
    }

    pub fn in_debt(&self) -> bool {
        self.bank < 0
    }

    /// Income first pays off debt, whatever wallet it was meant for.
    pub fn credit(self, amount: i64, wallet: Wallet) -> Balance {
        let mut next = self;
        let mut remaining = amount;
        if next.bank < 0 {
            let repaid = remaining.min(-next.bank);
            next.bank += repaid;
            remaining -= repaid;
        }
        match wallet {
            Wallet::Cash => next.cash = next.cash.saturating_add(remaining),
            Wallet::Bank => next.bank = next.bank.saturating_add(remaining),
        }
        next
    }

    /// Cash can never go below zero; the bank can.
    pub fn debit(self, amount: i64, wallet: Wallet) -> Option<Balance> {
        let mut next = self;
        match wallet {
            Wallet::Cash => {
                if amount > next.cash {
                    return None;
                }
                next.cash -= amount;
            }
            Wallet::Bank => next.bank = next.bank.saturating_sub(amount),
        }
        Some(next)
    }

    /// Takes what it can from cash and books the rest as bank debt.
    pub fn charge(self, amount: i64) -> Balance {
        let from_cash = amount.min(self.cash.max(0));
        Balance {
            cash: self.cash - from_cash,
            bank: self.bank.saturating_sub(amount - from_cash),
        }
    }
}

impl From<&economy::Model> for Balance {
    fn from(row: &economy::Model) -> Self {
        Balance {
            cash: row.cash,
            bank: row.bank,
        }
    }
}

async fn find<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<Option<economy::Model>, DbErr> {
    economy::Entity::find()
        .filter(economy::Column::GuildId.eq(guild_id))
        .filter(economy::Column::UserId.eq(user_id))
        .one(db)
        .await
}

/// Reads a member's balance, registering them with an empty wallet on first use.
pub async fn get_balance<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64) -> Result<Balance, DbErr> {
    if let Some(row) = find(db, guild_id, user_id).await? {
        return Ok(Balance::from(&row));
    }

    let inserted = economy::ActiveModel {
        guild_id: Set(guild_id),
        user_id: Set(user_id),
        cash: Set(0),
        bank: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await;
    match inserted {
        Ok(row) => Ok(Balance::from(&row)),
        // registered by a concurrent command
        Err(err) if is_unique_violation(&err) => find(db, guild_id, user_id)
            .await?
            .map(|row| Balance::from(&row))
            .ok_or(err),
        Err(err) => Err(err),
    }
}

fn wallet_of(guild_id: i64, user_id: i64) -> Condition {
    Condition::all()
        .add(economy::Column::GuildId.eq(guild_id))
        .add(economy::Column::UserId.eq(user_id))
}

pub async fn set_balance<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    balance: Balance,
) -> Result<Balance, DbErr> {
    get_balance(db, guild_id, user_id).await?;
    economy::Entity::update_many()
        .col_expr(economy::Column::Cash, Expr::value(balance.cash))
        .col_expr(economy::Column::Bank, Expr::value(balance.bank))
        .filter(wallet_of(guild_id, user_id))
        .exec(db)
        .await?;
    Ok(balance)
}

/// Applies `change` to a balance. The write only lands if the row still holds the
/// balance `change` saw; otherwise the balance is re-read and `change` runs again.
async fn modify<C, T, E, F>(db: &C, guild_id: i64, user_id: i64, mut change: F) -> Result<(Balance, T), E>
where
    C: ConnectionTrait,
    E: From<DbErr>,
    F: FnMut(Balance) -> Result<(Balance, T), E>,
{
    for _ in 0..UPDATE_ATTEMPTS {
        let current = get_balance(db, guild_id, user_id).await?;
        let (next, value) = change(current)?;
        let updated = economy::Entity::update_many()
            .col_expr(economy::Column::Cash, Expr::value(next.cash))
            .col_expr(economy::Column::Bank, Expr::value(next.bank))
            .filter(wallet_of(guild_id, user_id))
            .filter(economy::Column::Cash.eq(current.cash))
            .filter(economy::Column::Bank.eq(current.bank))
            .exec(db)
            .await?;
        if updated.rows_affected > 0 {
            return Ok((next, value));
        }
    }
    tracing::warn!(guild_id, user_id, "balance kept changing under concurrent updates");
    Err(DbErr::Custom(format!("balance of {} in {} kept changing", user_id, guild_id)).into())
}

pub async fn add_money<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    amount: i64,
    wallet: Wallet,
) -> Result<Balance, DbErr> {
    let (balance, ()) = modify(db, guild_id, user_id, |current| {
        Ok::<_, DbErr>((current.credit(amount, wallet), ()))
    })
    .await?;
    Ok(balance)
}

pub async fn remove_money<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    amount: i64,
    wallet: Wallet,
) -> Result<Balance, BotError> {
    let (balance, ()) = modify(db, guild_id, user_id, |current| -> Result<(Balance, ()), BotError> {
        let next = current.debit(amount, wallet).ok_or_else(|| {
            BotError::refused(format!("Not enough cash. You have **{}** on hand.", current.cash))
        })?;
        Ok((next, ()))
    })
    .await?;
    Ok(balance)
}

pub async fn charge<C: ConnectionTrait>(db: &C, guild_id: i64, user_id: i64, amount: i64) -> Result<Balance, DbErr> {
    let (balance, ()) = modify(db, guild_id, user_id, |current| Ok::<_, DbErr>((current.charge(amount), ()))).await?;
    Ok(balance)
}

/// Moves cash from one member to another.
pub async fn transfer<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    from: i64,
    to: i64,
    amount: i64,
) -> Result<Balance, BotError> {
    let sender = remove_money(db, guild_id, from, amount, Wallet::Cash).await?;
    add_money(db, guild_id, to, amount, Wallet::Cash).await?;
    Ok(sender)
}

/// Moves cash into the bank. `None` deposits everything on hand.
pub async fn deposit<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    amount: Option<i64>,
) -> Result<(i64, Balance), BotError> {
    let (balance, moved) = modify(db, guild_id, user_id, |current| -> Result<(Balance, i64), BotError> {
        let moved = amount.unwrap_or(current.cash);
        if moved <= 0 {
            return Err(BotError::refused("You have no cash to deposit."));
        }
        let next = current
            .debit(moved, Wallet::Cash)
            .ok_or_else(|| BotError::refused(format!("You only have **{}** cash.", current.cash)))?
            .credit(moved, Wallet::Bank);
        Ok((next, moved))
    })
    .await?;
    Ok((moved, balance))
}

/// Moves money out of the bank. `None` withdraws the whole positive balance.
pub async fn withdraw<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    user_id: i64,
    amount: Option<i64>,
) -> Result<(i64, Balance), BotError> {
    let (balance, moved) = modify(db, guild_id, user_id, |current| -> Result<(Balance, i64), BotError> {
        let moved = amount.unwrap_or(current.bank.max(0));
        if moved <= 0 {
            return Err(BotError::refused("You have nothing in the bank to withdraw."));
        }
        if moved > current.bank {
            return Err(BotError::refused(format!("You only have **{}** in the bank.", current.bank.max(0))));
        }
        let next = Balance {
            cash: current.cash.saturating_add(moved),
            bank: current.bank - moved,
        };
        Ok((next, moved))
    })
    .await?;
    Ok((moved, balance))
}

/// Richest members of a guild by cash plus bank.
pub async fn leaderboard<C: ConnectionTrait>(db: &C, guild_id: i64, limit: u64) -> Result<Vec<economy::Model>, DbErr> {
    economy::Entity::find()
        .filter(economy::Column::GuildId.eq(guild_id))
        .order_by_desc(Expr::col(economy::Column::Cash).add(Expr::col(economy::Column::Bank)))
        .limit(limit)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_db;

    #[test]
    fn income_repays_debt_first() {
        let indebted = Balance { cash: 10, bank: -500 };
        assert_eq!(indebted.credit(200, Wallet::Cash), Balance { cash: 10, bank: -300 });
        assert_eq!(indebted.credit(800, Wallet::Cash), Balance { cash: 310, bank: 0 });
        assert_eq!(indebted.credit(800, Wallet::Bank), Balance { cash: 10, bank: 300 });
    }

    #[test]
    fn cash_cannot_go_negative_but_bank_can() {
        let balance = Balance { cash: 100, bank: 0 };
        assert_eq!(balance.debit(101, Wallet::Cash), None);
        assert_eq!(balance.debit(100, Wallet::Cash), Some(Balance { cash: 0, bank: 0 }));
        assert_eq!(balance.debit(50, Wallet::Bank), Some(Balance { cash: 100, bank: -50 }));
    }

    #[test]
    fn charge_books_shortfall_as_debt() {
        assert_eq!(Balance { cash: 300, bank: 100 }.charge(500), Balance { cash: 0, bank: -100 });
        assert_eq!(Balance { cash: 300, bank: 0 }.charge(200), Balance { cash: 100, bank: 0 });
    }

    #[tokio::test]
    async fn registers_lazily() -> Result<(), DbErr> {
        let db = test_db().await?;
        assert_eq!(get_balance(&db, 1, 2).await?, Balance { cash: 0, bank: 0 });
        assert_eq!(economy::Entity::find().all(&db).await?.len(), 1);
        get_balance(&db, 1, 2).await?;
        assert_eq!(economy::Entity::find().all(&db).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_cash_is_refused() -> Result<(), BotError> {
        let db = test_db().await?;
        add_money(&db, 1, 2, 50, Wallet::Cash).await?;
        let err = remove_money(&db, 1, 2, 80, Wallet::Cash).await.unwrap_err();
        assert!(matches!(err, BotError::Refused(_)));
        assert_eq!(get_balance(&db, 1, 2).await?.cash, 50);
        Ok(())
    }

    #[tokio::test]
    async fn deposit_and_withdraw_move_between_wallets() -> Result<(), BotError> {
        let db = test_db().await?;
        add_money(&db, 1, 2, 1000, Wallet::Cash).await?;

        let (moved, balance) = deposit(&db, 1, 2, Some(400)).await?;
        assert_eq!(moved, 400);
        assert_eq!(balance, Balance { cash: 600, bank: 400 });

        let (moved, balance) = withdraw(&db, 1, 2, None).await?;
        assert_eq!(moved, 400);
        assert_eq!(balance, Balance { cash: 1000, bank: 0 });

        assert!(withdraw(&db, 1, 2, Some(1)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn racing_transfers_cannot_spend_the_same_cash() -> Result<(), BotError> {
        let db = test_db().await?;
        add_money(&db, 1, 10, 100, Wallet::Cash).await?;

        let (first, second) = tokio::join!(transfer(&db, 1, 10, 20, 100), transfer(&db, 1, 10, 30, 100));
        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let sender = get_balance(&db, 1, 10).await?;
        let received = get_balance(&db, 1, 20).await?.cash + get_balance(&db, 1, 30).await?.cash;
        assert_eq!(sender, Balance { cash: 0, bank: 0 });
        assert_eq!(received, 100);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_income_is_not_lost() -> Result<(), BotError> {
        let db = test_db().await?;
        let (a, b, c) = tokio::join!(
            add_money(&db, 1, 10, 30, Wallet::Cash),
            add_money(&db, 1, 10, 40, Wallet::Cash),
            charge(&db, 1, 10, 50),
        );
        a?;
        b?;
        c?;
        assert_eq!(get_balance(&db, 1, 10).await?.total(), 20);
        assert_eq!(economy::Entity::find().all(&db).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn leaderboard_orders_by_total() -> Result<(), DbErr> {
        let db = test_db().await?;
        set_balance(&db, 1, 10, Balance { cash: 100, bank: 900 }).await?;
        set_balance(&db, 1, 11, Balance { cash: 2000, bank: -1500 }).await?;
        set_balance(&db, 1, 12, Balance { cash: 0, bank: 5000 }).await?;
        set_balance(&db, 2, 13, Balance { cash: 9999, bank: 0 }).await?;

        let top: Vec<i64> = leaderboard(&db, 1, 10).await?.iter().map(|row| row.user_id).collect();
        assert_eq!(top, vec![12, 10, 11]);
        Ok(())
    }
}
