//! Server currency: earning, gambling, paying and banking.

use rand::seq::SliceRandom;
use rand::Rng;
use serenity::all::{Context, Permissions};

use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::economy::{self, Balance, Wallet};
use crate::error::BotError;
use crate::state::BotState;

const HOUR: u64 = 60 * 60;
const DAILY_AMOUNT: i64 = 5000;
const LUCK_MINIMUM: i64 = 1000;
const LEADERBOARD_SIZE: u64 = 10;
static SLOT_SYMBOLS: [&str; 4] = ["🍇", "🍉", "🍊", "🍋"];

const MEMBER_PARAMS: &[Param] = &[Param::optional("member", ParamKind::User, "Whose balance to show")];
const BET_PARAMS: &[Param] = &[Param::required("bet", ParamKind::Integer, "How much cash to bet")];
const PAY_PARAMS: &[Param] = &[
    Param::required("member", ParamKind::User, "Who to pay"),
    Param::required("amount", ParamKind::Integer, "How much cash to send"),
];
const AMOUNT_PARAMS: &[Param] = &[Param::optional("amount", ParamKind::String, "An amount, or `all`")];
const ADJUST_PARAMS: &[Param] = &[
    Param::required("member", ParamKind::User, "Whose balance to change"),
    Param::required("amount", ParamKind::Integer, "How much"),
    Param::optional("wallet", ParamKind::String, "Cash or bank (defaults to cash)").choices(&["cash", "bank"]),
];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("balance", "Show a member's cash and bank balance")
        .params(MEMBER_PARAMS)
        .aliases(&["bal"]),
    CommandInfo::new("work", "Work for some cash").cooldown(HOUR),
    CommandInfo::new("crime", "Commit a crime for some cash"),
    CommandInfo::new("daily", "Collect your daily allowance").cooldown(24 * HOUR),
    CommandInfo::new("luck", "Flip a coin for cash").cooldown(HOUR),
    CommandInfo::new("slots", "Bet on the slot machine")
        .params(BET_PARAMS)
        .cooldown(HOUR),
    CommandInfo::new("pay", "Give cash to another member").params(PAY_PARAMS),
    CommandInfo::new("deposit", "Move cash into the bank")
        .params(AMOUNT_PARAMS)
        .aliases(&["dep"]),
    CommandInfo::new("withdraw", "Move money out of the bank")
        .params(AMOUNT_PARAMS)
        .aliases(&["with"]),
    CommandInfo::new("addmoney", "Add money to a member's balance")
        .params(ADJUST_PARAMS)
        .permissions(Permissions::ADMINISTRATOR),
    CommandInfo::new("removemoney", "Remove money from a member's balance")
        .params(ADJUST_PARAMS)
        .permissions(Permissions::ADMINISTRATOR),
    CommandInfo::new("leaderboard", "The richest members of this server").aliases(&["lb"]),
];

/// Three symbols; three of a kind wins.
fn spin<R: Rng + ?Sized>(rng: &mut R) -> [&'static str; 3] {
    std::array::from_fn(|_| *SLOT_SYMBOLS.choose(&mut *rng).unwrap_or(&SLOT_SYMBOLS[0]))
}

fn is_jackpot(reels: &[&str; 3]) -> bool {
    reels[0] == reels[1] && reels[1] == reels[2]
}

/// `None` means everything available.
fn parse_amount(raw: Option<&str>) -> Result<Option<i64>, BotError> {
    match raw.map(str::trim) {
        None => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
        Some(value) => match value.replace(',', "").parse::<i64>() {
            Ok(amount) if amount > 0 => Ok(Some(amount)),
            _ => Err(BotError::bad_argument(format!("`{}` is not a positive amount or `all`.", value))),
        },
    }
}

fn positive(amount: i64) -> Result<i64, BotError> {
    if amount < 1 {
        return Err(BotError::bad_argument("The amount must be at least 1."));
    }
    Ok(amount)
}

fn debt_note(balance: &Balance) -> &'static str {
    if balance.in_debt() {
        "\nYou are in debt. Anything you earn pays it off first."
    } else {
        ""
    }
}

pub async fn run(_ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild_id = invocation.require_guild()?.get() as i64;
    let user_id = invocation.author.id.get() as i64;
    let db = &state.db;

    match invocation.info.name {
        "balance" => {
            let member = invocation.args.user("member").unwrap_or(invocation.author.id);
            let balance = economy::get_balance(db, guild_id, member.get() as i64).await?;
            let mut embed = invocation
                .embed()
                .title("Balance")
                .description(format!("<@{}>", member))
                .field("Cash", balance.cash.to_string(), true)
                .field("Bank", balance.bank.to_string(), true)
                .field("Total", balance.total().to_string(), true);
            if balance.in_debt() {
                embed = embed.field("Debt", "This account is in debt. Income repays it first.", false);
            }
            Ok(Reply::embed(embed))
        }
        "work" => {
            let amount = rand::thread_rng().gen_range(300..=1500);
            let balance = economy::add_money(db, guild_id, user_id, amount, Wallet::Cash).await?;
            Ok(Reply::text(format!("You worked a shift and earned **{}**.{}", amount, debt_note(&balance))))
        }
        "crime" => {
            let amount = rand::thread_rng().gen_range(500..=2000);
            let balance = economy::add_money(db, guild_id, user_id, amount, Wallet::Cash).await?;
            Ok(Reply::text(format!("Crime paid off: you got away with **{}**.{}", amount, debt_note(&balance))))
        }
        "daily" => {
            let balance = economy::add_money(db, guild_id, user_id, DAILY_AMOUNT, Wallet::Cash).await?;
            Ok(Reply::text(format!(
                "You collected your daily **{}**.{}",
                DAILY_AMOUNT,
                debt_note(&balance)
            )))
        }
        "luck" => {
            let balance = economy::get_balance(db, guild_id, user_id).await?;
            if balance.cash < LUCK_MINIMUM {
                return Err(BotError::refused(format!(
                    "You need at least **{}** cash to try your luck.",
                    LUCK_MINIMUM
                )));
            }
            let (amount, won) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(200..=1000), rng.gen_bool(0.5))
            };
            if won {
                economy::add_money(db, guild_id, user_id, amount, Wallet::Cash).await?;
                Ok(Reply::text(format!("Heads! You won **{}**.", amount)))
            } else {
                economy::remove_money(db, guild_id, user_id, amount, Wallet::Cash).await?;
                Ok(Reply::text(format!("Tails. You lost **{}**.", amount)))
            }
        }
        "slots" => {
            let bet = positive(invocation.args.require_integer("bet")?)?;
            let balance = economy::get_balance(db, guild_id, user_id).await?;
            if bet > balance.cash || balance.in_debt() {
                return Err(BotError::refused(format!(
                    "You can't bet more cash than you have (**{}**).",
                    balance.cash
                )));
            }
            let stake = bet.saturating_mul(2);
            let reels = spin(&mut rand::thread_rng());
            let shown = reels.join(" ");
            if is_jackpot(&reels) {
                economy::add_money(db, guild_id, user_id, stake, Wallet::Cash).await?;
                Ok(Reply::text(format!("{}\nJackpot! You won **{}**.", shown, stake)))
            } else {
                let balance = economy::charge(db, guild_id, user_id, stake).await?;
                Ok(Reply::text(format!("{}\nNo luck. You lost **{}**.{}", shown, stake, debt_note(&balance))))
            }
        }
        "pay" => {
            let member = invocation.args.require_user("member")?;
            let amount = positive(invocation.args.require_integer("amount")?)?;
            if member == invocation.author.id {
                return Err(BotError::refused("You can't pay yourself."));
            }
            economy::transfer(db, guild_id, user_id, member.get() as i64, amount).await?;
            Ok(Reply::text(format!("You paid <@{}> **{}**.", member, amount)))
        }
        "deposit" => {
            let amount = parse_amount(invocation.args.string("amount").as_deref())?;
            let (moved, balance) = economy::deposit(db, guild_id, user_id, amount).await?;
            Ok(Reply::text(format!(
                "Deposited **{}**. Your bank balance is now **{}**.",
                moved, balance.bank
            )))
        }
        "withdraw" => {
            let amount = parse_amount(invocation.args.string("amount").as_deref())?;
            let (moved, balance) = economy::withdraw(db, guild_id, user_id, amount).await?;
            Ok(Reply::text(format!("Withdrew **{}**. You now have **{}** cash.", moved, balance.cash)))
        }
        "addmoney" | "removemoney" => {
            let member = invocation.args.require_user("member")?;
            let amount = positive(invocation.args.require_integer("amount")?)?;
            let wallet = invocation
                .args
                .string("wallet")
                .and_then(|wallet| Wallet::parse(&wallet))
                .unwrap_or(Wallet::Cash);
            let target = member.get() as i64;
            let balance = if invocation.info.name == "addmoney" {
                economy::add_money(db, guild_id, target, amount, wallet).await?
            } else {
                economy::remove_money(db, guild_id, target, amount, wallet).await?
            };
            Ok(Reply::text(format!(
                "<@{}> now has **{}** cash and **{}** in the bank.",
                member, balance.cash, balance.bank
            )))
        }
        "leaderboard" => {
            let rows = economy::leaderboard(db, guild_id, LEADERBOARD_SIZE).await?;
            if rows.is_empty() {
                return Ok(Reply::text("Nobody has any money yet."));
            }
            let lines: Vec<String> = rows
                .iter()
                .enumerate()
                .map(|(rank, row)| {
                    let balance = Balance::from(row);
                    format!("`#{}` <@{}>: **{}**", rank + 1, row.user_id, balance.total())
                })
                .collect();
            Ok(Reply::embed(invocation.embed().title("Leaderboard").description(lines.join("\n"))))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn amounts_accept_numbers_and_all() {
        assert_eq!(parse_amount(None).unwrap(), None);
        assert_eq!(parse_amount(Some("ALL")).unwrap(), None);
        assert_eq!(parse_amount(Some("1,500")).unwrap(), Some(1500));
        assert!(parse_amount(Some("0")).is_err());
        assert!(parse_amount(Some("-5")).is_err());
        assert!(parse_amount(Some("lots")).is_err());
    }

    #[test]
    fn reels_use_known_symbols() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let reels = spin(&mut rng);
            assert!(reels.iter().all(|symbol| SLOT_SYMBOLS.contains(symbol)));
        }
        assert!(is_jackpot(&["🍋", "🍋", "🍋"]));
        assert!(!is_jackpot(&["🍋", "🍋", "🍇"]));
    }

    #[test]
    fn long_cooldowns_are_declared() {
        let daily = COMMANDS.iter().find(|info| info.name == "daily").expect("daily exists");
        assert_eq!(daily.cooldown.map(|cooldown| cooldown.as_secs()), Some(86_400));
        let crime = COMMANDS.iter().find(|info| info.name == "crime").expect("crime exists");
        assert!(crime.cooldown.is_none());
    }
}
