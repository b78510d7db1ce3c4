use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use serenity::all::{
    ChannelId, Colour, CreateEmbed, CreateEmbedFooter, CreateMessage, EditMessage, Http, MessageId, ReactionType,
    UserId,
};

use crate::error::{http_status, BotError};
use crate::model::giveaway;
use crate::model::IdList;

pub const ENTRY_EMOJI: &str = "🎉";

/// Discord returns at most this many reaction users per page.
const REACTION_PAGE: u8 = 100;

/// Draws up to `count` distinct winners, uniformly and without replacement.
pub fn pick_winners<R: Rng + ?Sized>(entrants: &[UserId], count: usize, rng: &mut R) -> Vec<UserId> {
    let mut unique = entrants.to_vec();
    unique.sort();
    unique.dedup();
    unique.choose_multiple(rng, count).copied().collect()
}

fn entry_reaction() -> ReactionType {
    ReactionType::Unicode(ENTRY_EMOJI.to_string())
}

fn mentions(winners: &[UserId]) -> String {
    winners
        .iter()
        .map(|id| format!("<@{}>", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn running_embed(prize: &str, host_id: UserId, winners: i32, ends_at: DateTime<Utc>) -> CreateEmbed {
    CreateEmbed::new()
        .title(prize)
        .description(format!(
            "React with {} to enter!\nEnds <t:{}:R>\nHosted by <@{}>",
            ENTRY_EMOJI,
            ends_at.timestamp(),
            host_id
        ))
        .colour(Colour::BLURPLE)
        .footer(CreateEmbedFooter::new(format!("{} winner(s)", winners)))
        .timestamp(ends_at)
}

fn ended_embed(prize: &str, host_id: UserId, winners: &[UserId]) -> CreateEmbed {
    let result = if winners.is_empty() {
        "No valid entrants.".to_string()
    } else {
        format!("Winners: {}", mentions(winners))
    };
    CreateEmbed::new()
        .title(prize)
        .description(format!("{}\nHosted by <@{}>", result, host_id))
        .colour(Colour::DARK_GREY)
        .footer(CreateEmbedFooter::new("Ended"))
        .timestamp(Utc::now())
}

pub fn announcement(prize: &str, winners: &[UserId]) -> String {
    if winners.is_empty() {
        format!("Nobody entered the giveaway for **{}**.", prize)
    } else {
        format!("Congratulations {}! You won **{}**!", mentions(winners), prize)
    }
}

pub struct NewGiveaway {
    pub guild_id: i64,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub prize: String,
    pub winners: i32,
    pub ends_at: DateTime<Utc>,
}

/// Posts the giveaway message, adds the entry reaction and stores the row.
pub async fn start<C: ConnectionTrait>(db: &C, http: &Http, new: NewGiveaway) -> Result<giveaway::Model, BotError> {
    let embed = running_embed(&new.prize, new.host_id, new.winners, new.ends_at);
    let message = new.channel_id.send_message(http, CreateMessage::new().embed(embed)).await?;
    message.react(http, entry_reaction()).await?;

    let row = giveaway::ActiveModel {
        guild_id: Set(new.guild_id),
        channel_id: Set(new.channel_id.get() as i64),
        message_id: Set(message.id.get() as i64),
        host_id: Set(new.host_id.get() as i64),
        prize: Set(new.prize),
        winners: Set(new.winners),
        ends_at: Set(new.ends_at),
        ended: Set(false),
        winner_ids: Set(IdList::default()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(row)
}

pub async fn due<C: ConnectionTrait>(db: &C, now: DateTime<Utc>) -> Result<Vec<giveaway::Model>, DbErr> {
    giveaway::Entity::find()
        .filter(giveaway::Column::Ended.eq(false))
        .filter(giveaway::Column::EndsAt.lte(now))
        .all(db)
        .await
}

pub async fn find_by_message<C: ConnectionTrait>(
    db: &C,
    guild_id: i64,
    message_id: i64,
) -> Result<Option<giveaway::Model>, DbErr> {
    giveaway::Entity::find()
        .filter(giveaway::Column::GuildId.eq(guild_id))
        .filter(giveaway::Column::MessageId.eq(message_id))
        .one(db)
        .await
}

pub async fn running<C: ConnectionTrait>(db: &C, guild_id: i64) -> Result<Vec<giveaway::Model>, DbErr> {
    giveaway::Entity::find()
        .filter(giveaway::Column::GuildId.eq(guild_id))
        .filter(giveaway::Column::Ended.eq(false))
        .all(db)
        .await
}

/// Everyone who reacted with the entry emoji, minus bots.
async fn entrants(http: &Http, channel_id: ChannelId, message_id: MessageId) -> serenity::Result<Vec<UserId>> {
    let mut entrants = Vec::new();
    let mut after: Option<UserId> = None;
    loop {
        let page = channel_id
            .reaction_users(http, message_id, entry_reaction(), Some(REACTION_PAGE), after)
            .await?;
        let full_page = page.len() == REACTION_PAGE as usize;
        after = page.last().map(|user| user.id);
        entrants.extend(page.into_iter().filter(|user| !user.bot).map(|user| user.id));
        if !full_page {
            return Ok(entrants);
        }
    }
}

fn draw(entrants: &[UserId], count: i32) -> Vec<UserId> {
    pick_winners(entrants, count.max(0) as usize, &mut rand::thread_rng())
}

async fn announce(http: &Http, giveaway: &giveaway::Model, winners: &[UserId]) -> Result<(), BotError> {
    let channel_id = ChannelId::new(giveaway.channel_id as u64);
    let message_id = MessageId::new(giveaway.message_id as u64);
    let host_id = UserId::new(giveaway.host_id as u64);

    let edit = EditMessage::new().embed(ended_embed(&giveaway.prize, host_id, winners));
    channel_id.edit_message(http, message_id, edit).await?;
    channel_id
        .send_message(
            http,
            CreateMessage::new()
                .content(announcement(&giveaway.prize, winners))
                .reference_message((channel_id, message_id)),
        )
        .await?;
    Ok(())
}

/// Marks a running giveaway ended. Only one of several concurrent callers gets `true`.
async fn claim<C: ConnectionTrait>(db: &C, id: i64) -> Result<bool, DbErr> {
    let result = giveaway::Entity::update_many()
        .col_expr(giveaway::Column::Ended, Expr::value(true))
        .filter(giveaway::Column::Id.eq(id))
        .filter(giveaway::Column::Ended.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Puts a claimed giveaway back so the next sweep tries again.
async fn release<C: ConnectionTrait>(db: &C, id: i64) -> Result<(), DbErr> {
    giveaway::Entity::update_many()
        .col_expr(giveaway::Column::Ended, Expr::value(false))
        .filter(giveaway::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

async fn save_winners<C: ConnectionTrait>(db: &C, id: i64, winners: &[UserId]) -> Result<(), DbErr> {
    let winner_ids = IdList(winners.iter().map(|id| id.get() as i64).collect());
    giveaway::Entity::update_many()
        .col_expr(giveaway::Column::WinnerIds, Expr::value(winner_ids))
        .filter(giveaway::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Draws winners, marks the giveaway ended and announces the result. A giveaway whose
/// message was deleted ends without winners. Ending a giveaway twice is refused.
pub async fn resolve<C: ConnectionTrait>(db: &C, http: &Http, giveaway: giveaway::Model) -> Result<Vec<UserId>, BotError> {
    if !claim(db, giveaway.id).await? {
        return Err(BotError::refused("That giveaway has already ended."));
    }
    let channel_id = ChannelId::new(giveaway.channel_id as u64);
    let message_id = MessageId::new(giveaway.message_id as u64);

    let (winners, message_gone) = match entrants(http, channel_id, message_id).await {
        Ok(entrants) => (draw(&entrants, giveaway.winners), false),
        Err(err) if http_status(&err) == Some(404) => (Vec::new(), true),
        Err(err) => {
            release(db, giveaway.id).await?;
            return Err(err.into());
        }
    };
    save_winners(db, giveaway.id, &winners).await?;

    if !message_gone {
        announce(http, &giveaway, &winners).await?;
    }
    tracing::info!(giveaway = giveaway.id, winners = winners.len(), "giveaway ended");
    Ok(winners)
}

/// Draws a fresh set of winners for an ended giveaway.
pub async fn reroll<C: ConnectionTrait>(db: &C, http: &Http, giveaway: giveaway::Model) -> Result<Vec<UserId>, BotError> {
    if !giveaway.ended {
        return Err(BotError::refused("That giveaway is still running."));
    }
    let channel_id = ChannelId::new(giveaway.channel_id as u64);
    let message_id = MessageId::new(giveaway.message_id as u64);
    let entrants = entrants(http, channel_id, message_id).await?;
    let winners = draw(&entrants, giveaway.winners);

    let snapshot = giveaway.clone();
    let mut row: giveaway::ActiveModel = giveaway.into();
    row.winner_ids = Set(IdList(winners.iter().map(|id| id.get() as i64).collect()));
    row.update(db).await?;

    announce(http, &snapshot, &winners).await?;
    Ok(winners)
}

/// Ends every giveaway past its deadline. Failures are logged and retried next time.
pub async fn resolve_due<C: ConnectionTrait>(db: &C, http: &Http, now: DateTime<Utc>) -> Result<usize, DbErr> {
    let mut resolved = 0;
    for giveaway in due(db, now).await? {
        let id = giveaway.id;
        match resolve(db, http, giveaway).await {
            Ok(_) => resolved += 1,
            // ended by a command in the meantime
            Err(BotError::Refused(_)) => {}
            Err(err) => tracing::warn!(giveaway = id, "failed to end giveaway: {}", err),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::test_db;

    fn ids(raw: &[u64]) -> Vec<UserId> {
        raw.iter().map(|id| UserId::new(*id)).collect()
    }

    #[test]
    fn winners_are_unique_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let entrants = ids(&[1, 2, 2, 3, 4, 4, 5]);

        for _ in 0..50 {
            let mut winners = pick_winners(&entrants, 3, &mut rng);
            assert_eq!(winners.len(), 3);
            winners.sort();
            winners.dedup();
            assert_eq!(winners.len(), 3);
            assert!(winners.iter().all(|winner| entrants.contains(winner)));
        }

        assert_eq!(pick_winners(&entrants, 10, &mut rng).len(), 5);
        assert!(pick_winners(&[], 3, &mut rng).is_empty());
        assert!(pick_winners(&entrants, 0, &mut rng).is_empty());
    }

    #[test]
    fn every_entrant_can_win() {
        let mut rng = StdRng::seed_from_u64(42);
        let entrants = ids(&[1, 2, 3]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.extend(pick_winners(&entrants, 1, &mut rng));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn announcement_lists_winners() {
        assert_eq!(
            announcement("Nitro", &ids(&[1, 2])),
            "Congratulations <@1>, <@2>! You won **Nitro**!"
        );
        assert_eq!(announcement("Nitro", &[]), "Nobody entered the giveaway for **Nitro**.");
    }

    async fn insert_giveaway(
        db: &sea_orm::DatabaseConnection,
        message_id: i64,
        ends_at: DateTime<Utc>,
        ended: bool,
    ) -> Result<giveaway::Model, DbErr> {
        giveaway::ActiveModel {
            guild_id: Set(1),
            channel_id: Set(10),
            message_id: Set(message_id),
            host_id: Set(5),
            prize: Set("Nitro".into()),
            winners: Set(1),
            ends_at: Set(ends_at),
            ended: Set(ended),
            winner_ids: Set(IdList::default()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    #[tokio::test]
    async fn a_giveaway_is_claimed_only_once() -> Result<(), DbErr> {
        let db = test_db().await?;
        let now = Utc::now();
        let row = insert_giveaway(&db, 1, now - chrono::Duration::seconds(5), false).await?;

        let (first, second) = tokio::join!(claim(&db, row.id), claim(&db, row.id));
        assert!(first? ^ second?);
        assert!(due(&db, now).await?.is_empty());
        assert!(!claim(&db, row.id).await?);

        release(&db, row.id).await?;
        assert_eq!(due(&db, now).await?.len(), 1);
        assert!(claim(&db, row.id).await?);

        save_winners(&db, row.id, &ids(&[7, 8])).await?;
        let stored = find_by_message(&db, 1, 1).await?.map(|giveaway| giveaway.winner_ids);
        assert_eq!(stored, Some(IdList(vec![7, 8])));
        Ok(())
    }

    #[tokio::test]
    async fn only_running_giveaways_past_deadline_are_due() -> Result<(), DbErr> {
        let db = test_db().await?;
        let now = Utc::now();
        for (message_id, ends_at, ended) in [
            (1, now - chrono::Duration::seconds(5), false),
            (2, now + chrono::Duration::hours(1), false),
            (3, now - chrono::Duration::hours(1), true),
        ] {
            insert_giveaway(&db, message_id, ends_at, ended).await?;
        }

        let due: Vec<i64> = due(&db, now).await?.iter().map(|giveaway| giveaway.message_id).collect();
        assert_eq!(due, vec![1]);
        assert_eq!(running(&db, 1).await?.len(), 2);
        assert!(find_by_message(&db, 1, 3).await?.is_some_and(|giveaway| giveaway.ended));
        Ok(())
    }
}
