use serenity::all::{Context, GuildId, Permissions, RoleId, UserId};

use super::moderation::{guild_roles, rank_of};
use super::{CommandInfo, Invocation, Param, ParamKind, Reply};
use crate::economy;
use crate::error::BotError;
use crate::model::shop_item;
use crate::shop::{self, NewItem};
use crate::state::BotState;

const ITEM_PARAMS: &[Param] = &[Param::required("item", ParamKind::String, "Name of the item").rest()];
const ADD_PARAMS: &[Param] = &[
    Param::required("item", ParamKind::String, "Name of the item; quote names with spaces"),
    Param::required("price", ParamKind::Integer, "Price in cash"),
    Param::required("role", ParamKind::Role, "Role given to buyers"),
    Param::required("description", ParamKind::String, "What the item is").rest(),
];

pub static COMMANDS: &[CommandInfo] = &[
    CommandInfo::new("shop list", "Show the items for sale"),
    CommandInfo::new("shop buy", "Buy an item")
        .params(ITEM_PARAMS)
        .bot_permissions(Permissions::MANAGE_ROLES),
    CommandInfo::new("shop add", "Put a role up for sale")
        .params(ADD_PARAMS)
        .permissions(Permissions::MANAGE_GUILD.union(Permissions::MANAGE_ROLES))
        .bot_permissions(Permissions::MANAGE_ROLES),
    CommandInfo::new("shop remove", "Take an item off sale")
        .params(ITEM_PARAMS)
        .permissions(Permissions::MANAGE_GUILD.union(Permissions::MANAGE_ROLES)),
];

/// Members may only sell roles below their own top role; the owner may sell any.
async fn can_sell(ctx: &Context, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<bool, BotError> {
    let Some(rank) = rank_of(ctx, guild_id, user_id).await? else {
        return Ok(false);
    };
    let (roles, _) = guild_roles(ctx, guild_id).await?;
    Ok(roles
        .get(&role_id)
        .is_some_and(|role| rank.is_owner || rank.top_role > role.position))
}

pub async fn run(ctx: &Context, state: &BotState, invocation: &Invocation<'_>) -> Result<Reply, BotError> {
    let guild = invocation.require_guild()?;
    let guild_id = guild.get() as i64;

    match invocation.info.name {
        "shop list" => {
            let items = shop_item::for_guild(&state.db, guild_id).await?;
            if items.is_empty() {
                return Ok(Reply::text("The shop is empty."));
            }
            let mut embed = invocation.embed().title("Shop");
            for item in &items {
                embed = embed.field(
                    format!("{} | {}", item.item_name, item.item_price),
                    format!("{}\nGrants <@&{}>", item.item_description, item.role),
                    false,
                );
            }
            Ok(Reply::embed(embed))
        }
        "shop buy" => {
            let item = shop::require(&state.db, guild_id, &invocation.args.require_string("item")?).await?;
            let member = invocation.author_member(ctx).await?;
            let role_id = RoleId::new(item.role as u64);
            let user_id = invocation.author.id.get() as i64;
            shop::check_purchase(&state.db, guild_id, user_id, &item, member.roles.contains(&role_id)).await?;

            member.add_role(&ctx.http, role_id).await?;
            economy::charge(&state.db, guild_id, user_id, item.item_price).await?;
            Ok(Reply::text(format!("You bought **{}** for **{}**.", item.item_name, item.item_price)))
        }
        "shop add" => {
            let role_id = invocation.args.require_role("role")?;
            let new = NewItem {
                name: invocation.args.require_string("item")?,
                description: invocation.args.require_string("description")?,
                price: invocation.args.require_integer("price")?,
                role_id: role_id.get() as i64,
                creator_id: invocation.author.id.get() as i64,
            };
            if role_id.get() != guild.get() {
                if !can_sell(ctx, guild, invocation.author.id, role_id).await? {
                    return Err(BotError::refused("You can only sell roles below your highest role."));
                }
                let bot_id = ctx.cache.current_user().id;
                if !can_sell(ctx, guild, bot_id, role_id).await? {
                    return Err(BotError::refused("That role is above mine, so I could not hand it out."));
                }
            }

            let item = shop::add(&state.db, guild_id, new).await?;
            Ok(Reply::text(format!("Added **{}** to the shop for **{}**.", item.item_name, item.item_price)))
        }
        "shop remove" => {
            let item = shop::remove(&state.db, guild_id, &invocation.args.require_string("item")?).await?;
            Ok(Reply::text(format!("Removed **{}** from the shop.", item.item_name)))
        }
        other => Err(BotError::NotFound(format!("Command `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::invocation::parse_text_args;

    #[test]
    fn add_takes_the_description_last() {
        let args = parse_text_args(ADD_PARAMS, "\"VIP Pass\" 500 <@&123> Access to the lounge").unwrap();
        assert_eq!(args.require_string("item").unwrap(), "VIP Pass");
        assert_eq!(args.require_integer("price").unwrap(), 500);
        assert_eq!(args.require_role("role").unwrap(), RoleId::new(123));
        assert_eq!(args.require_string("description").unwrap(), "Access to the lounge");

        assert!(parse_text_args(ADD_PARAMS, "VIP 500 Access <@&123>").is_err());
    }
}
