//! Referral and invite command handlers

use chrono::{Duration, Utc};
use teloxide::{Bot, types::Message, prelude::*};
use crate::handlers::commands::split_first;
use crate::middleware::Caller;
use crate::services::ServiceFactory;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::format_timestamp;

pub async fn handle_referral(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let referrals = &services.referral_service;
    if !referrals.is_enabled() {
        return Err(BotError::Validation("The referral program is turned off.".to_string()));
    }

    let stats = referrals.get_referral_stats(caller.telegram_id).await?;
    let recent = referrals.list_mine(caller.telegram_id).await?;

    let mut lines = vec![
        format!("Your link: {}", referrals.link(caller.telegram_id)),
        format!("Invited: {} ({} paying)", stats.total_referrals, stats.active_referrals),
        format!("Earned: {}", stats.total_earned),
        format!("Awaiting first payment: {}", stats.pending_bonus),
    ];
    for referral in recent.iter().take(5) {
        lines.push(format!(
            "#{} {} {} since {}",
            referral.id,
            referral.status.as_str(),
            referral.bonus_amount,
            format_timestamp(referral.created_at)
        ));
    }

    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

/// `/invite [max_uses] [days]`, `/invite list`, `/invite off <code>`
pub async fn handle_invite(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let invites = &services.invite_service;
    let (first, rest) = split_first(args);

    let text = match first {
        "list" => {
            let mine = invites.list_mine(caller.telegram_id).await?;
            if mine.is_empty() {
                "No invites yet.".to_string()
            } else {
                mine.iter()
                    .map(|i| {
                        format!(
                            "{} {}/{} ({} left){}",
                            i.code,
                            i.used_count,
                            i.max_uses,
                            i.remaining_uses(),
                            if i.is_active { "" } else { " (off)" }
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "off" => {
            invites.deactivate(caller.telegram_id, rest).await?;
            format!("Invite {} deactivated.", rest)
        }
        _ => {
            let max_uses = if first.is_empty() {
                1
            } else {
                first
                    .parse::<i32>()
                    .map_err(|_| BotError::Validation("Usage: /invite [max_uses] [days]".to_string()))?
            };
            let expires_at = match rest {
                "" => None,
                days => {
                    let days = days
                        .parse::<i64>()
                        .map_err(|_| BotError::Validation("Usage: /invite [max_uses] [days]".to_string()))?;
                    Some(Utc::now() + Duration::days(days))
                }
            };

            let invite = invites.create_invite(caller.telegram_id, max_uses, expires_at).await?;
            format!(
                "Invite {} ({} uses)\nhttps://t.me/{}?start={}",
                invite.code,
                invite.max_uses,
                services.bot_username(),
                invite.code
            )
        }
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
