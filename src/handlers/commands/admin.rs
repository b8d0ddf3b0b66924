//! Admin command handlers

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use teloxide::{Bot, types::Message, prelude::*};
use tracing::info;
use crate::handlers::commands::{parse_id, split_first};
use crate::middleware::Caller;
use crate::models::promo::{CreatePromoRequest, PromoType};
use crate::models::user::Role;
use crate::services::ServiceFactory;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::format_timestamp;

const NEW_PROMO_USAGE: &str = "Usage: /newpromo <code> <percent|fixed|trial> <value> [max_uses] [days]";

pub(crate) fn parse_new_promo(args: &str) -> Result<CreatePromoRequest> {
    let usage = || BotError::Validation(NEW_PROMO_USAGE.to_string());
    let words: Vec<&str> = args.split_whitespace().collect();
    if !(3..=5).contains(&words.len()) {
        return Err(usage());
    }

    let promo_type = words[1].parse::<PromoType>().map_err(|_| usage())?;
    let value = words[2].parse::<Decimal>().map_err(|_| usage())?;
    let max_uses = words.get(3).map(|w| w.parse::<i32>()).transpose().map_err(|_| usage())?;
    let expires_at = words
        .get(4)
        .map(|w| w.parse::<i64>())
        .transpose()
        .map_err(|_| usage())?
        .map(|days| Utc::now() + Duration::days(days));

    Ok(CreatePromoRequest {
        code: words[0].to_string(),
        promo_type,
        value,
        max_uses,
        expires_at,
        created_by: None,
    })
}

/// `/block <telegram_id>` and `/unblock <telegram_id>`
pub async fn handle_block(bot: &Bot, msg: &Message, caller: &Caller, args: &str, blocked: bool, services: &ServiceFactory) -> Result<()> {
    let target = parse_id(args, "user id")?;
    let user = services.user_service.set_blocked(caller.telegram_id, target, blocked).await?;
    let verb = if blocked { "blocked" } else { "unblocked" };
    bot.send_message(msg.chat.id, format!("User {} {}.", user.display_name(), verb)).await?;
    Ok(())
}

pub async fn handle_set_role(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (target, role) = split_first(args);
    let target = parse_id(target, "user id")?;
    let role = role.parse::<Role>().map_err(BotError::Validation)?;
    let user = services.user_service.set_role(caller.telegram_id, target, role).await?;
    bot.send_message(msg.chat.id, format!("{} is now {}.", user.display_name(), user.role)).await?;
    Ok(())
}

pub async fn handle_referral_paid(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let referral_id = parse_id(args, "referral id")?;
    let referral = services.referral_service.mark_referral_paid(caller.telegram_id, referral_id).await?;
    bot.send_message(
        msg.chat.id,
        format!("Referral #{} marked paid ({}).", referral.id, referral.bonus_amount),
    )
    .await?;
    Ok(())
}

pub async fn handle_new_promo(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let request = parse_new_promo(args)?;
    let promo = services.promo_service.create_promo_code(caller.telegram_id, request).await?;
    bot.send_message(
        msg.chat.id,
        format!("Promo {} created: {} {}.", promo.code, promo.promo_type, promo.value),
    )
    .await?;
    Ok(())
}

pub async fn handle_promos(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let promos = services.promo_service.list_promo_codes(caller.telegram_id).await?;
    let text = if promos.is_empty() {
        "No promo codes.".to_string()
    } else {
        promos
            .iter()
            .map(|p| {
                let uses = p.max_uses.map_or_else(|| "∞".to_string(), |m| m.to_string());
                let expiry = p.expires_at.map(format_timestamp).unwrap_or_else(|| "no expiry".to_string());
                format!(
                    "{} {} {} used {}/{} {}{}",
                    p.code,
                    p.promo_type,
                    p.value,
                    p.used_count,
                    uses,
                    expiry,
                    if p.is_active { "" } else { " (off)" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_delete_promo(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let code = args.trim();
    services.promo_service.deactivate(caller.telegram_id, code).await?;
    bot.send_message(msg.chat.id, format!("Promo {} deactivated.", code)).await?;
    Ok(())
}

pub async fn handle_confirm(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let payment_id = parse_id(args, "payment id")?;
    let outcome = services.payment_service.confirm_manual(caller.telegram_id, payment_id).await?;
    let text = if outcome.replayed {
        format!("Payment #{} was already {}.", payment_id, outcome.payment.status)
    } else {
        format!("Payment #{} confirmed.", payment_id)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_resync(bot: &Bot, msg: &Message, services: &ServiceFactory) -> Result<()> {
    let (synced, failed) = services.provisioner.retry_pending(100).await?;
    info!(synced, failed, "Manual panel resync finished");
    bot.send_message(msg.chat.id, format!("Panel resync: {} synced, {} still pending.", synced, failed)).await?;
    Ok(())
}

pub async fn handle_stats(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let stats = services.user_service.stats(caller.telegram_id).await?;
    let health = services.health_check().await;

    let mut lines = vec![
        format!("Users: {}", stats.total),
        format!("Active: {}", stats.active),
        format!("Trial: {}", stats.trial),
        format!("Blocked: {}", stats.blocked),
        format!("Payments via: {}", health.enabled_providers.join(", ")),
    ];
    lines.extend(health.get_issues().into_iter().map(|issue| format!("⚠️ {}", issue)));

    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

pub async fn handle_revenue(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let rows = services.payment_service.revenue(caller.telegram_id).await?;
    let text = if rows.is_empty() {
        "No completed payments yet.".to_string()
    } else {
        rows.iter()
            .map(|r| format!("{}: {} payments, {}", r.currency, r.payments, r.total))
            .collect::<Vec<_>>()
            .join("\n")
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_new_promo() {
        let request = parse_new_promo("SAVE10 percent 10 100 30").unwrap();
        assert_eq!(request.code, "SAVE10");
        assert_eq!(request.promo_type, PromoType::Percent);
        assert_eq!(request.value, Decimal::from(10));
        assert_eq!(request.max_uses, Some(100));
        assert!(request.expires_at.is_some());

        let request = parse_new_promo("FIVE fixed 5.00").unwrap();
        assert_eq!(request.max_uses, None);
        assert_eq!(request.expires_at, None);

        assert_matches!(parse_new_promo("SAVE10 percent"), Err(BotError::Validation(_)));
        assert_matches!(parse_new_promo("SAVE10 bogus 10"), Err(BotError::Validation(_)));
    }
}
