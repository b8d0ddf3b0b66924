//! Start command handler
//!
//! Registers the caller and applies an invite or referral deep-link payload.

use teloxide::{Bot, types::Message, prelude::*, utils::command::BotCommands};
use tracing::{debug, info};
use crate::handlers::commands::Command;
use crate::middleware::Caller;
use crate::models::invite::{InviteUseOutcome, INVITE_PREFIX};
use crate::services::ServiceFactory;
use crate::utils::errors::{ErrorKind, Result};

/// What a `/start` payload asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartPayload<'a> {
    None,
    Invite(&'a str),
    Referral(&'a str),
    Unknown(&'a str),
}

pub(crate) fn classify_payload(payload: &str) -> StartPayload<'_> {
    let payload = payload.trim();
    if payload.is_empty() {
        StartPayload::None
    } else if payload.starts_with(INVITE_PREFIX) {
        StartPayload::Invite(payload)
    } else if payload.starts_with("ref_") {
        StartPayload::Referral(payload)
    } else {
        StartPayload::Unknown(payload)
    }
}

/// Handle /start command - main entry point for user onboarding
pub async fn handle_start(bot: &Bot, msg: &Message, caller: &Caller, payload: &str, services: &ServiceFactory) -> Result<()> {
    let chat_id = msg.chat.id;
    debug!(telegram_id = caller.telegram_id, payload, "Processing /start command");

    let user = services
        .user_service
        .register(caller.telegram_id, caller.username.clone(), caller.first_name.clone())
        .await?;
    if user.is_blocked {
        bot.send_message(chat_id, "Your account is blocked.").await?;
        return Ok(());
    }

    let mut lines = vec![format!("Welcome, {}!", user.display_name())];

    match classify_payload(payload) {
        StartPayload::None => {}
        StartPayload::Invite(code) => match services.invite_service.redeem(caller.telegram_id, code).await {
            Ok(InviteUseOutcome::Redeemed(_)) => lines.push("Invite accepted.".to_string()),
            Ok(InviteUseOutcome::AlreadyRedeemed(_)) => lines.push("You have already used this invite.".to_string()),
            Err(e) => lines.push(e.user_message()),
        },
        StartPayload::Referral(raw) => match services.referral_service.register_from_payload(caller.telegram_id, raw).await {
            Ok(_) => lines.push("You joined through a friend's link.".to_string()),
            // a returning user tapping a referral link again is not worth a message
            Err(e) if e.kind() == ErrorKind::AlreadyDone => {}
            Err(e) => lines.push(e.user_message()),
        },
        StartPayload::Unknown(other) => debug!(payload = other, "Ignoring unknown start payload"),
    }

    lines.push(String::new());
    lines.push("Use /plans to see prices, /trial for a free trial and /help for everything else.".to_string());
    bot.send_message(chat_id, lines.join("\n")).await?;

    info!(telegram_id = caller.telegram_id, "User started bot");
    Ok(())
}

/// Handle /help command
pub async fn handle_help(bot: &Bot, msg: &Message) -> Result<()> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_payload() {
        assert_eq!(classify_payload(""), StartPayload::None);
        assert_eq!(classify_payload("INV_abc"), StartPayload::Invite("INV_abc"));
        assert_eq!(classify_payload(" ref_42 "), StartPayload::Referral("ref_42"));
        assert_eq!(classify_payload("promo"), StartPayload::Unknown("promo"));
    }
}
