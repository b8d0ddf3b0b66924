//! Command handlers module
//!
//! This module contains handlers for all bot commands like /start, /buy, etc.

pub mod start;
pub mod subscription;
pub mod referral;
pub mod support;
pub mod admin;

use std::sync::Arc;
use teloxide::{Bot, types::Message, prelude::*, utils::command::BotCommands};
use tracing::{debug, error, warn};
use crate::middleware::{AccessGuard, Caller};
use crate::models::payment::PaymentProvider;
use crate::models::user::Role;
use crate::services::ServiceFactory;
use crate::utils::errors::{BotError, ErrorKind, Result};

/// All available bot commands
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot, optionally with an invite or referral code")]
    Start(String),
    #[command(description = "show this help")]
    Help,
    #[command(description = "list plans and prices")]
    Plans,
    #[command(description = "activate the free trial")]
    Trial,
    #[command(description = "buy a plan: /buy <plan> [provider] [promo]")]
    Buy(String),
    #[command(description = "check a payment: /check [payment_id]")]
    Check(String),
    #[command(description = "show your subscription")]
    Status,
    #[command(description = "cancel your subscription")]
    Cancel(String),
    #[command(description = "price a plan with a promo code: /promo <code> <plan>")]
    Promo(String),
    #[command(description = "your referral link and earnings")]
    Referral,
    #[command(description = "create or manage invite codes (managers)")]
    Invite(String),
    #[command(description = "open a ticket: /ticket <category> <title> | <text>")]
    Ticket(String),
    #[command(description = "reply to a ticket: /reply <ticket_id> <text>")]
    Reply(String),
    #[command(description = "your tickets, or /tickets <id> for one conversation")]
    Tickets(String),
    #[command(description = "change ticket status: /ticketstatus <id> <status>")]
    TicketStatus(String),
    #[command(description = "internal note on a ticket (managers)")]
    Note(String),
    #[command(description = "block a user (managers)")]
    Block(String),
    #[command(description = "unblock a user (managers)")]
    Unblock(String),
    #[command(description = "set a user's role (admins)")]
    SetRole(String),
    #[command(description = "mark a referral bonus as paid out (managers)")]
    RefPaid(String),
    #[command(description = "create a promo code: /newpromo <code> <percent|fixed|trial> <value> [max_uses] [days]")]
    NewPromo(String),
    #[command(description = "list promo codes (managers)")]
    Promos,
    #[command(description = "deactivate a promo code (admins)")]
    DelPromo(String),
    #[command(description = "confirm a YooMoney payment (managers)")]
    Confirm(String),
    #[command(description = "retry pending panel syncs (managers)")]
    Resync,
    #[command(description = "user statistics (managers)")]
    Stats,
    #[command(description = "revenue by currency (admins)")]
    Revenue,
}

impl Command {
    /// Least role allowed to run the command; `None` also admits unregistered users
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Command::Start(_) | Command::Help => None,
            Command::Invite(_)
            | Command::Note(_)
            | Command::Block(_)
            | Command::Unblock(_)
            | Command::RefPaid(_)
            | Command::Promos
            | Command::Confirm(_)
            | Command::Resync
            | Command::Stats => Some(Role::Manager),
            Command::SetRole(_) | Command::NewPromo(_) | Command::DelPromo(_) | Command::Revenue => Some(Role::Admin),
            _ => Some(Role::User),
        }
    }
}

/// Split off the first whitespace-separated word
pub(crate) fn split_first(args: &str) -> (&str, &str) {
    let args = args.trim();
    match args.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (args, ""),
    }
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| BotError::Validation(format!("Please give a numeric {}.", what)))
}

/// `/buy <plan> [provider] [promo]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuyArgs {
    pub plan: String,
    pub provider: Option<PaymentProvider>,
    pub promo: Option<String>,
}

pub(crate) fn parse_buy_args(args: &str) -> Result<BuyArgs> {
    let mut words = args.split_whitespace();
    let plan = words
        .next()
        .ok_or_else(|| BotError::Validation("Usage: /buy <plan> [provider] [promo]".to_string()))?
        .to_lowercase();

    let mut provider = None;
    let mut promo = None;
    for word in words {
        match word.parse::<PaymentProvider>() {
            Ok(p) if provider.is_none() => provider = Some(p),
            _ if promo.is_none() => promo = Some(word.to_string()),
            _ => return Err(BotError::Validation(format!("Unexpected argument: {}", word))),
        }
    }
    Ok(BuyArgs { plan, provider, promo })
}

/// Main command dispatcher
///
/// Domain failures are answered with a short message and never bubble up
/// to the dispatcher.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    services: Arc<ServiceFactory>,
    guard: AccessGuard,
) -> Result<()> {
    let caller = Caller::from_message(&msg)?;
    let chat_id = msg.chat.id;
    debug!(telegram_id = caller.telegram_id, command = ?cmd, "Processing command");

    let result = match guard.admit(&caller, cmd.required_role()).await {
        Ok(_) => dispatch(&bot, &msg, &caller, cmd, &services).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        match e.kind() {
            ErrorKind::Fatal => error!(telegram_id = caller.telegram_id, error = %e, "Command failed"),
            ErrorKind::Inconsistency | ErrorKind::Transient => {
                warn!(telegram_id = caller.telegram_id, error = %e, "Command failed")
            }
            ErrorKind::AlreadyDone | ErrorKind::CallerError => {
                debug!(telegram_id = caller.telegram_id, error = %e, "Command refused")
            }
        }
        bot.send_message(chat_id, e.user_message()).await?;
    }
    Ok(())
}

async fn dispatch(bot: &Bot, msg: &Message, caller: &Caller, cmd: Command, services: &ServiceFactory) -> Result<()> {
    match cmd {
        Command::Start(payload) => start::handle_start(bot, msg, caller, &payload, services).await,
        Command::Help => start::handle_help(bot, msg).await,
        Command::Plans => subscription::handle_plans(bot, msg, services).await,
        Command::Trial => subscription::handle_trial(bot, msg, caller, services).await,
        Command::Buy(args) => subscription::handle_buy(bot, msg, caller, &args, services).await,
        Command::Check(args) => subscription::handle_check(bot, msg, caller, &args, services).await,
        Command::Status => subscription::handle_status(bot, msg, caller, services).await,
        Command::Cancel(args) => subscription::handle_cancel(bot, msg, caller, &args, services).await,
        Command::Promo(args) => subscription::handle_promo(bot, msg, caller, &args, services).await,
        Command::Referral => referral::handle_referral(bot, msg, caller, services).await,
        Command::Invite(args) => referral::handle_invite(bot, msg, caller, &args, services).await,
        Command::Ticket(args) => support::handle_ticket(bot, msg, caller, &args, services).await,
        Command::Reply(args) => support::handle_reply(bot, msg, caller, &args, services).await,
        Command::Tickets(args) => support::handle_tickets(bot, msg, caller, &args, services).await,
        Command::TicketStatus(args) => support::handle_ticket_status(bot, msg, caller, &args, services).await,
        Command::Note(args) => support::handle_note(bot, msg, caller, &args, services).await,
        Command::Block(args) => admin::handle_block(bot, msg, caller, &args, true, services).await,
        Command::Unblock(args) => admin::handle_block(bot, msg, caller, &args, false, services).await,
        Command::SetRole(args) => admin::handle_set_role(bot, msg, caller, &args, services).await,
        Command::RefPaid(args) => admin::handle_referral_paid(bot, msg, caller, &args, services).await,
        Command::NewPromo(args) => admin::handle_new_promo(bot, msg, caller, &args, services).await,
        Command::Promos => admin::handle_promos(bot, msg, caller, services).await,
        Command::DelPromo(args) => admin::handle_delete_promo(bot, msg, caller, &args, services).await,
        Command::Confirm(args) => admin::handle_confirm(bot, msg, caller, &args, services).await,
        Command::Resync => admin::handle_resync(bot, msg, services).await,
        Command::Stats => admin::handle_stats(bot, msg, caller, services).await,
        Command::Revenue => admin::handle_revenue(bot, msg, caller, services).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            Command::parse("/start INV_abc", "hiddify_bot").ok(),
            Some(Command::Start("INV_abc".to_string()))
        );
        assert_eq!(Command::parse("/status", "hiddify_bot").ok(), Some(Command::Status));
        assert_eq!(
            Command::parse("/setrole 42 manager", "hiddify_bot").ok(),
            Some(Command::SetRole("42 manager".to_string()))
        );
    }

    #[test]
    fn test_required_roles() {
        assert_eq!(Command::Start(String::new()).required_role(), None);
        assert_eq!(Command::Trial.required_role(), Some(Role::User));
        assert_eq!(Command::Invite(String::new()).required_role(), Some(Role::Manager));
        assert_eq!(Command::NewPromo(String::new()).required_role(), Some(Role::Admin));
    }

    #[test]
    fn test_parse_buy_args() {
        assert_eq!(
            parse_buy_args("Monthly stars SAVE10").unwrap(),
            BuyArgs {
                plan: "monthly".to_string(),
                provider: Some(PaymentProvider::TelegramStars),
                promo: Some("SAVE10".to_string()),
            }
        );
        assert_eq!(
            parse_buy_args("weekly SAVE10").unwrap(),
            BuyArgs { plan: "weekly".to_string(), provider: None, promo: Some("SAVE10".to_string()) }
        );
        assert_matches!(parse_buy_args(""), Err(BotError::Validation(_)));
        assert_matches!(parse_buy_args("weekly a b c"), Err(BotError::Validation(_)));
    }

    #[test]
    fn test_split_first() {
        assert_eq!(split_first("  12   hello there "), ("12", "hello there"));
        assert_eq!(split_first("12"), ("12", ""));
    }
}
