//! Support ticket command handlers

use teloxide::{Bot, types::Message, prelude::*};
use crate::handlers::commands::{parse_id, split_first};
use crate::middleware::Caller;
use crate::models::ticket::{SupportTicket, TicketCategory, TicketStatus};
use crate::services::ServiceFactory;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::{format_timestamp, truncate_text};

const TICKET_USAGE: &str = "Usage: /ticket <payment|connection|speed|account|other> <title> | <description>";

/// `<category> <title> | <description>`
pub(crate) fn parse_ticket_args(args: &str) -> Result<(TicketCategory, String, String)> {
    let (category, rest) = split_first(args);
    let category = category
        .parse::<TicketCategory>()
        .map_err(|_| BotError::Validation(TICKET_USAGE.to_string()))?;
    let (title, description) = rest
        .split_once('|')
        .ok_or_else(|| BotError::Validation(TICKET_USAGE.to_string()))?;
    Ok((category, title.trim().to_string(), description.trim().to_string()))
}

fn ticket_line(ticket: &SupportTicket) -> String {
    format!(
        "#{} [{}] {} - {}",
        ticket.id,
        ticket.status,
        truncate_text(&ticket.title, 60),
        format_timestamp(ticket.updated_at)
    )
}

pub async fn handle_ticket(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (category, title, description) = parse_ticket_args(args)?;
    let ticket = services
        .ticket_service
        .create_ticket(caller.telegram_id, category, &title, &description)
        .await?;
    bot.send_message(
        msg.chat.id,
        format!("Ticket #{} opened. We will reply here; add details with /reply {} <text>.", ticket.id, ticket.id),
    )
    .await?;
    Ok(())
}

pub async fn handle_reply(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (ticket_id, text) = split_first(args);
    let ticket_id = parse_id(ticket_id, "ticket id")?;
    services.ticket_service.reply(caller.telegram_id, ticket_id, text).await?;
    bot.send_message(msg.chat.id, format!("Reply added to ticket #{}.", ticket_id)).await?;
    Ok(())
}

/// `/tickets` lists your tickets, `/tickets open` the staff queue, `/tickets <id>` one conversation
pub async fn handle_tickets(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let tickets = &services.ticket_service;
    let args = args.trim();

    let text = match args {
        "" | "open" => {
            let list = if args.is_empty() {
                tickets.list_mine(caller.telegram_id).await?
            } else {
                tickets.list_open(caller.telegram_id).await?
            };
            if list.is_empty() {
                "No tickets.".to_string()
            } else {
                list.iter().map(ticket_line).collect::<Vec<_>>().join("\n")
            }
        }
        id => {
            let (ticket, messages) = tickets.conversation(caller.telegram_id, parse_id(id, "ticket id")?).await?;
            let mut lines = vec![ticket_line(&ticket), ticket.description.clone()];
            for message in messages {
                let author = if message.is_admin { "Support" } else { "You" };
                lines.push(format!("{}: {}", author, message.message));
            }
            lines.join("\n")
        }
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_ticket_status(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (ticket_id, status) = split_first(args);
    let ticket_id = parse_id(ticket_id, "ticket id")?;
    let status = status.parse::<TicketStatus>().map_err(BotError::Validation)?;
    let ticket = services.ticket_service.set_status(caller.telegram_id, ticket_id, status).await?;
    bot.send_message(msg.chat.id, format!("Ticket #{} is now {}.", ticket.id, ticket.status)).await?;
    Ok(())
}

pub async fn handle_note(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (ticket_id, notes) = split_first(args);
    let ticket_id = parse_id(ticket_id, "ticket id")?;
    services.ticket_service.add_note(caller.telegram_id, ticket_id, notes).await?;
    bot.send_message(msg.chat.id, format!("Note saved on ticket #{}.", ticket_id)).await?;
    Ok(())
}
