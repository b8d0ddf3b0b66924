//! Support tickets

use chrono::Utc;
use tracing::info;
use crate::config::settings::Settings;
use crate::database::{DatabaseService, TicketRepository};
use crate::models::ticket::{
    CreateTicketRequest, SupportTicket, TicketCategory, TicketMessage, TicketStatus, TICKET_DESCRIPTION_MIN_LEN,
    TICKET_MESSAGE_MAX_LEN, TICKET_TITLE_MAX_LEN, TICKET_TITLE_MIN_LEN,
};
use crate::models::user::{Role, User};
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::normalize_whitespace;
use crate::utils::logging::{log_admin_action, log_user_action};

fn validate_ticket(title: &str, description: &str) -> Result<()> {
    let title_len = title.chars().count();
    if !(TICKET_TITLE_MIN_LEN..=TICKET_TITLE_MAX_LEN).contains(&title_len) {
        return Err(BotError::Validation(format!(
            "Title must be {}-{} characters long.",
            TICKET_TITLE_MIN_LEN, TICKET_TITLE_MAX_LEN
        )));
    }
    if description.chars().count() < TICKET_DESCRIPTION_MIN_LEN {
        return Err(BotError::Validation(format!(
            "Please describe the problem in at least {} characters.",
            TICKET_DESCRIPTION_MIN_LEN
        )));
    }
    Ok(())
}

fn validate_message(message: &str) -> Result<()> {
    let len = message.chars().count();
    if len == 0 || len > TICKET_MESSAGE_MAX_LEN {
        return Err(BotError::Validation(format!(
            "Message must be 1-{} characters long.",
            TICKET_MESSAGE_MAX_LEN
        )));
    }
    Ok(())
}

/// Status a ticket moves to when someone replies, if any
fn status_after_reply(current: TicketStatus, from_staff: bool) -> Option<TicketStatus> {
    match (current, from_staff) {
        (TicketStatus::Open, true) => Some(TicketStatus::InProgress),
        (TicketStatus::Resolved, false) => Some(TicketStatus::Open),
        _ => None,
    }
}

#[derive(Clone)]
pub struct TicketService {
    db: DatabaseService,
    users: UserService,
    max_open_tickets: i64,
}

impl TicketService {
    pub fn new(db: DatabaseService, users: UserService, settings: &Settings) -> Self {
        Self { db, users, max_open_tickets: i64::from(settings.support.max_open_tickets) }
    }

    pub async fn create_ticket(
        &self,
        telegram_id: i64,
        category: TicketCategory,
        title: &str,
        description: &str,
    ) -> Result<SupportTicket> {
        let user = self.users.ensure_active(telegram_id).await?;
        let title = normalize_whitespace(title);
        let description = description.trim().to_string();
        validate_ticket(&title, &description)?;

        let request = CreateTicketRequest { user_id: user.id, category, title, description };

        let mut tx = self.db.begin().await?;
        let open = TicketRepository::count_open(&mut tx, user.id).await?;
        if open >= self.max_open_tickets {
            return Err(BotError::Validation(format!(
                "You already have {} open tickets. Please wait for an answer.",
                open
            )));
        }
        let ticket = TicketRepository::insert(&mut tx, &request, category.default_priority()).await?;
        tx.commit().await?;

        log_user_action(telegram_id, "open_ticket", Some(&ticket.id.to_string()));
        info!(ticket_id = ticket.id, telegram_id, priority = ?ticket.priority, "Ticket opened");
        Ok(ticket)
    }

    /// Ticket visible to the caller: their own, or any for managers
    async fn visible_ticket(&self, user: &User, ticket_id: i64) -> Result<(SupportTicket, bool)> {
        let ticket = self
            .db
            .tickets
            .find_by_id(ticket_id)
            .await?
            .ok_or_else(|| BotError::not_found("Ticket", ticket_id))?;
        let staff = self.users.effective_role(user).is_manager();
        if ticket.user_id != user.id && !staff {
            return Err(BotError::not_found("Ticket", ticket_id));
        }
        let foreign = staff && ticket.user_id != user.id;
        Ok((ticket, foreign))
    }

    /// Append a reply and move the ticket along
    pub async fn reply(&self, telegram_id: i64, ticket_id: i64, message: &str) -> Result<TicketMessage> {
        let user = self.users.ensure_active(telegram_id).await?;
        let message = message.trim();
        validate_message(message)?;

        let (ticket, from_staff) = self.visible_ticket(&user, ticket_id).await?;
        if ticket.status == TicketStatus::Closed {
            return Err(BotError::InvalidStateTransition {
                from: ticket.status.to_string(),
                to: "reply".to_string(),
            });
        }

        let reply = self.db.tickets.add_message(ticket.id, user.id, message, from_staff).await?;
        if let Some(next) = status_after_reply(ticket.status, from_staff) {
            // a lost race only means someone else already moved the ticket
            self.db.tickets.update_status(ticket.id, ticket.status, next, None).await?;
        }

        if from_staff {
            log_admin_action(telegram_id, "ticket_reply", Some(&ticket_id.to_string()), None);
        } else {
            log_user_action(telegram_id, "ticket_reply", Some(&ticket_id.to_string()));
        }
        Ok(reply)
    }

    /// Move a ticket to `status` (managers, or the owner closing their own)
    pub async fn set_status(&self, actor_telegram_id: i64, ticket_id: i64, status: TicketStatus) -> Result<SupportTicket> {
        let actor = self.users.ensure_active(actor_telegram_id).await?;
        let (ticket, _) = self.visible_ticket(&actor, ticket_id).await?;
        let staff = self.users.effective_role(&actor) >= Role::Manager;
        if !staff && status != TicketStatus::Closed {
            return Err(BotError::PermissionDenied("only support staff can change ticket status".to_string()));
        }
        if !ticket.status.can_transition_to(status) {
            return Err(BotError::InvalidStateTransition {
                from: ticket.status.to_string(),
                to: status.to_string(),
            });
        }

        let resolved_at = matches!(status, TicketStatus::Resolved | TicketStatus::Closed).then(Utc::now);
        let updated = self
            .db
            .tickets
            .update_status(ticket.id, ticket.status, status, resolved_at)
            .await?
            .ok_or_else(|| BotError::InvalidStateTransition {
                from: ticket.status.to_string(),
                to: status.to_string(),
            })?;

        log_admin_action(actor_telegram_id, "ticket_status", Some(&ticket_id.to_string()), Some(&status.to_string()));
        Ok(updated)
    }

    pub async fn add_note(&self, actor_telegram_id: i64, ticket_id: i64, notes: &str) -> Result<SupportTicket> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;
        self.db
            .tickets
            .set_admin_notes(ticket_id, notes.trim())
            .await?
            .ok_or_else(|| BotError::not_found("Ticket", ticket_id))
    }

    pub async fn list_mine(&self, telegram_id: i64) -> Result<Vec<SupportTicket>> {
        let user = self.users.ensure_active(telegram_id).await?;
        self.db.tickets.list_for_user(user.id, 20).await
    }

    pub async fn list_open(&self, actor_telegram_id: i64) -> Result<Vec<SupportTicket>> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;
        self.db.tickets.list_open(50).await
    }

    pub async fn conversation(&self, telegram_id: i64, ticket_id: i64) -> Result<(SupportTicket, Vec<TicketMessage>)> {
        let user = self.users.ensure_active(telegram_id).await?;
        let (ticket, _) = self.visible_ticket(&user, ticket_id).await?;
        let messages = self.db.tickets.list_messages(ticket.id).await?;
        Ok((ticket, messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_ticket_validation() {
        assert!(validate_ticket("VPN down", "It stopped working this morning").is_ok());
        assert_matches!(validate_ticket("no", "It stopped working this morning"), Err(BotError::Validation(_)));
        assert_matches!(validate_ticket(&"x".repeat(201), "It stopped working"), Err(BotError::Validation(_)));
        assert_matches!(validate_ticket("VPN down", "broken"), Err(BotError::Validation(_)));
    }

    #[test]
    fn test_message_bounds() {
        assert!(validate_message("ok").is_ok());
        assert!(validate_message(&"я".repeat(TICKET_MESSAGE_MAX_LEN)).is_ok());
        assert!(validate_message("").is_err());
        assert!(validate_message(&"x".repeat(TICKET_MESSAGE_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_reply_transitions() {
        assert_eq!(status_after_reply(TicketStatus::Open, true), Some(TicketStatus::InProgress));
        assert_eq!(status_after_reply(TicketStatus::Resolved, false), Some(TicketStatus::Open));
        assert_eq!(status_after_reply(TicketStatus::Open, false), None);
        assert_eq!(status_after_reply(TicketStatus::InProgress, true), None);
    }
}
