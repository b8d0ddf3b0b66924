//! Support ticket repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use crate::models::ticket::{SupportTicket, TicketMessage, TicketPriority, TicketStatus, CreateTicketRequest};
use crate::utils::errors::BotError;

const TICKET_COLUMNS: &str = "id, user_id, category, priority, status, title, description, admin_notes, \
    resolved_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct TicketRepository {
    pool: PgPool,
}

impl TicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn count_open(conn: &mut PgConnection, user_id: i64) -> Result<i64, BotError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM support_tickets WHERE user_id = $1 AND status IN ('open', 'in_progress')"
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(count.0)
    }

    pub async fn insert(conn: &mut PgConnection, request: &CreateTicketRequest, priority: TicketPriority) -> Result<SupportTicket, BotError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(&format!(
            r#"
            INSERT INTO support_tickets (user_id, category, priority, status, title, description, created_at, updated_at)
            VALUES ($1, $2, $3, 'open', $4, $5, $6, $6)
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.category)
        .bind(priority)
        .bind(&request.title)
        .bind(&request.description)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(ticket)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<SupportTicket>, BotError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(&format!("SELECT {TICKET_COLUMNS} FROM support_tickets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(ticket)
    }

    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<SupportTicket>, BotError> {
        let tickets = sqlx::query_as::<_, SupportTicket>(&format!(
            "SELECT {TICKET_COLUMNS} FROM support_tickets WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    /// Open and in-progress tickets, most urgent first
    pub async fn list_open(&self, limit: i64) -> Result<Vec<SupportTicket>, BotError> {
        let tickets = sqlx::query_as::<_, SupportTicket>(&format!(
            r#"
            SELECT {TICKET_COLUMNS} FROM support_tickets
            WHERE status IN ('open', 'in_progress')
            ORDER BY priority DESC, created_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    /// Compare-and-set the ticket status
    pub async fn update_status(
        &self,
        id: i64,
        expected: TicketStatus,
        status: TicketStatus,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Result<Option<SupportTicket>, BotError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(&format!(
            r#"
            UPDATE support_tickets
            SET status = $3, resolved_at = $4, updated_at = $5
            WHERE id = $1 AND status = $2
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected)
        .bind(status)
        .bind(resolved_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    pub async fn set_admin_notes(&self, id: i64, notes: &str) -> Result<Option<SupportTicket>, BotError> {
        let ticket = sqlx::query_as::<_, SupportTicket>(&format!(
            "UPDATE support_tickets SET admin_notes = $2, updated_at = $3 WHERE id = $1 RETURNING {TICKET_COLUMNS}"
        ))
        .bind(id)
        .bind(notes)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    /// Append a message; messages are never edited
    pub async fn add_message(&self, ticket_id: i64, user_id: i64, message: &str, is_admin: bool) -> Result<TicketMessage, BotError> {
        let message = sqlx::query_as::<_, TicketMessage>(
            r#"
            INSERT INTO ticket_messages (ticket_id, user_id, message, is_admin, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, ticket_id, user_id, message, is_admin, created_at
            "#
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(message)
        .bind(is_admin)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    pub async fn list_messages(&self, ticket_id: i64) -> Result<Vec<TicketMessage>, BotError> {
        let messages = sqlx::query_as::<_, TicketMessage>(
            r#"
            SELECT id, ticket_id, user_id, message, is_admin, created_at
            FROM ticket_messages
            WHERE ticket_id = $1
            ORDER BY created_at, id
            "#
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
