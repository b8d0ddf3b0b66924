//! Support ticket models

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

pub const TICKET_TITLE_MIN_LEN: usize = 3;
pub const TICKET_TITLE_MAX_LEN: usize = 200;
pub const TICKET_DESCRIPTION_MIN_LEN: usize = 10;
pub const TICKET_MESSAGE_MAX_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketCategory {
    Payment,
    Connection,
    Speed,
    Account,
    Other,
}

impl TicketCategory {
    /// Default priority for a freshly opened ticket
    pub fn default_priority(self) -> TicketPriority {
        match self {
            TicketCategory::Payment | TicketCategory::Connection => TicketPriority::High,
            _ => TicketPriority::Normal,
        }
    }
}

impl FromStr for TicketCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "payment" => Ok(TicketCategory::Payment),
            "connection" => Ok(TicketCategory::Connection),
            "speed" => Ok(TicketCategory::Speed),
            "account" => Ok(TicketCategory::Account),
            "other" => Ok(TicketCategory::Other),
            other => Err(format!("unknown ticket category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Open, InProgress) | (Open, Resolved) | (InProgress, Resolved) | (Resolved, Open) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        })
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" | "progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SupportTicket {
    pub id: i64,
    pub user_id: i64,
    pub category: TicketCategory,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub title: String,
    pub description: String,
    pub admin_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: i64,
    pub message: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub user_id: i64,
    pub category: TicketCategory,
    pub title: String,
    pub description: String,
}
