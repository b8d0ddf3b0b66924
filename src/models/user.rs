//! User model

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use crate::models::subscription::SubscriptionStatus;
use crate::utils::helpers::bytes_from_db;

/// Access level; ordered so that `User < Manager < Admin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn is_manager(self) -> bool {
        self >= Role::Manager
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub role: Role,
    pub is_blocked: bool,
    pub data_limit_bytes: i64,
    pub used_bytes: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    pub trial_expiry: Option<DateTime<Utc>>,
    pub trial_activated: bool,
    pub invited_by: Option<i64>,
    pub panel_uuid: Option<String>,
    pub panel_sync_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a user is currently allowed to consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub status: Option<SubscriptionStatus>,
    pub expires_at: Option<DateTime<Utc>>,
    pub data_limit_bytes: u64,
    pub used_bytes: u64,
    pub is_trial: bool,
}

impl Entitlement {
    pub fn is_live(&self) -> bool {
        matches!(self.status, Some(SubscriptionStatus::Active) | Some(SubscriptionStatus::Trial))
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.data_limit_bytes.saturating_sub(self.used_bytes)
    }
}

impl User {
    pub fn data_limit(&self) -> u64 {
        bytes_from_db(self.data_limit_bytes)
    }

    pub fn used(&self) -> u64 {
        bytes_from_db(self.used_bytes)
    }

    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.telegram_id.to_string())
    }

    /// Entitlement derived from the user row at `now`
    ///
    /// Expiry is evaluated lazily: an entitlement past `expires_at` reports
    /// `Expired` whether or not the row has been swept.
    pub fn entitlement(&self, now: DateTime<Utc>) -> Entitlement {
        let status = match self.expires_at {
            None => None,
            Some(expires_at) if expires_at <= now => Some(SubscriptionStatus::Expired),
            Some(_) if self.is_trial => Some(SubscriptionStatus::Trial),
            Some(_) => Some(SubscriptionStatus::Active),
        };

        Entitlement {
            status,
            expires_at: self.expires_at,
            data_limit_bytes: self.data_limit(),
            used_bytes: self.used(),
            is_trial: self.is_trial,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct UserStats {
    pub total: i64,
    pub active: i64,
    pub trial: i64,
    pub blocked: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: 1,
            telegram_id: 100,
            username: Some("alice".to_string()),
            first_name: None,
            role: Role::User,
            is_blocked: false,
            data_limit_bytes: 0,
            used_bytes: 0,
            expires_at: None,
            is_trial: false,
            trial_expiry: None,
            trial_activated: false,
            invited_by: None,
            panel_uuid: None,
            panel_sync_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::User < Role::Manager);
        assert!(Role::Manager < Role::Admin);
        assert!(Role::Admin.is_manager());
        assert!(!Role::User.is_manager());
        assert_eq!("Manager".parse::<Role>(), Ok(Role::Manager));
    }

    #[test]
    fn test_entitlement_without_subscription() {
        let user = sample_user();
        let ent = user.entitlement(Utc::now());
        assert_eq!(ent.status, None);
        assert!(!ent.is_live());
    }

    #[test]
    fn test_entitlement_expires_lazily() {
        let now = Utc::now();
        let mut user = sample_user();
        user.expires_at = Some(now - Duration::seconds(1));
        user.data_limit_bytes = 10;
        assert_eq!(user.entitlement(now).status, Some(SubscriptionStatus::Expired));

        user.expires_at = Some(now + Duration::days(1));
        user.is_trial = true;
        assert_eq!(user.entitlement(now).status, Some(SubscriptionStatus::Trial));
        assert_eq!(user.entitlement(now).remaining_bytes(), 10);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut user = sample_user();
        assert_eq!(user.display_name(), "alice");
        user.username = None;
        assert_eq!(user.display_name(), "100");
    }
}
