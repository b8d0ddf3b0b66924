//! Subscription model and lifecycle transitions

use std::fmt;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Trial,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Trial, Expired)
                | (Trial, Cancelled)
                | (Active, Expired)
                | (Active, Cancelled)
                | (Expired, Pending)
                | (Cancelled, Pending)
        )
    }

    /// Stored names of the `from` statuses the lifecycle lets move to `next`
    ///
    /// Status-changing queries bind this as their source filter.
    pub fn allowed_sources(from: &[SubscriptionStatus], next: SubscriptionStatus) -> Vec<&'static str> {
        from.iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .map(SubscriptionStatus::as_str)
            .collect()
    }

    pub fn is_live(self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub data_limit_bytes: i64,
    pub used_bytes: i64,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub payment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Status with lazy expiry applied
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match (self.status, self.expires_at) {
            (status, Some(expires_at)) if status.is_live() && expires_at <= now => {
                SubscriptionStatus::Expired
            }
            (status, _) => status,
        }
    }
}

/// Starting point for a paid period: stack onto a live entitlement, else start now
pub fn renewal_base(now: DateTime<Utc>, current_expiry: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match current_expiry {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use SubscriptionStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Expired));
        assert!(Trial.can_transition_to(Cancelled));
        assert!(Expired.can_transition_to(Pending));
        assert!(Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn test_forbidden_transitions() {
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Trial.can_transition_to(Trial));
        assert!(!Pending.can_transition_to(Trial));
    }

    #[test]
    fn test_allowed_sources_drop_forbidden_moves() {
        assert_eq!(SubscriptionStatus::allowed_sources(&[Trial, Active], Expired), vec!["trial", "active"]);
        assert_eq!(SubscriptionStatus::allowed_sources(&[Pending, Expired, Cancelled], Active), vec!["pending"]);
        assert!(SubscriptionStatus::allowed_sources(&[Expired, Cancelled], Cancelled).is_empty());
    }

    #[test]
    fn test_renewal_base_stacks_on_future_expiry() {
        let now = Utc::now();
        let future = now + Duration::days(10);
        assert_eq!(renewal_base(now, Some(future)), future);
        assert_eq!(renewal_base(now, Some(now - Duration::days(1))), now);
        assert_eq!(renewal_base(now, None), now);
    }

    #[test]
    fn test_effective_status() {
        let now = Utc::now();
        let mut sub = Subscription {
            id: 1,
            user_id: 1,
            plan_code: "monthly".to_string(),
            status: Active,
            data_limit_bytes: 0,
            used_bytes: 0,
            started_at: now - Duration::days(31),
            expires_at: Some(now - Duration::days(1)),
            cancelled_at: None,
            auto_renew: false,
            payment_id: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(sub.effective_status(now), Expired);

        sub.status = Cancelled;
        assert_eq!(sub.effective_status(now), Cancelled);

        sub.status = Pending;
        sub.expires_at = None;
        assert_eq!(sub.effective_status(now), Pending);
    }
}
