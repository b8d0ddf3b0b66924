//! Referral model

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

/// `pending` until the referred user's first completed payment, `active`
/// once the bonus is earned, `paid` once a manager records the payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "referral_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Active,
    Paid,
    Cancelled,
}

impl ReferralStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Active => "active",
            ReferralStatus::Paid => "paid",
            ReferralStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub status: ReferralStatus,
    pub bonus_amount: Decimal,
    pub payment_id: Option<i64>,
    pub activated_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReferralStats {
    pub total_referrals: i64,
    pub active_referrals: i64,
    pub total_earned: Decimal,
    pub pending_bonus: Decimal,
}
