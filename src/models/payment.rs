//! Payment model

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    #[sqlx(rename = "cryptobot")]
    #[serde(rename = "cryptobot")]
    CryptoBot,
    TelegramStars,
    #[sqlx(rename = "yoomoney")]
    #[serde(rename = "yoomoney")]
    YooMoney,
    Promo,
    /// Deprecated; kept so historical rows still decode
    Stripe,
}

impl PaymentProvider {
    pub const ALL: [PaymentProvider; 5] = [
        PaymentProvider::CryptoBot,
        PaymentProvider::TelegramStars,
        PaymentProvider::YooMoney,
        PaymentProvider::Promo,
        PaymentProvider::Stripe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::CryptoBot => "cryptobot",
            PaymentProvider::TelegramStars => "telegram_stars",
            PaymentProvider::YooMoney => "yoomoney",
            PaymentProvider::Promo => "promo",
            PaymentProvider::Stripe => "stripe",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cryptobot" | "crypto" => Ok(PaymentProvider::CryptoBot),
            "telegram_stars" | "stars" => Ok(PaymentProvider::TelegramStars),
            "yoomoney" => Ok(PaymentProvider::YooMoney),
            "promo" => Ok(PaymentProvider::Promo),
            "stripe" => Ok(PaymentProvider::Stripe),
            other => Err(format!("unknown payment provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    /// Terminal statuses are never re-applied
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn is_success(self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub plan_code: String,
    pub duration_days: i32,
    pub data_limit_bytes: i64,
    pub promo_code_id: Option<i64>,
    pub promo_code: Option<String>,
    pub referral_id: Option<i64>,
    pub commission_amount: Option<Decimal>,
    /// Provider's own charge reference, kept for refunds (Stars `telegram_payment_charge_id`)
    pub provider_charge_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new pending payment; the plan is snapshotted at checkout
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: i64,
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub currency: String,
    pub plan_code: String,
    pub duration_days: i32,
    pub data_limit_bytes: i64,
    pub promo_code_id: Option<i64>,
    pub promo_code: Option<String>,
    pub referral_id: Option<i64>,
}

/// Result of feeding a provider event into reconciliation
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    /// Entitlement expiry after the payment was applied, for completed payments
    pub expires_at: Option<DateTime<Utc>>,
    /// True when the stored status was already terminal and nothing was applied
    pub replayed: bool,
    /// True when the panel could not be updated and a resync is queued
    pub provisioning_deferred: bool,
}
