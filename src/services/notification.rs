//! Outcome notifications
//!
//! Services report what happened as `OutcomeEvent`s; a sink decides how the
//! user (and, for operational events, the admins) hear about it. Delivery is
//! best effort and never affects the stored outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use teloxide::{prelude::*, types::ChatId};
use tracing::{debug, info, warn};
use crate::utils::helpers::format_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeEvent {
    TrialActivated { telegram_id: i64, expires_at: DateTime<Utc> },
    SubscriptionActivated { telegram_id: i64, plan_code: String, expires_at: DateTime<Utc> },
    PaymentFailed { telegram_id: i64, provider_payment_id: String, status: String },
    InviteRedeemed { telegram_id: i64, code: String, inviter_telegram_id: Option<i64> },
    ReferralBonusEarned { referrer_telegram_id: i64, amount: Decimal },
    ProvisioningDeferred { telegram_id: i64, reason: String },
}

impl OutcomeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeEvent::TrialActivated { .. } => "trial_activated",
            OutcomeEvent::SubscriptionActivated { .. } => "subscription_activated",
            OutcomeEvent::PaymentFailed { .. } => "payment_failed",
            OutcomeEvent::InviteRedeemed { .. } => "invite_redeemed",
            OutcomeEvent::ReferralBonusEarned { .. } => "referral_bonus_earned",
            OutcomeEvent::ProvisioningDeferred { .. } => "provisioning_deferred",
        }
    }

    /// Chat that should hear about the event
    pub fn recipient(&self) -> i64 {
        match self {
            OutcomeEvent::TrialActivated { telegram_id, .. }
            | OutcomeEvent::SubscriptionActivated { telegram_id, .. }
            | OutcomeEvent::PaymentFailed { telegram_id, .. }
            | OutcomeEvent::InviteRedeemed { telegram_id, .. }
            | OutcomeEvent::ProvisioningDeferred { telegram_id, .. } => *telegram_id,
            OutcomeEvent::ReferralBonusEarned { referrer_telegram_id, .. } => *referrer_telegram_id,
        }
    }

    /// Events the operators should also see
    pub fn is_operational(&self) -> bool {
        matches!(self, OutcomeEvent::ProvisioningDeferred { .. })
    }

    pub fn message(&self) -> String {
        match self {
            OutcomeEvent::TrialActivated { expires_at, .. } => {
                format!("Your free trial is active until {}.", format_timestamp(*expires_at))
            }
            OutcomeEvent::SubscriptionActivated { plan_code, expires_at, .. } => {
                format!("Payment received. Plan {} is active until {}.", plan_code, format_timestamp(*expires_at))
            }
            OutcomeEvent::PaymentFailed { provider_payment_id, status, .. } => {
                format!("Payment {} was not completed ({}).", provider_payment_id, status)
            }
            OutcomeEvent::InviteRedeemed { code, .. } => format!("Invite {} accepted. Welcome!", code),
            OutcomeEvent::ReferralBonusEarned { amount, .. } => {
                format!("A friend you invited has paid. You earned a bonus of {}.", amount)
            }
            OutcomeEvent::ProvisioningDeferred { .. } => {
                "Your subscription is saved. VPN access is being set up and will be ready shortly.".to_string()
            }
        }
    }
}

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn emit(&self, event: OutcomeEvent);
}

/// Sends one-line messages through the bot
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    admin_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, admin_ids: Vec<i64>) -> Self {
        Self { bot, admin_ids }
    }

    async fn send(&self, chat_id: i64, text: String) {
        match self.bot.send_message(ChatId(chat_id), text).await {
            Ok(_) => debug!(chat_id, "Notification sent"),
            Err(e) => warn!(chat_id, error = %e, "Failed to send notification"),
        }
    }
}

#[async_trait]
impl OutcomeSink for TelegramNotifier {
    async fn emit(&self, event: OutcomeEvent) {
        info!(event = event.name(), recipient = event.recipient(), "Outcome event");
        self.send(event.recipient(), event.message()).await;

        if let OutcomeEvent::ProvisioningDeferred { telegram_id, reason } = &event {
            let text = format!("Panel provisioning deferred for user {}: {}. Run /resync.", telegram_id, reason);
            for admin_id in &self.admin_ids {
                self.send(*admin_id, text.clone()).await;
            }
        }
    }
}

/// Records events in the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlySink;

#[async_trait]
impl OutcomeSink for LogOnlySink {
    async fn emit(&self, event: OutcomeEvent) {
        info!(event = event.name(), recipient = event.recipient(), message = %event.message(), "Outcome event");
    }
}
