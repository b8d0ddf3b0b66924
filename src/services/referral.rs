//! Referral program

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use crate::config::settings::Settings;
use crate::database::DatabaseService;
use crate::models::referral::{Referral, ReferralStats};
use crate::models::user::Role;
use crate::services::cache::{CacheScope, CacheService};
use crate::services::guard::{IdempotencyKey, KeyedLocks};
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::{parse_referral_payload, referral_link};
use crate::utils::logging::{log_admin_action, log_user_action};

#[derive(Clone)]
pub struct ReferralService {
    db: DatabaseService,
    users: UserService,
    cache: CacheService,
    locks: KeyedLocks,
    bot_username: String,
    bonus_amount: Decimal,
    enabled: bool,
}

impl ReferralService {
    pub fn new(db: DatabaseService, users: UserService, cache: CacheService, locks: KeyedLocks, settings: &Settings) -> Self {
        Self {
            db,
            users,
            cache,
            locks,
            bot_username: settings.bot.username.clone(),
            bonus_amount: settings.referral.bonus_amount,
            enabled: settings.features.referral_system,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Personal deep link a user shares with friends
    pub fn link(&self, telegram_id: i64) -> String {
        referral_link(&self.bot_username, telegram_id)
    }

    /// Register the user as referred by whoever the `ref_<id>` payload names
    pub async fn register_from_payload(&self, telegram_id: i64, payload: &str) -> Result<Referral> {
        if !self.enabled {
            return Err(BotError::Validation("The referral program is turned off.".to_string()));
        }
        let referrer_telegram_id = parse_referral_payload(payload)
            .ok_or_else(|| BotError::Validation(format!("Malformed referral link: {}", payload)))?;
        if referrer_telegram_id == telegram_id {
            return Err(BotError::SelfReferral);
        }

        let referred = self.users.ensure_active(telegram_id).await?;
        if self.db.payments.has_completed(referred.id).await? {
            return Err(BotError::Validation(
                "Referral links only work for users who have not bought a plan yet.".to_string(),
            ));
        }
        let referrer = self
            .db
            .users
            .find_by_telegram_id(referrer_telegram_id)
            .await?
            .ok_or_else(|| BotError::not_found("User", referrer_telegram_id))?;

        let _guard = self.locks.acquire(IdempotencyKey::Referral { referred_id: referred.id }).await;
        let referral = self.db.create_referral(referrer.id, referred.id, self.bonus_amount).await?;

        self.cache
            .invalidate(CacheScope::ReferralStats, &referrer_telegram_id.to_string())
            .await;
        log_user_action(telegram_id, "referred", Some(&referrer_telegram_id.to_string()));
        info!(referral_id = referral.id, referrer_telegram_id, telegram_id, "Referral registered");
        Ok(referral)
    }

    /// Aggregated referral numbers for a referrer
    pub async fn get_referral_stats(&self, telegram_id: i64) -> Result<ReferralStats> {
        let key = telegram_id.to_string();
        if let Some(stats) = self.cache.get::<ReferralStats>(CacheScope::ReferralStats, &key).await {
            return Ok(stats);
        }

        let user = self.users.ensure_active(telegram_id).await?;
        let stats = self.db.referrals.stats(user.id).await?;
        self.cache.set(CacheScope::ReferralStats, &key, &stats).await;
        Ok(stats)
    }

    pub async fn list_mine(&self, telegram_id: i64) -> Result<Vec<Referral>> {
        let user = self.users.ensure_active(telegram_id).await?;
        self.db.referrals.list_by_referrer(user.id, 50).await
    }

    /// Record that an earned bonus was paid out (active -> paid)
    pub async fn mark_referral_paid(&self, actor_telegram_id: i64, referral_id: i64) -> Result<Referral> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;

        let referral = match self.db.referrals.mark_paid(referral_id, Utc::now()).await? {
            Some(referral) => referral,
            None => {
                let current = self
                    .db
                    .referrals
                    .find_by_id(referral_id)
                    .await?
                    .ok_or_else(|| BotError::not_found("Referral", referral_id))?;
                return Err(BotError::InvalidStateTransition {
                    from: current.status.as_str().to_string(),
                    to: "paid".to_string(),
                });
            }
        };

        if let Some(referrer) = self.db.users.find_by_id(referral.referrer_id).await? {
            self.cache
                .invalidate(CacheScope::ReferralStats, &referrer.telegram_id.to_string())
                .await;
        }
        log_admin_action(
            actor_telegram_id,
            "mark_referral_paid",
            Some(&referral_id.to_string()),
            Some(&referral.bonus_amount.to_string()),
        );
        Ok(referral)
    }
}
