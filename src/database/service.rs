//! Database service layer
//!
//! This module provides a high-level interface to the entitlement store

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use crate::database::{
    DatabasePool, UserRepository, InviteRepository, ReferralRepository, SubscriptionRepository,
    PaymentRepository, PromoRepository, TicketRepository,
};
use crate::models::*;
use crate::utils::errors::BotError;

#[derive(Debug, Clone)]
pub struct DatabaseService {
    pool: DatabasePool,
    pub users: UserRepository,
    pub invites: InviteRepository,
    pub referrals: ReferralRepository,
    pub subscriptions: SubscriptionRepository,
    pub payments: PaymentRepository,
    pub promos: PromoRepository,
    pub tickets: TicketRepository,
}

impl DatabaseService {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            invites: InviteRepository::new(pool.clone()),
            referrals: ReferralRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            promos: PromoRepository::new(pool.clone()),
            tickets: TicketRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Start a transaction for a multi-step store operation
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, BotError> {
        Ok(self.pool.begin().await?)
    }

    /// Fetch a user, creating it on first contact
    pub async fn get_or_create_user(&self, telegram_id: i64, username: Option<String>, first_name: Option<String>) -> Result<User, BotError> {
        self.users
            .get_or_create(CreateUserRequest { telegram_id, username, first_name })
            .await
    }

    /// Redeem an invite for `user_id`, consuming at most one use per user
    ///
    /// The redemption row and the use counter change in one transaction; a
    /// repeat by the same user reports `AlreadyRedeemed` without touching the
    /// counter. The inviter is recorded on first redemption.
    pub async fn apply_invite(&self, code: &str, user_id: i64) -> Result<InviteUseOutcome, BotError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let invite = InviteRepository::find_by_code_in(&mut tx, code)
            .await?
            .ok_or_else(|| BotError::not_found("Invite", code))?;

        if InviteRepository::insert_redemption(&mut tx, invite.id, user_id).await?.is_none() {
            tx.commit().await?;
            return Ok(InviteUseOutcome::AlreadyRedeemed(invite));
        }

        let invite = InviteRepository::apply_invite_with(&mut tx, code, now).await?;
        if invite.created_by != Some(user_id) {
            UserRepository::set_invited_by(&mut tx, user_id, invite.created_by).await?;
        }
        tx.commit().await?;

        Ok(InviteUseOutcome::Redeemed(invite))
    }

    /// Register `referred_id` as referred by `referrer_id`
    pub async fn create_referral(&self, referrer_id: i64, referred_id: i64, bonus_amount: Decimal) -> Result<Referral, BotError> {
        self.referrals.create(referrer_id, referred_id, bonus_amount).await
    }

    /// Record a single promo redemption by a user
    pub async fn record_promo_usage(&self, promo_code_id: i64, user_id: i64) -> Result<PromoUsage, BotError> {
        self.promos.record_usage(promo_code_id, user_id).await
    }
}
