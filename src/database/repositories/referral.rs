//! Referral repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use crate::database::connection::{is_foreign_key_violation, is_unique_violation};
use crate::models::referral::{Referral, ReferralStats};
use crate::utils::errors::BotError;

const REFERRAL_COLUMNS: &str = "id, referrer_id, referred_id, status, bonus_amount, payment_id, \
    activated_at, paid_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a pending referral
    ///
    /// A user can be referred only once; the unique constraint on
    /// `referred_id` decides races between concurrent attempts.
    pub async fn create(&self, referrer_id: i64, referred_id: i64, bonus_amount: Decimal) -> Result<Referral, BotError> {
        if referrer_id == referred_id {
            return Err(BotError::SelfReferral);
        }

        sqlx::query_as::<_, Referral>(&format!(
            r#"
            INSERT INTO referrals (referrer_id, referred_id, status, bonus_amount, created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $4)
            RETURNING {REFERRAL_COLUMNS}
            "#
        ))
        .bind(referrer_id)
        .bind(referred_id)
        .bind(bonus_amount)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BotError::AlreadyReferred { referred_id }
            } else if is_foreign_key_violation(&e) {
                BotError::not_found("User", referrer_id)
            } else {
                BotError::Database(e)
            }
        })
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Referral>, BotError> {
        let referral = sqlx::query_as::<_, Referral>(&format!("SELECT {REFERRAL_COLUMNS} FROM referrals WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(referral)
    }

    /// Pending referral of a user, if any
    pub async fn find_pending_for_referred(&self, referred_id: i64) -> Result<Option<Referral>, BotError> {
        let referral = sqlx::query_as::<_, Referral>(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referred_id = $1 AND status = 'pending'"
        ))
        .bind(referred_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }

    /// pending -> active, tied to the payment that earned the bonus
    pub async fn activate(conn: &mut PgConnection, referral_id: i64, payment_id: i64, now: DateTime<Utc>) -> Result<Option<Referral>, BotError> {
        let referral = sqlx::query_as::<_, Referral>(&format!(
            r#"
            UPDATE referrals
            SET status = 'active', payment_id = $2, activated_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {REFERRAL_COLUMNS}
            "#
        ))
        .bind(referral_id)
        .bind(payment_id)
        .bind(now)
        .fetch_optional(conn)
        .await?;

        Ok(referral)
    }

    /// active -> paid
    pub async fn mark_paid(&self, referral_id: i64, now: DateTime<Utc>) -> Result<Option<Referral>, BotError> {
        let referral = sqlx::query_as::<_, Referral>(&format!(
            r#"
            UPDATE referrals
            SET status = 'paid', paid_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'active'
            RETURNING {REFERRAL_COLUMNS}
            "#
        ))
        .bind(referral_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(referral)
    }

    /// Aggregate a referrer's referrals in one grouped read
    pub async fn stats(&self, referrer_id: i64) -> Result<ReferralStats, BotError> {
        let stats = sqlx::query_as::<_, ReferralStats>(
            r#"
            SELECT COUNT(*) AS total_referrals,
                   COUNT(*) FILTER (WHERE status IN ('active', 'paid')) AS active_referrals,
                   COALESCE(SUM(bonus_amount) FILTER (WHERE status IN ('active', 'paid')), 0) AS total_earned,
                   COALESCE(SUM(bonus_amount) FILTER (WHERE status = 'pending'), 0) AS pending_bonus
            FROM referrals
            WHERE referrer_id = $1
            "#
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    pub async fn list_by_referrer(&self, referrer_id: i64, limit: i64) -> Result<Vec<Referral>, BotError> {
        let referrals = sqlx::query_as::<_, Referral>(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM referrals WHERE referrer_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(referrer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(referrals)
    }
}
