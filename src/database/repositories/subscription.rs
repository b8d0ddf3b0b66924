//! Subscription repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::utils::errors::BotError;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_code, status, data_limit_bytes, used_bytes, \
    started_at, expires_at, cancelled_at, auto_renew, payment_id, created_at, updated_at";

const LIVE: &[SubscriptionStatus] = &[SubscriptionStatus::Trial, SubscriptionStatus::Active];

#[derive(Clone, Debug)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a subscription row in the given status
    pub async fn insert(
        conn: &mut PgConnection,
        user_id: i64,
        plan_code: &str,
        status: SubscriptionStatus,
        data_limit_bytes: i64,
        expires_at: Option<DateTime<Utc>>,
        payment_id: Option<i64>,
    ) -> Result<Subscription, BotError> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions
                (user_id, plan_code, status, data_limit_bytes, started_at, expires_at, payment_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $5, $5)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(plan_code)
        .bind(status)
        .bind(data_limit_bytes)
        .bind(Utc::now())
        .bind(expires_at)
        .bind(payment_id)
        .fetch_one(conn)
        .await?;

        Ok(subscription)
    }

    /// pending -> active for the subscription created with `payment_id`
    pub async fn activate_for_payment(
        conn: &mut PgConnection,
        payment_id: i64,
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, BotError> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'active', started_at = $2, expires_at = $3, updated_at = $2
            WHERE payment_id = $1 AND status::text = ANY($4)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(payment_id)
        .bind(started_at)
        .bind(expires_at)
        .bind(SubscriptionStatus::allowed_sources(&[SubscriptionStatus::Pending], SubscriptionStatus::Active))
        .fetch_optional(conn)
        .await?;

        Ok(subscription)
    }

    /// pending -> cancelled for the subscription created with `payment_id`
    pub async fn cancel_pending_for_payment(conn: &mut PgConnection, payment_id: i64, now: DateTime<Utc>) -> Result<u64, BotError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = $2, updated_at = $2
            WHERE payment_id = $1 AND status::text = ANY($3)
            "#
        )
        .bind(payment_id)
        .bind(now)
        .bind(SubscriptionStatus::allowed_sources(&[SubscriptionStatus::Pending], SubscriptionStatus::Cancelled))
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Earlier live periods are superseded by a stacked renewal
    pub async fn supersede_live(conn: &mut PgConnection, user_id: i64, except_id: i64, now: DateTime<Utc>) -> Result<u64, BotError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = $3
            WHERE user_id = $1 AND id <> $2 AND status::text = ANY($4)
            "#
        )
        .bind(user_id)
        .bind(except_id)
        .bind(now)
        .bind(SubscriptionStatus::allowed_sources(LIVE, SubscriptionStatus::Expired))
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// active/trial -> cancelled for all live subscriptions of a user
    pub async fn cancel_live_for_user(conn: &mut PgConnection, user_id: i64, now: DateTime<Utc>) -> Result<Vec<Subscription>, BotError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = $2, expires_at = LEAST(expires_at, $2), updated_at = $2
            WHERE user_id = $1 AND status::text = ANY($3) AND expires_at > $2
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(now)
        .bind(SubscriptionStatus::allowed_sources(LIVE, SubscriptionStatus::Cancelled))
        .fetch_all(conn)
        .await?;

        Ok(subscriptions)
    }

    /// Persist lazy expiry for a user's live subscriptions past their end
    pub async fn expire_lapsed_for_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64, BotError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = $2
            WHERE user_id = $1 AND status::text = ANY($3) AND expires_at <= $2
            "#
        )
        .bind(user_id)
        .bind(now)
        .bind(SubscriptionStatus::allowed_sources(LIVE, SubscriptionStatus::Expired))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Most recent subscription of the user that is not pending
    pub async fn find_latest_for_user(&self, user_id: i64) -> Result<Option<Subscription>, BotError> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
            WHERE user_id = $1 AND status <> 'pending'
            ORDER BY expires_at DESC NULLS LAST, id DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    pub async fn find_by_payment(&self, payment_id: i64) -> Result<Option<Subscription>, BotError> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Subscription>, BotError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }
}
