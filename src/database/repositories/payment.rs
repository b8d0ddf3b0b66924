//! Payment repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use crate::database::connection::is_unique_violation;
use crate::models::payment::{Payment, PaymentProvider, PaymentStatus, NewPayment};
use crate::utils::errors::BotError;

const PAYMENT_COLUMNS: &str = "id, user_id, provider, provider_payment_id, amount, original_amount, \
    discount_amount, currency, status, plan_code, duration_days, data_limit_bytes, promo_code_id, \
    promo_code, referral_id, commission_amount, provider_charge_id, completed_at, created_at, updated_at";

/// Completed-payment totals per currency
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RevenueRow {
    pub currency: String,
    pub payments: i64,
    pub total: Decimal,
}

#[derive(Clone, Debug)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending payment
    pub async fn insert(conn: &mut PgConnection, payment: &NewPayment) -> Result<Payment, BotError> {
        sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments
                (user_id, provider, provider_payment_id, amount, original_amount, discount_amount, currency,
                 status, plan_code, duration_days, data_limit_bytes, promo_code_id, promo_code, referral_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, $12, $13, $14, $14)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.user_id)
        .bind(payment.provider)
        .bind(&payment.provider_payment_id)
        .bind(payment.amount)
        .bind(payment.original_amount)
        .bind(payment.discount_amount)
        .bind(&payment.currency)
        .bind(&payment.plan_code)
        .bind(payment.duration_days)
        .bind(payment.data_limit_bytes)
        .bind(payment.promo_code_id)
        .bind(&payment.promo_code)
        .bind(payment.referral_id)
        .bind(Utc::now())
        .fetch_one(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BotError::Validation(format!(
                    "Payment {}:{} already exists",
                    payment.provider, payment.provider_payment_id
                ))
            } else {
                BotError::Database(e)
            }
        })
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Payment>, BotError> {
        let payment = sqlx::query_as::<_, Payment>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    pub async fn find_by_provider_id(&self, provider: PaymentProvider, provider_payment_id: &str) -> Result<Option<Payment>, BotError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_payment_id = $2"
        ))
        .bind(provider)
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// Lock the payment row; concurrent reconciliations of one payment serialize here
    pub async fn lock_by_provider_id(conn: &mut PgConnection, provider: PaymentProvider, provider_payment_id: &str) -> Result<Option<Payment>, BotError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_payment_id = $2 FOR UPDATE"
        ))
        .bind(provider)
        .bind(provider_payment_id)
        .fetch_optional(conn)
        .await?;

        Ok(payment)
    }

    pub async fn mark_completed(
        conn: &mut PgConnection,
        id: i64,
        now: DateTime<Utc>,
        commission_amount: Option<Decimal>,
        provider_charge_id: Option<&str>,
    ) -> Result<Payment, BotError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = 'completed', completed_at = $2, commission_amount = $3,
                provider_charge_id = COALESCE($4, provider_charge_id), updated_at = $2
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(commission_amount)
        .bind(provider_charge_id)
        .fetch_one(conn)
        .await?;

        Ok(payment)
    }

    /// Move a pending payment into a non-success terminal status
    pub async fn mark_closed(conn: &mut PgConnection, id: i64, status: PaymentStatus, now: DateTime<Utc>) -> Result<Payment, BotError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(payment)
    }

    /// Unpaid checkouts of a user, oldest first
    pub async fn list_pending_for_user(&self, user_id: i64) -> Result<Vec<Payment>, BotError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 AND status = 'pending' ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    pub async fn has_completed(&self, user_id: i64) -> Result<bool, BotError> {
        let mut conn = self.pool.acquire().await?;
        Self::has_completed_in(&mut conn, user_id).await
    }

    /// Whether the user has any completed payment, seen from inside a transaction
    pub async fn has_completed_in(conn: &mut PgConnection, user_id: i64) -> Result<bool, BotError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE user_id = $1 AND status = 'completed')"
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;

        Ok(exists.0)
    }

    pub async fn list_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Payment>, BotError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    pub async fn revenue(&self) -> Result<Vec<RevenueRow>, BotError> {
        let rows = sqlx::query_as::<_, RevenueRow>(
            r#"
            SELECT currency, COUNT(*) AS payments, COALESCE(SUM(amount), 0) AS total
            FROM payments
            WHERE status = 'completed'
            GROUP BY currency
            ORDER BY currency
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
