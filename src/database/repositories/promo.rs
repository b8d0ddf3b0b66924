//! Promo code repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::Utc;
use crate::database::connection::is_unique_violation;
use crate::models::promo::{PromoCode, PromoUsage, CreatePromoRequest, normalize_promo_code};
use crate::utils::errors::BotError;

const PROMO_COLUMNS: &str = "id, code, promo_type, value, max_uses, used_count, expires_at, is_active, \
    created_by, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: CreatePromoRequest) -> Result<PromoCode, BotError> {
        let code = normalize_promo_code(&request.code);
        sqlx::query_as::<_, PromoCode>(&format!(
            r#"
            INSERT INTO promo_codes (code, promo_type, value, max_uses, expires_at, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {PROMO_COLUMNS}
            "#
        ))
        .bind(&code)
        .bind(request.promo_type)
        .bind(request.value)
        .bind(request.max_uses)
        .bind(request.expires_at)
        .bind(request.created_by)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BotError::Validation(format!("Promo code {} already exists", code))
            } else {
                BotError::Database(e)
            }
        })
    }

    /// Find a promo by code, case-insensitively
    pub async fn find_by_code(&self, code: &str) -> Result<Option<PromoCode>, BotError> {
        let promo = sqlx::query_as::<_, PromoCode>(&format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE code = $1"))
            .bind(normalize_promo_code(code))
            .fetch_optional(&self.pool)
            .await?;

        Ok(promo)
    }

    pub async fn has_usage(&self, promo_code_id: i64, user_id: i64) -> Result<bool, BotError> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM promo_usages WHERE promo_code_id = $1 AND user_id = $2)"
        )
        .bind(promo_code_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    /// Record a redemption in its own transaction
    pub async fn record_usage(&self, promo_code_id: i64, user_id: i64) -> Result<PromoUsage, BotError> {
        let mut tx = self.pool.begin().await?;
        let usage = Self::record_usage_in(&mut tx, promo_code_id, user_id, None).await?;
        tx.commit().await?;

        Ok(usage)
    }

    /// Record a redemption inside the caller's transaction
    ///
    /// The per-user row is inserted first so a second redemption by the same
    /// user fails with `AlreadyUsed` without touching the counter. On
    /// `Exhausted` the caller must roll back to drop the inserted row.
    pub async fn record_usage_in(
        conn: &mut PgConnection,
        promo_code_id: i64,
        user_id: i64,
        payment_id: Option<i64>,
    ) -> Result<PromoUsage, BotError> {
        let usage = sqlx::query_as::<_, PromoUsage>(
            r#"
            INSERT INTO promo_usages (promo_code_id, user_id, payment_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (promo_code_id, user_id) DO NOTHING
            RETURNING id, promo_code_id, user_id, payment_id, created_at
            "#
        )
        .bind(promo_code_id)
        .bind(user_id)
        .bind(payment_id)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(BotError::AlreadyUsed)?;

        let incremented = sqlx::query(
            r#"
            UPDATE promo_codes
            SET used_count = used_count + 1, updated_at = $2
            WHERE id = $1 AND (max_uses IS NULL OR used_count < max_uses)
            "#
        )
        .bind(promo_code_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if incremented.rows_affected() == 0 {
            return Err(BotError::Exhausted { entity: "Promo code" });
        }

        Ok(usage)
    }

    /// Undo a redemption attached to a payment that did not go through
    pub async fn release_usage_in(conn: &mut PgConnection, promo_code_id: i64, user_id: i64, payment_id: i64) -> Result<bool, BotError> {
        let deleted = sqlx::query(
            "DELETE FROM promo_usages WHERE promo_code_id = $1 AND user_id = $2 AND payment_id = $3"
        )
        .bind(promo_code_id)
        .bind(user_id)
        .bind(payment_id)
        .execute(&mut *conn)
        .await?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE promo_codes SET used_count = GREATEST(used_count - 1, 0), updated_at = $2 WHERE id = $1"
        )
        .bind(promo_code_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(true)
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<PromoCode>, BotError> {
        let promos = sqlx::query_as::<_, PromoCode>(&format!(
            "SELECT {PROMO_COLUMNS} FROM promo_codes ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(promos)
    }

    pub async fn deactivate(&self, code: &str) -> Result<bool, BotError> {
        let result = sqlx::query("UPDATE promo_codes SET is_active = FALSE, updated_at = $2 WHERE code = $1 AND is_active")
            .bind(normalize_promo_code(code))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
