//! User repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use crate::models::user::{User, Role, CreateUserRequest, UserStats};
use crate::utils::errors::BotError;

pub(crate) const USER_COLUMNS: &str = "id, telegram_id, username, first_name, role, is_blocked, \
    data_limit_bytes, used_bytes, expires_at, is_trial, trial_expiry, trial_activated, \
    invited_by, panel_uuid, panel_sync_pending, created_at, updated_at";

#[derive(Clone)]
#[derive(Debug)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the user or refresh profile names of an existing one
    ///
    /// Role, block and entitlement fields of an existing user are untouched.
    pub async fn get_or_create(&self, request: CreateUserRequest) -> Result<User, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (telegram_id, username, first_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (telegram_id) DO UPDATE
            SET username = COALESCE(EXCLUDED.username, users.username),
                first_name = COALESCE(EXCLUDED.first_name, users.first_name),
                updated_at = EXCLUDED.updated_at
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(request.telegram_id)
        .bind(request.username)
        .bind(request.first_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find user by ID
    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, BotError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Find user by Telegram ID
    pub async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, BotError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"))
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Lock the user row for the rest of the transaction
    pub async fn lock_by_id(conn: &mut PgConnection, id: i64) -> Result<User, BotError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_one(conn)
            .await?;

        Ok(user)
    }

    /// Set the block flag
    pub async fn set_blocked(&self, telegram_id: i64, is_blocked: bool) -> Result<Option<User>, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET is_blocked = $2, updated_at = $3
            WHERE telegram_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(telegram_id)
        .bind(is_blocked)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn set_role(&self, telegram_id: i64, role: Role) -> Result<Option<User>, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET role = $2, updated_at = $3
            WHERE telegram_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(telegram_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Record who invited the user; the first inviter wins
    pub async fn set_invited_by(conn: &mut PgConnection, user_id: i64, inviter_id: Option<i64>) -> Result<(), BotError> {
        sqlx::query(
            "UPDATE users SET invited_by = $2, updated_at = $3 WHERE id = $1 AND invited_by IS NULL"
        )
        .bind(user_id)
        .bind(inviter_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Flip the trial latch and grant the trial entitlement in one statement
    ///
    /// Returns `None` when the latch is already set, the user has a live paid
    /// entitlement, or the user does not exist.
    pub async fn activate_trial(
        conn: &mut PgConnection,
        user_id: i64,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        data_limit_bytes: i64,
    ) -> Result<Option<User>, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET trial_activated = TRUE,
                is_trial = TRUE,
                trial_expiry = $3,
                expires_at = $3,
                data_limit_bytes = $4,
                used_bytes = 0,
                updated_at = $2
            WHERE id = $1
              AND trial_activated = FALSE
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.user_id = users.id
                    AND s.status = 'active'
                    AND s.expires_at > $2
              )
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .bind(data_limit_bytes)
        .fetch_optional(conn)
        .await?;

        Ok(user)
    }

    /// Apply a paid period: new expiry, replaced data limit, usage reset
    pub async fn apply_paid_period(
        conn: &mut PgConnection,
        user_id: i64,
        expires_at: DateTime<Utc>,
        data_limit_bytes: i64,
    ) -> Result<User, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET expires_at = $2,
                data_limit_bytes = $3,
                used_bytes = 0,
                is_trial = FALSE,
                updated_at = $4
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(expires_at)
        .bind(data_limit_bytes)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(user)
    }

    /// End the current entitlement immediately
    pub async fn end_entitlement(conn: &mut PgConnection, user_id: i64, now: DateTime<Utc>) -> Result<User, BotError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET expires_at = $2, is_trial = FALSE, updated_at = $2
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(user)
    }

    /// Mark whether the panel account lags behind the stored entitlement
    pub async fn set_panel_state(&self, user_id: i64, panel_uuid: Option<&str>, sync_pending: bool) -> Result<(), BotError> {
        sqlx::query(
            r#"
            UPDATE users
            SET panel_uuid = COALESCE($2, panel_uuid),
                panel_sync_pending = $3,
                updated_at = $4
            WHERE id = $1
            "#
        )
        .bind(user_id)
        .bind(panel_uuid)
        .bind(sync_pending)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn clear_panel_account(&self, user_id: i64) -> Result<(), BotError> {
        sqlx::query(
            "UPDATE users SET panel_uuid = NULL, panel_sync_pending = FALSE, updated_at = $2 WHERE id = $1"
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Users whose panel account still needs to be brought in line
    pub async fn list_panel_sync_pending(&self, limit: i64) -> Result<Vec<User>, BotError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE panel_sync_pending ORDER BY updated_at LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn update_usage(&self, user_id: i64, used_bytes: i64) -> Result<(), BotError> {
        sqlx::query("UPDATE users SET used_bytes = $2, updated_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(used_bytes.max(0))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Count users by entitlement state
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<UserStats, BotError> {
        let stats = sqlx::query_as::<_, UserStats>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE expires_at > $1 AND NOT is_trial) AS active,
                   COUNT(*) FILTER (WHERE expires_at > $1 AND is_trial) AS trial,
                   COUNT(*) FILTER (WHERE is_blocked) AS blocked
            FROM users
            "#
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_repository_creation() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://test@localhost/test")
            .expect("lazy pool");
        let repo = UserRepository::new(pool);
        assert!(!repo.pool.is_closed());
    }

    #[test]
    fn test_user_columns_cover_model() {
        for column in ["telegram_id", "role", "trial_activated", "panel_sync_pending", "updated_at"] {
            assert!(USER_COLUMNS.contains(column));
        }
    }
}
