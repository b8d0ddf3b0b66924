//! Invite repository implementation

use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use crate::database::connection::is_unique_violation;
use crate::models::invite::{Invite, InviteRedemption, CreateInviteRequest};
use crate::utils::errors::BotError;

const INVITE_COLUMNS: &str =
    "id, code, created_by, max_uses, used_count, is_active, expires_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct InviteRepository {
    pool: PgPool,
}

impl InviteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new invite code
    pub async fn create(&self, request: CreateInviteRequest) -> Result<Invite, BotError> {
        sqlx::query_as::<_, Invite>(&format!(
            r#"
            INSERT INTO invites (code, created_by, max_uses, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(&request.code)
        .bind(request.created_by)
        .bind(request.max_uses)
        .bind(request.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BotError::Validation(format!("Invite code {} already exists", request.code))
            } else {
                BotError::Database(e)
            }
        })
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Invite>, BotError> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_code_in(&mut conn, code).await
    }

    /// Look up an invite by code on the given connection
    pub async fn find_by_code_in(conn: &mut PgConnection, code: &str) -> Result<Option<Invite>, BotError> {
        let invite = sqlx::query_as::<_, Invite>(&format!("SELECT {INVITE_COLUMNS} FROM invites WHERE code = $1"))
            .bind(code)
            .fetch_optional(conn)
            .await?;

        Ok(invite)
    }

    /// Invites created by a user, newest first
    pub async fn list_by_creator(&self, created_by: i64, limit: i64) -> Result<Vec<Invite>, BotError> {
        let invites = sqlx::query_as::<_, Invite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invites WHERE created_by = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(created_by)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(invites)
    }

    /// Consume one use of an invite on the given connection
    ///
    /// The increment is a single conditional update, so concurrent callers can
    /// never push `used_count` past `max_uses`. The invite deactivates itself
    /// on its last use.
    pub async fn apply_invite_with(conn: &mut PgConnection, code: &str, now: DateTime<Utc>) -> Result<Invite, BotError> {
        let updated = sqlx::query_as::<_, Invite>(&format!(
            r#"
            UPDATE invites
            SET used_count = used_count + 1,
                is_active = (used_count + 1) < max_uses,
                updated_at = $2
            WHERE code = $1
              AND is_active
              AND used_count < max_uses
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(invite) = updated {
            return Ok(invite);
        }

        Err(Self::diagnose(Self::find_by_code_in(conn, code).await?, code, now))
    }

    /// Explain why an invite could not be applied
    ///
    /// Checked in order: missing or switched off, expired, used up. A used-up
    /// invite is deactivated automatically, so it is not treated as switched off.
    fn diagnose(invite: Option<Invite>, code: &str, now: DateTime<Utc>) -> BotError {
        match invite {
            None => BotError::not_found("Invite", code),
            Some(invite) if !invite.is_active && !invite.is_exhausted() => BotError::not_found("Invite", code),
            Some(invite) if invite.is_expired(now) => BotError::Expired { entity: "Invite" },
            Some(invite) if invite.is_exhausted() => BotError::Exhausted { entity: "Invite" },
            Some(_) => BotError::not_found("Invite", code),
        }
    }

    /// Record that `user_id` redeemed the invite; `None` if already recorded
    pub async fn insert_redemption(conn: &mut PgConnection, invite_id: i64, user_id: i64) -> Result<Option<InviteRedemption>, BotError> {
        let redemption = sqlx::query_as::<_, InviteRedemption>(
            r#"
            INSERT INTO invite_redemptions (invite_id, user_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (invite_id, user_id) DO NOTHING
            RETURNING id, invite_id, user_id, created_at
            "#
        )
        .bind(invite_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(conn)
        .await?;

        Ok(redemption)
    }

    pub async fn deactivate(&self, code: &str) -> Result<bool, BotError> {
        let result = sqlx::query("UPDATE invites SET is_active = FALSE, updated_at = $2 WHERE code = $1 AND is_active")
            .bind(code)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn invite(max_uses: i32, used_count: i32, is_active: bool, expires_at: Option<DateTime<Utc>>) -> Invite {
        let now = Utc::now();
        Invite {
            id: 1,
            code: "INV_abc123".to_string(),
            created_by: None,
            max_uses,
            used_count,
            is_active,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_diagnose_missing() {
        assert_matches!(
            InviteRepository::diagnose(None, "INV_zzz", Utc::now()),
            BotError::NotFound { entity: "Invite", .. }
        );
    }

    #[test]
    fn test_diagnose_expired_before_exhausted() {
        let now = Utc::now();
        let both = invite(1, 1, false, Some(now - Duration::days(1)));
        assert_matches!(InviteRepository::diagnose(Some(both), "INV_abc123", now), BotError::Expired { .. });

        // used up and auto-deactivated, still within its window
        let used_up = invite(1, 1, false, Some(now + Duration::days(1)));
        assert_matches!(InviteRepository::diagnose(Some(used_up), "INV_abc123", now), BotError::Exhausted { .. });
    }

    #[test]
    fn test_diagnose_expired_and_inactive() {
        let now = Utc::now();
        let expired = invite(5, 1, true, Some(now - Duration::seconds(1)));
        assert_matches!(InviteRepository::diagnose(Some(expired), "INV_abc123", now), BotError::Expired { .. });

        let disabled = invite(5, 1, false, None);
        assert_matches!(InviteRepository::diagnose(Some(disabled), "INV_abc123", now), BotError::NotFound { .. });

        let disabled_and_expired = invite(5, 1, false, Some(now - Duration::days(1)));
        assert_matches!(
            InviteRepository::diagnose(Some(disabled_and_expired), "INV_abc123", now),
            BotError::NotFound { .. }
        );
    }
}
