//! Invite model (legacy onboarding codes)

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::FromRow;
use std::sync::OnceLock;
use crate::utils::errors::{BotError, Result};

pub const INVITE_PREFIX: &str = "INV_";
pub const INVITE_CODE_MIN_LEN: usize = 8;
pub const INVITE_CODE_MAX_LEN: usize = 50;
pub const INVITE_MAX_USES_LIMIT: i32 = 1000;

fn invite_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^INV_[a-f0-9]+$").expect("static invite regex"))
}

/// Check the textual shape of an invite code
pub fn is_valid_invite_code(code: &str) -> bool {
    (INVITE_CODE_MIN_LEN..=INVITE_CODE_MAX_LEN).contains(&code.len())
        && invite_code_regex().is_match(code)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invite {
    pub id: i64,
    pub code: String,
    pub created_by: Option<i64>,
    pub max_uses: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.max_uses
    }

    pub fn remaining_uses(&self) -> i32 {
        (self.max_uses - self.used_count).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InviteRedemption {
    pub id: i64,
    pub invite_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Successful result of redeeming an invite
#[derive(Debug, Clone)]
pub enum InviteUseOutcome {
    /// This call consumed one use
    Redeemed(Invite),
    /// The same user already redeemed this code; nothing changed
    AlreadyRedeemed(Invite),
}

impl InviteUseOutcome {
    pub fn invite(&self) -> &Invite {
        match self {
            InviteUseOutcome::Redeemed(invite) | InviteUseOutcome::AlreadyRedeemed(invite) => invite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInviteRequest {
    pub code: String,
    pub created_by: Option<i64>,
    pub max_uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateInviteRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if !is_valid_invite_code(&self.code) {
            return Err(BotError::Validation(format!(
                "Invite code must match {}<hex> and be {}-{} characters",
                INVITE_PREFIX, INVITE_CODE_MIN_LEN, INVITE_CODE_MAX_LEN
            )));
        }
        if !(1..=INVITE_MAX_USES_LIMIT).contains(&self.max_uses) {
            return Err(BotError::Validation(format!(
                "Invite max uses must be between 1 and {}",
                INVITE_MAX_USES_LIMIT
            )));
        }
        if matches!(self.expires_at, Some(at) if at <= now) {
            return Err(BotError::Validation("Invite expiry cannot be in the past".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    #[test]
    fn test_invite_code_shape() {
        assert!(is_valid_invite_code("INV_abc123"));
        assert!(!is_valid_invite_code("INV_ab"));
        assert!(!is_valid_invite_code("INV_ABC123"));
        assert!(!is_valid_invite_code("REF_abc123"));
        assert!(!is_valid_invite_code(&format!("INV_{}", "a".repeat(47))));
    }

    #[test]
    fn test_create_request_validation() {
        let now = Utc::now();
        let mut req = CreateInviteRequest {
            code: "INV_abcdef".to_string(),
            created_by: None,
            max_uses: 5,
            expires_at: Some(now + Duration::days(1)),
        };
        assert!(req.validate(now).is_ok());

        req.max_uses = 0;
        assert_matches!(req.validate(now), Err(BotError::Validation(_)));
        req.max_uses = 1001;
        assert_matches!(req.validate(now), Err(BotError::Validation(_)));

        req.max_uses = 1;
        req.expires_at = Some(now - Duration::minutes(1));
        assert_matches!(req.validate(now), Err(BotError::Validation(msg)) if msg.contains("past"));
    }
}
