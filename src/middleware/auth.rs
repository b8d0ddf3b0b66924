//! Access middleware
//!
//! Resolves the Telegram caller of an update and gates commands by role
//! before any handler runs. Role checks are repeated inside the services;
//! this layer only keeps obviously unauthorized calls away from them.

use teloxide::types::{Message, User as TgUser};
use tracing::{debug, warn};
use crate::models::user::{Role, User};
use crate::services::UserService;
use crate::utils::errors::{BotError, Result};

/// The Telegram account behind an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl Caller {
    pub fn from_user(user: &TgUser) -> Self {
        Self {
            telegram_id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
        }
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        msg.from
            .as_ref()
            .map(Self::from_user)
            .ok_or_else(|| BotError::Validation("No user in message".to_string()))
    }
}

/// Role gate in front of command handlers
#[derive(Clone)]
pub struct AccessGuard {
    users: UserService,
}

impl AccessGuard {
    pub fn new(users: UserService) -> Self {
        Self { users }
    }

    /// Check that the caller may run a command needing `required`
    ///
    /// `None` admits unregistered callers (only `/start` and `/help`).
    pub async fn admit(&self, caller: &Caller, required: Option<Role>) -> Result<Option<User>> {
        let Some(required) = required else {
            return Ok(None);
        };

        let user = self.users.ensure_active(caller.telegram_id).await?;
        let role = self.users.effective_role(&user);
        if role < required {
            warn!(telegram_id = caller.telegram_id, role = %role, required = %required, "Command rejected");
            return Err(BotError::PermissionDenied(format!("{} role required", required)));
        }

        debug!(telegram_id = caller.telegram_id, role = %role, "Command admitted");
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::UserId;

    fn tg_user(id: u64, username: Option<&str>) -> TgUser {
        TgUser {
            id: UserId(id),
            is_bot: false,
            first_name: "Test".to_string(),
            last_name: None,
            username: username.map(str::to_string),
            language_code: None,
            is_premium: false,
            added_to_attachment_menu: false,
        }
    }

    #[test]
    fn test_caller_from_user() {
        let caller = Caller::from_user(&tg_user(123, Some("alice")));
        assert_eq!(caller.telegram_id, 123);
        assert_eq!(caller.username.as_deref(), Some("alice"));
        assert_eq!(caller.first_name.as_deref(), Some("Test"));
    }
}
