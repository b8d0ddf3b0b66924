//! User service implementation
//!
//! Registration, access checks, role management and blocking.

use std::collections::HashSet;
use chrono::Utc;
use tracing::{debug, info, warn};
use crate::config::settings::Settings;
use crate::database::DatabaseService;
use crate::models::user::{Role, User, UserStats};
use crate::services::cache::{CacheScope, CacheService};
use crate::services::panel::Provisioner;
use crate::utils::errors::{BotError, Result};
use crate::utils::logging::{log_admin_action, log_user_action};

#[derive(Clone)]
pub struct UserService {
    db: DatabaseService,
    cache: CacheService,
    provisioner: Provisioner,
    config_admins: HashSet<i64>,
}

impl UserService {
    pub fn new(db: DatabaseService, cache: CacheService, provisioner: Provisioner, settings: &Settings) -> Self {
        Self {
            db,
            cache,
            provisioner,
            config_admins: settings.bot.admin_ids.iter().copied().collect(),
        }
    }

    /// Register a user on first contact, refreshing profile names otherwise
    pub async fn register(&self, telegram_id: i64, username: Option<String>, first_name: Option<String>) -> Result<User> {
        let user = self.db.get_or_create_user(telegram_id, username, first_name).await?;
        if user.created_at == user.updated_at {
            log_user_action(telegram_id, "registered", None);
        }
        self.cache.set(CacheScope::Profile, &telegram_id.to_string(), &user).await;
        Ok(user)
    }

    /// Role including config-level admins, who are always `Admin`
    pub fn effective_role(&self, user: &User) -> Role {
        if self.config_admins.contains(&user.telegram_id) {
            Role::Admin
        } else {
            user.role
        }
    }

    pub async fn find(&self, telegram_id: i64) -> Result<Option<User>> {
        if let Some(user) = self.cache.get::<User>(CacheScope::Profile, &telegram_id.to_string()).await {
            return Ok(Some(user));
        }

        let user = self.db.users.find_by_telegram_id(telegram_id).await?;
        if let Some(user) = &user {
            self.cache.set(CacheScope::Profile, &telegram_id.to_string(), user).await;
        }
        Ok(user)
    }

    /// Drop cached views of a user after a store write
    pub async fn invalidate(&self, telegram_id: i64) {
        self.cache.invalidate_user(telegram_id).await;
    }

    /// Fetch a registered user straight from the store
    pub async fn get_fresh(&self, telegram_id: i64) -> Result<User> {
        self.db
            .users
            .find_by_telegram_id(telegram_id)
            .await?
            .ok_or(BotError::UserNotFound { telegram_id })
    }

    /// The user, provided they are registered and not blocked
    pub async fn ensure_active(&self, telegram_id: i64) -> Result<User> {
        let user = self.find(telegram_id).await?.ok_or(BotError::UserNotFound { telegram_id })?;
        if user.is_blocked {
            debug!(telegram_id, "Blocked user rejected");
            return Err(BotError::UserBlocked { telegram_id });
        }
        Ok(user)
    }

    /// The user, provided they are active and hold at least `role`
    pub async fn require_role(&self, telegram_id: i64, role: Role) -> Result<User> {
        let user = self.ensure_active(telegram_id).await?;
        if self.effective_role(&user) < role {
            warn!(telegram_id, required = %role, "Permission denied");
            return Err(BotError::PermissionDenied(format!("{} role required", role)));
        }
        Ok(user)
    }

    pub async fn set_role(&self, actor_telegram_id: i64, target_telegram_id: i64, role: Role) -> Result<User> {
        self.require_role(actor_telegram_id, Role::Admin).await?;

        let user = self
            .db
            .users
            .set_role(target_telegram_id, role)
            .await?
            .ok_or(BotError::UserNotFound { telegram_id: target_telegram_id })?;

        self.cache.invalidate_user(target_telegram_id).await;
        log_admin_action(actor_telegram_id, "set_role", Some(&target_telegram_id.to_string()), Some(role.as_str()));
        Ok(user)
    }

    /// Block or unblock a user; the panel account follows best effort
    pub async fn set_blocked(&self, actor_telegram_id: i64, target_telegram_id: i64, blocked: bool) -> Result<User> {
        let actor = self.require_role(actor_telegram_id, Role::Manager).await?;
        if actor.telegram_id == target_telegram_id {
            return Err(BotError::Validation("You cannot block yourself.".to_string()));
        }
        if blocked && self.config_admins.contains(&target_telegram_id) {
            return Err(BotError::PermissionDenied("configured admins cannot be blocked".to_string()));
        }

        let user = self
            .db
            .users
            .set_blocked(target_telegram_id, blocked)
            .await?
            .ok_or(BotError::UserNotFound { telegram_id: target_telegram_id })?;

        self.cache.invalidate_user(target_telegram_id).await;
        log_admin_action(
            actor_telegram_id,
            if blocked { "block" } else { "unblock" },
            Some(&target_telegram_id.to_string()),
            None,
        );

        let panel_result = if blocked {
            self.provisioner.revoke(&user).await
        } else {
            self.provisioner.sync_user(&user).await.map(|_| ())
        };
        if let Err(e) = panel_result {
            warn!(telegram_id = target_telegram_id, error = %e, "Panel update after block change deferred");
        }

        info!(telegram_id = target_telegram_id, blocked, "User block state changed");
        Ok(user)
    }

    pub async fn stats(&self, actor_telegram_id: i64) -> Result<UserStats> {
        self.require_role(actor_telegram_id, Role::Manager).await?;
        self.db.users.stats(Utc::now()).await
    }
}
