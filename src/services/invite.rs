//! Invite codes: creation by managers and redemption by new users

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use std::sync::Arc;
use crate::config::settings::Settings;
use crate::database::DatabaseService;
use crate::models::invite::{CreateInviteRequest, Invite, InviteUseOutcome, INVITE_PREFIX};
use crate::models::user::Role;
use crate::services::guard::{IdempotencyKey, KeyedLocks};
use crate::services::notification::{OutcomeEvent, OutcomeSink};
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::generate_hex_token;
use crate::utils::logging::{log_admin_action, log_user_action};

const INVITE_TOKEN_LEN: usize = 12;

#[derive(Clone)]
pub struct InviteService {
    db: DatabaseService,
    users: UserService,
    locks: KeyedLocks,
    sink: Arc<dyn OutcomeSink>,
    enabled: bool,
}

impl InviteService {
    pub fn new(db: DatabaseService, users: UserService, locks: KeyedLocks, sink: Arc<dyn OutcomeSink>, settings: &Settings) -> Self {
        Self { db, users, locks, sink, enabled: settings.features.invites }
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(BotError::Validation("Invites are turned off.".to_string()))
        }
    }

    /// Create a fresh `INV_<hex>` code
    pub async fn create_invite(
        &self,
        actor_telegram_id: i64,
        max_uses: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Invite> {
        self.ensure_enabled()?;
        let actor = self.users.require_role(actor_telegram_id, Role::Manager).await?;

        let request = CreateInviteRequest {
            code: format!("{}{}", INVITE_PREFIX, generate_hex_token(INVITE_TOKEN_LEN)),
            created_by: Some(actor.id),
            max_uses,
            expires_at,
        };
        request.validate(Utc::now())?;

        let invite = self.db.invites.create(request).await?;
        log_admin_action(actor_telegram_id, "create_invite", Some(&invite.code), Some(&max_uses.to_string()));
        Ok(invite)
    }

    /// Redeem a code for the user; repeats by the same user are harmless
    pub async fn redeem(&self, telegram_id: i64, code: &str) -> Result<InviteUseOutcome> {
        self.ensure_enabled()?;
        let user = self.users.ensure_active(telegram_id).await?;

        let _guard = self
            .locks
            .acquire(IdempotencyKey::Invite { code: code.to_string(), telegram_id })
            .await;

        let outcome = self.db.apply_invite(code, user.id).await?;
        match &outcome {
            InviteUseOutcome::AlreadyRedeemed(invite) => {
                debug!(telegram_id, code = %invite.code, "Invite already redeemed by this user");
            }
            InviteUseOutcome::Redeemed(invite) => {
                info!(
                    telegram_id,
                    code = %invite.code,
                    used = invite.used_count,
                    max = invite.max_uses,
                    "Invite redeemed"
                );
                log_user_action(telegram_id, "redeem_invite", Some(&invite.code));
                self.users.invalidate(telegram_id).await;

                let inviter_telegram_id = match invite.created_by {
                    Some(creator_id) => self.db.users.find_by_id(creator_id).await?.map(|u| u.telegram_id),
                    None => None,
                };
                self.sink
                    .emit(OutcomeEvent::InviteRedeemed {
                        telegram_id,
                        code: invite.code.clone(),
                        inviter_telegram_id,
                    })
                    .await;
            }
        }

        Ok(outcome)
    }

    pub async fn list_mine(&self, actor_telegram_id: i64) -> Result<Vec<Invite>> {
        let actor = self.users.require_role(actor_telegram_id, Role::Manager).await?;
        self.db.invites.list_by_creator(actor.id, 20).await
    }

    pub async fn deactivate(&self, actor_telegram_id: i64, code: &str) -> Result<()> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;
        if !self.db.invites.deactivate(code).await? {
            return Err(BotError::not_found("Invite", code));
        }
        log_admin_action(actor_telegram_id, "deactivate_invite", Some(code), None);
        Ok(())
    }
}
