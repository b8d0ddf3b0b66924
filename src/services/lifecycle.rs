//! Subscription lifecycle: trial activation, status reads and cancellation
//!
//! Paid activation lives in the payment service because it is driven by
//! reconciliation.

use std::sync::Arc;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::config::settings::Settings;
use crate::database::{DatabaseService, SubscriptionRepository, UserRepository};
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::models::user::{Entitlement, Role, User};
use crate::services::cache::{CacheScope, CacheService};
use crate::services::guard::{IdempotencyKey, KeyedLocks};
use crate::services::notification::{OutcomeEvent, OutcomeSink};
use crate::services::panel::Provisioner;
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::{bytes_to_db, gb_to_bytes};
use crate::utils::logging::{log_admin_action, log_user_action};

pub const TRIAL_PLAN_CODE: &str = "trial";

#[derive(Debug, Clone)]
pub struct TrialActivation {
    pub user: User,
    pub subscription: Subscription,
    pub provisioning_deferred: bool,
}

/// What `/status` shows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub entitlement: Entitlement,
    pub subscription: Option<Subscription>,
    pub subscription_url: Option<String>,
    pub panel_sync_pending: bool,
}

#[derive(Clone)]
pub struct LifecycleService {
    db: DatabaseService,
    users: UserService,
    provisioner: Provisioner,
    cache: CacheService,
    locks: KeyedLocks,
    sink: Arc<dyn OutcomeSink>,
    trial_days: u32,
    trial_data_limit_bytes: u64,
    trial_enabled: bool,
}

impl LifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseService,
        users: UserService,
        provisioner: Provisioner,
        cache: CacheService,
        locks: KeyedLocks,
        sink: Arc<dyn OutcomeSink>,
        settings: &Settings,
    ) -> Self {
        Self {
            db,
            users,
            provisioner,
            cache,
            locks,
            sink,
            trial_days: settings.trial.days,
            trial_data_limit_bytes: gb_to_bytes(settings.trial.data_limit_gb),
            trial_enabled: settings.features.trial,
        }
    }

    /// Grant the one-time trial
    ///
    /// The trial latch flips in a single conditional update, so a user gets at
    /// most one trial no matter how many requests race.
    pub async fn activate_trial(&self, telegram_id: i64) -> Result<TrialActivation> {
        if !self.trial_enabled {
            return Err(BotError::Validation("Free trials are turned off.".to_string()));
        }
        let user = self.users.ensure_active(telegram_id).await?;
        let _guard = self.locks.acquire(IdempotencyKey::Trial { telegram_id }).await;

        let now = Utc::now();
        let expires_at = now + Duration::days(i64::from(self.trial_days));
        let data_limit = bytes_to_db(self.trial_data_limit_bytes);

        let mut tx = self.db.begin().await?;
        let activated = UserRepository::activate_trial(&mut tx, user.id, now, expires_at, data_limit).await?;

        let Some(user) = activated else {
            let current = UserRepository::lock_by_id(&mut tx, user.id).await?;
            drop(tx);
            return Err(if current.trial_activated {
                BotError::TrialAlreadyUsed { telegram_id }
            } else {
                BotError::InvalidStateTransition {
                    from: SubscriptionStatus::Active.to_string(),
                    to: SubscriptionStatus::Trial.to_string(),
                }
            });
        };

        let subscription = SubscriptionRepository::insert(
            &mut tx,
            user.id,
            TRIAL_PLAN_CODE,
            SubscriptionStatus::Trial,
            data_limit,
            Some(expires_at),
            None,
        )
        .await?;
        tx.commit().await?;

        self.users.invalidate(telegram_id).await;
        log_user_action(telegram_id, "activate_trial", Some(&expires_at.to_rfc3339()));
        info!(telegram_id, expires_at = %expires_at, "Trial activated");

        let provisioning_deferred = self.provision(&user).await;
        self.sink.emit(OutcomeEvent::TrialActivated { telegram_id, expires_at }).await;

        Ok(TrialActivation { user, subscription, provisioning_deferred })
    }

    /// Sync the panel after a commit; true when the sync was deferred
    pub(crate) async fn provision(&self, user: &User) -> bool {
        match self.provisioner.sync_user(user).await {
            Ok(_) => false,
            Err(e) => {
                self.sink
                    .emit(OutcomeEvent::ProvisioningDeferred {
                        telegram_id: user.telegram_id,
                        reason: e.to_string(),
                    })
                    .await;
                true
            }
        }
    }

    async fn latest_subscription(&self, user: &User) -> Result<Option<Subscription>> {
        let key = user.telegram_id.to_string();
        if let Some(subscription) = self.cache.get::<Subscription>(CacheScope::Subscription, &key).await {
            return Ok(Some(subscription));
        }

        let subscription = self.db.subscriptions.find_latest_for_user(user.id).await?;
        if let Some(subscription) = &subscription {
            self.cache.set(CacheScope::Subscription, &key, subscription).await;
        }
        Ok(subscription)
    }

    /// Current entitlement with lazy expiry; lapsed rows are persisted best effort
    pub async fn current_status(&self, telegram_id: i64) -> Result<StatusView> {
        let user = self.users.ensure_active(telegram_id).await?;
        let user = self.provisioner.refresh_usage(user).await;
        let now = Utc::now();

        let mut subscription = self.latest_subscription(&user).await?;
        if let Some(sub) = subscription.as_mut() {
            let effective = sub.effective_status(now);
            if effective != sub.status {
                debug!(subscription_id = sub.id, from = %sub.status, to = %effective, "Persisting lazy expiry");
                match self.db.subscriptions.expire_lapsed_for_user(user.id, now).await {
                    Ok(_) => self.cache.invalidate(CacheScope::Subscription, &telegram_id.to_string()).await,
                    Err(e) => warn!(telegram_id, error = %e, "Failed to persist expiry"),
                }
                sub.status = effective;
            }
        }

        let subscription_url = user
            .panel_uuid
            .as_deref()
            .map(|uuid| self.provisioner.panel().subscription_url(uuid));

        Ok(StatusView {
            entitlement: user.entitlement(now),
            subscription,
            subscription_url,
            panel_sync_pending: user.panel_sync_pending,
        })
    }

    /// End the live subscription immediately; owner or manager only
    pub async fn cancel_subscription(&self, telegram_id: i64, actor_telegram_id: i64) -> Result<User> {
        if actor_telegram_id == telegram_id {
            self.users.ensure_active(telegram_id).await?;
        } else {
            self.users.require_role(actor_telegram_id, Role::Manager).await?;
        }
        let user = self.users.get_fresh(telegram_id).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        UserRepository::lock_by_id(&mut tx, user.id).await?;

        let cancelled = SubscriptionRepository::cancel_live_for_user(&mut tx, user.id, now).await?;
        if cancelled.is_empty() {
            drop(tx);
            let from = user
                .entitlement(now)
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string());
            return Err(BotError::InvalidStateTransition { from, to: SubscriptionStatus::Cancelled.to_string() });
        }

        let user = UserRepository::end_entitlement(&mut tx, user.id, now).await?;
        tx.commit().await?;

        self.users.invalidate(telegram_id).await;
        if actor_telegram_id == telegram_id {
            log_user_action(telegram_id, "cancel_subscription", None);
        } else {
            log_admin_action(actor_telegram_id, "cancel_subscription", Some(&telegram_id.to_string()), None);
        }
        info!(telegram_id, cancelled = cancelled.len(), "Subscription cancelled");

        self.provision(&user).await;
        Ok(user)
    }
}
