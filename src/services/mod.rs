//! Services module
//!
//! Business logic on top of the entitlement store

pub mod cache;
pub mod guard;
pub mod invite;
pub mod lifecycle;
pub mod notification;
pub mod panel;
pub mod payment;
pub mod promo;
pub mod providers;
pub mod referral;
pub mod support;
pub mod user;

// Re-export commonly used services
pub use cache::{CacheScope, CacheService};
pub use guard::{IdempotencyKey, KeyedLocks};
pub use invite::InviteService;
pub use lifecycle::{LifecycleService, StatusView, TrialActivation};
pub use notification::{LogOnlySink, OutcomeEvent, OutcomeSink, TelegramNotifier};
pub use panel::{HiddifyPanel, Provisioner, VpnPanel};
pub use payment::{Checkout, PaymentService};
pub use promo::PromoService;
pub use providers::{ProviderCapability, ProviderRegistry};
pub use referral::ReferralService;
pub use support::TicketService;
pub use user::UserService;

use std::sync::Arc;
use crate::config::settings::Settings;
use crate::database::{self, DatabaseService};
use crate::utils::errors::Result;

/// Service factory for creating and managing all services
#[derive(Clone)]
pub struct ServiceFactory {
    pub user_service: UserService,
    pub invite_service: InviteService,
    pub referral_service: ReferralService,
    pub promo_service: PromoService,
    pub lifecycle_service: LifecycleService,
    pub payment_service: PaymentService,
    pub ticket_service: TicketService,
    pub provisioner: Provisioner,
    pub cache: CacheService,
    db: DatabaseService,
    bot_username: String,
}

impl ServiceFactory {
    /// Wire every service onto one store, cache, panel and outcome sink
    pub fn new(
        settings: &Settings,
        db: DatabaseService,
        cache: CacheService,
        panel: Arc<dyn VpnPanel>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<Self> {
        let providers = Arc::new(ProviderRegistry::from_settings(settings)?);
        let locks = KeyedLocks::new();
        let provisioner = Provisioner::new(panel, db.users.clone(), &settings.panel);

        let user_service = UserService::new(db.clone(), cache.clone(), provisioner.clone(), settings);
        let invite_service = InviteService::new(db.clone(), user_service.clone(), locks.clone(), sink.clone(), settings);
        let referral_service =
            ReferralService::new(db.clone(), user_service.clone(), cache.clone(), locks.clone(), settings);
        let promo_service = PromoService::new(db.clone(), user_service.clone(), settings);
        let lifecycle_service = LifecycleService::new(
            db.clone(),
            user_service.clone(),
            provisioner.clone(),
            cache.clone(),
            locks.clone(),
            sink.clone(),
            settings,
        );
        let payment_service = PaymentService::new(
            db.clone(),
            user_service.clone(),
            promo_service.clone(),
            providers,
            lifecycle_service.clone(),
            cache.clone(),
            locks,
            sink,
            settings,
        );
        let ticket_service = TicketService::new(db.clone(), user_service.clone(), settings);

        Ok(Self {
            user_service,
            invite_service,
            referral_service,
            promo_service,
            lifecycle_service,
            payment_service,
            ticket_service,
            provisioner,
            cache,
            db,
            bot_username: settings.bot.username.clone(),
        })
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    /// Health check for all services
    pub async fn health_check(&self) -> ServiceHealthStatus {
        let database_healthy = database::health_check(self.db.pool()).await.is_ok();
        let cache_enabled = self.cache.is_enabled();
        let cache_healthy = !cache_enabled || self.cache.health_check().await;
        let enabled_providers = self
            .payment_service
            .providers()
            .enabled_for_checkout()
            .iter()
            .map(|p| p.to_string())
            .collect();

        ServiceHealthStatus {
            database_healthy,
            cache_enabled,
            cache_healthy,
            enabled_providers,
        }
    }
}

/// Health status for all services
#[derive(Debug, Clone)]
pub struct ServiceHealthStatus {
    pub database_healthy: bool,
    pub cache_enabled: bool,
    pub cache_healthy: bool,
    pub enabled_providers: Vec<String>,
}

impl ServiceHealthStatus {
    /// The cache is advisory, so only the store is critical
    pub fn is_healthy(&self) -> bool {
        self.database_healthy
    }

    /// Get list of unhealthy services
    pub fn get_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.database_healthy {
            issues.push("Database connection failed".to_string());
        }
        if !self.cache_healthy {
            issues.push("Redis connection failed".to_string());
        }
        if self.enabled_providers.is_empty() {
            issues.push("No payment provider is enabled".to_string());
        }

        issues
    }
}
