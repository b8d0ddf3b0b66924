//! Promo codes: pricing and management

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;
use crate::config::settings::Settings;
use crate::database::DatabaseService;
use crate::models::promo::{compute_discount, normalize_promo_code, CreatePromoRequest, Discount, PromoCode};
use crate::models::user::Role;
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::logging::log_admin_action;

#[derive(Clone)]
pub struct PromoService {
    db: DatabaseService,
    users: UserService,
    enabled: bool,
}

impl PromoService {
    pub fn new(db: DatabaseService, users: UserService, settings: &Settings) -> Self {
        Self { db, users, enabled: settings.features.promo_codes }
    }

    /// Look up a code that is currently redeemable, in check order
    async fn redeemable(&self, code: &str, user_id: i64) -> Result<PromoCode> {
        if !self.enabled {
            return Err(BotError::Validation("Promo codes are turned off.".to_string()));
        }
        let code = normalize_promo_code(code);
        let promo = self
            .db
            .promos
            .find_by_code(&code)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| BotError::not_found("Promo code", &code))?;

        if promo.is_expired(Utc::now()) {
            return Err(BotError::Expired { entity: "Promo code" });
        }
        if promo.is_exhausted() {
            return Err(BotError::Exhausted { entity: "Promo code" });
        }
        if self.db.promos.has_usage(promo.id, user_id).await? {
            return Err(BotError::AlreadyUsed);
        }
        Ok(promo)
    }

    /// Price `original_amount` with a promo code for a user
    ///
    /// Read-only: the redemption itself is recorded at checkout.
    pub async fn calculate_discount(&self, code: &str, original_amount: Decimal, user_id: i64) -> Result<Discount> {
        let promo = self.redeemable(code, user_id).await?;
        let discount = compute_discount(&promo, original_amount);
        debug!(
            code = %discount.code,
            original = %discount.original_amount,
            discount = %discount.discount_amount,
            "Promo discount calculated"
        );
        Ok(discount)
    }

    pub async fn create_promo_code(&self, actor_telegram_id: i64, mut request: CreatePromoRequest) -> Result<PromoCode> {
        if !self.enabled {
            return Err(BotError::Validation("Promo codes are turned off.".to_string()));
        }
        let actor = self.users.require_role(actor_telegram_id, Role::Admin).await?;
        request.created_by = Some(actor.id);
        request.validate(Utc::now())?;

        let promo = self.db.promos.create(request).await?;
        log_admin_action(
            actor_telegram_id,
            "create_promo",
            Some(&promo.code),
            Some(&format!("{} {}", promo.promo_type, promo.value)),
        );
        Ok(promo)
    }

    pub async fn list_promo_codes(&self, actor_telegram_id: i64) -> Result<Vec<PromoCode>> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;
        self.db.promos.list(50).await
    }

    pub async fn deactivate(&self, actor_telegram_id: i64, code: &str) -> Result<()> {
        self.users.require_role(actor_telegram_id, Role::Admin).await?;
        if !self.db.promos.deactivate(code).await? {
            return Err(BotError::not_found("Promo code", normalize_promo_code(code)));
        }
        log_admin_action(actor_telegram_id, "deactivate_promo", Some(code), None);
        Ok(())
    }
}
