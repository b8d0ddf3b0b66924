//! Checkout and payment reconciliation
//!
//! `create_checkout` snapshots the plan, price and promo discount into a
//! pending payment. `reconcile` is the single entry point for provider events
//! (webhooks, Stars updates, invoice polling, manual confirmation) and applies
//! each payment at most once.

use std::sync::Arc;
use std::time::Instant;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::config::settings::Settings;
use crate::database::repositories::payment::RevenueRow;
use crate::database::{
    DatabaseService, PaymentRepository, PromoRepository, ReferralRepository, SubscriptionRepository, UserRepository,
};
use crate::models::payment::{NewPayment, Payment, PaymentProvider, PaymentStatus, ReconcileOutcome};
use crate::models::plan::{Plan, CURRENCY_USD, CURRENCY_XTR};
use crate::models::promo::Discount;
use crate::models::subscription::{renewal_base, SubscriptionStatus};
use crate::models::user::Role;
use crate::services::cache::{CacheScope, CacheService};
use crate::services::guard::{IdempotencyKey, KeyedLocks};
use crate::services::lifecycle::LifecycleService;
use crate::services::notification::{OutcomeEvent, OutcomeSink};
use crate::services::promo::PromoService;
use crate::services::providers::{ProviderRegistry, INVOICE_TTL_SECONDS};
use crate::services::user::UserService;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::bytes_to_db;
use crate::utils::logging::{log_admin_action, log_database_operation, log_payment_event, log_user_action};

const CATALOG_CACHE_KEY: &str = "plans";

/// A created checkout, ready to be shown to the user
#[derive(Debug, Clone)]
pub struct Checkout {
    pub plan: Plan,
    pub payment: Payment,
    /// Where the user pays; `None` for Stars (paid in-chat) and free checkouts
    pub invoice_url: Option<String>,
    /// Set when the checkout was free and settled on the spot
    pub settled: Option<ReconcileOutcome>,
}

/// Provider-side correlation id for a new payment
fn new_provider_payment_id(provider: PaymentProvider) -> String {
    let prefix = match provider {
        PaymentProvider::TelegramStars => "stars",
        PaymentProvider::YooMoney => "yoomoney",
        PaymentProvider::Promo => "promo",
        PaymentProvider::CryptoBot => "cryptobot",
        PaymentProvider::Stripe => "stripe",
    };
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// A success event must be in the stored currency and cover the stored amount
fn check_settlement(payment: &Payment, amount: Decimal, currency: &str) -> Result<()> {
    if !payment.currency.eq_ignore_ascii_case(currency) {
        return Err(BotError::Validation(format!(
            "Payment {} expects {}, got {}",
            payment.provider_payment_id, payment.currency, currency
        )));
    }
    if amount < payment.amount {
        return Err(BotError::Validation(format!(
            "Payment {} expects {} {}, got {}",
            payment.provider_payment_id, payment.amount, payment.currency, amount
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentService {
    db: DatabaseService,
    users: UserService,
    promos: PromoService,
    providers: Arc<ProviderRegistry>,
    lifecycle: LifecycleService,
    cache: CacheService,
    locks: KeyedLocks,
    sink: Arc<dyn OutcomeSink>,
    catalog: Vec<Plan>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseService,
        users: UserService,
        promos: PromoService,
        providers: Arc<ProviderRegistry>,
        lifecycle: LifecycleService,
        cache: CacheService,
        locks: KeyedLocks,
        sink: Arc<dyn OutcomeSink>,
        settings: &Settings,
    ) -> Self {
        Self {
            db,
            users,
            promos,
            providers,
            lifecycle,
            cache,
            locks,
            sink,
            catalog: settings.plans.iter().map(Plan::from).collect(),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// The plan catalog
    pub async fn plans(&self) -> Vec<Plan> {
        if let Some(plans) = self.cache.get::<Vec<Plan>>(CacheScope::Catalog, CATALOG_CACHE_KEY).await {
            return plans;
        }
        self.cache.set(CacheScope::Catalog, CATALOG_CACHE_KEY, &self.catalog).await;
        self.catalog.clone()
    }

    pub async fn plan(&self, code: &str) -> Result<Plan> {
        let code = code.trim().to_lowercase();
        self.plans()
            .await
            .into_iter()
            .find(|p| p.code == code)
            .ok_or_else(|| BotError::not_found("Plan", code))
    }

    /// Price a plan for a provider, optionally with a promo code
    pub async fn quote(&self, telegram_id: i64, plan_code: &str, provider: PaymentProvider, promo_code: Option<&str>) -> Result<(Plan, Discount)> {
        let user = self.users.ensure_active(telegram_id).await?;
        let plan = self.plan(plan_code).await?;
        let (price, currency) = plan.price_for(provider);

        let discount = match promo_code {
            Some(code) => {
                let discount = self.promos.calculate_discount(code, price, user.id).await?;
                if currency == CURRENCY_XTR {
                    discount.in_whole_units()
                } else {
                    discount
                }
            }
            None => Discount {
                promo_code_id: 0,
                code: String::new(),
                original_amount: price,
                discount_amount: Decimal::ZERO,
                final_amount: price,
            },
        };
        Ok((plan, discount))
    }

    /// Open a pending payment for a plan
    ///
    /// The promo redemption is recorded in the same transaction as the
    /// payment, so a code cannot be spent twice by racing checkouts. Earlier
    /// abandoned checkouts are closed first and give their codes back. A fully
    /// discounted checkout settles immediately through the `promo` provider.
    pub async fn create_checkout(
        &self,
        telegram_id: i64,
        plan_code: &str,
        provider: PaymentProvider,
        promo_code: Option<&str>,
    ) -> Result<Checkout> {
        self.providers.ensure_enabled(provider)?;
        let user = self.users.ensure_active(telegram_id).await?;
        self.plan(plan_code).await?;

        let _guard = self.locks.acquire(IdempotencyKey::Checkout { telegram_id }).await;
        self.supersede_pending(user.id).await?;
        let (plan, discount) = self.quote(telegram_id, plan_code, provider, promo_code).await?;
        let (_, currency) = plan.price_for(provider);
        let provider = if discount.is_free() { PaymentProvider::Promo } else { provider };

        let description = format!("{} VPN plan", plan.name);
        let (provider_payment_id, invoice_url) = match provider {
            PaymentProvider::CryptoBot => {
                let payload = format!("{}:{}", telegram_id, plan.code);
                let invoice = self
                    .providers
                    .cryptobot()?
                    .create_invoice(discount.final_amount, &description, &payload)
                    .await?;
                let url = invoice.url().map(str::to_string);
                (invoice.invoice_id.to_string(), url)
            }
            PaymentProvider::YooMoney => {
                let id = new_provider_payment_id(provider);
                let url = self.providers.yoomoney_url(&id, discount.final_amount, &description)?;
                (id, Some(url))
            }
            other => (new_provider_payment_id(other), None),
        };

        let referral_id = self
            .db
            .referrals
            .find_pending_for_referred(user.id)
            .await?
            .map(|r| r.id);

        let has_promo = promo_code.is_some();
        let new_payment = NewPayment {
            user_id: user.id,
            provider,
            provider_payment_id,
            amount: discount.final_amount,
            original_amount: discount.original_amount,
            discount_amount: discount.discount_amount,
            currency: currency.to_string(),
            plan_code: plan.code.clone(),
            duration_days: i32::try_from(plan.duration_days)
                .map_err(|_| BotError::Config(format!("plan {} duration is out of range", plan.code)))?,
            data_limit_bytes: bytes_to_db(plan.data_limit_bytes),
            promo_code_id: has_promo.then_some(discount.promo_code_id),
            promo_code: has_promo.then(|| discount.code.clone()),
            referral_id,
        };

        let started = Instant::now();
        let mut tx = self.db.begin().await?;
        let payment = PaymentRepository::insert(&mut tx, &new_payment).await?;
        if let Some(promo_code_id) = payment.promo_code_id {
            PromoRepository::record_usage_in(&mut tx, promo_code_id, user.id, Some(payment.id)).await?;
        }
        SubscriptionRepository::insert(
            &mut tx,
            user.id,
            &plan.code,
            SubscriptionStatus::Pending,
            payment.data_limit_bytes,
            None,
            Some(payment.id),
        )
        .await?;
        tx.commit().await?;
        log_database_operation("create_checkout", "payments", started.elapsed().as_millis() as u64, true);

        log_payment_event(provider.as_str(), &payment.provider_payment_id, "created", Some(user.id));
        log_user_action(telegram_id, "checkout", Some(&format!("{} via {}", plan.code, provider)));
        info!(
            payment_id = payment.id,
            telegram_id,
            plan = %plan.code,
            amount = %payment.amount,
            currency = %payment.currency,
            "Checkout created"
        );

        let settled = if provider == PaymentProvider::Promo {
            let provider_payment_id = payment.provider_payment_id.clone();
            Some(
                self.reconcile(provider, &provider_payment_id, PaymentStatus::Completed, Decimal::ZERO, currency)
                    .await?,
            )
        } else {
            None
        };

        Ok(Checkout { plan, payment, invoice_url, settled })
    }

    /// Close the user's abandoned checkouts before a new one opens
    ///
    /// Stars and YooMoney checkouts have no provider-side expiry, so without
    /// this their promo redemptions would stay held forever. CryptoBot
    /// invoices are left alone while they can still be paid.
    async fn supersede_pending(&self, user_id: i64) -> Result<()> {
        let invoice_cutoff = Utc::now() - Duration::seconds(i64::from(INVOICE_TTL_SECONDS));
        for pending in self.db.payments.list_pending_for_user(user_id).await? {
            let status = match pending.provider {
                PaymentProvider::CryptoBot if pending.created_at > invoice_cutoff => continue,
                PaymentProvider::CryptoBot => PaymentStatus::Expired,
                _ => PaymentStatus::Cancelled,
            };

            let _guard = self
                .locks
                .acquire(IdempotencyKey::Payment {
                    provider: pending.provider,
                    provider_payment_id: pending.provider_payment_id.clone(),
                })
                .await;
            let started = Instant::now();
            let mut tx = self.db.begin().await?;
            let locked = PaymentRepository::lock_by_provider_id(&mut tx, pending.provider, &pending.provider_payment_id).await?;
            match locked {
                Some(payment) if !payment.status.is_terminal() => {
                    info!(payment_id = payment.id, user_id, status = %status, "Superseding abandoned checkout");
                    self.close(tx, payment, status, started, false).await?;
                }
                _ => drop(tx),
            }
        }
        Ok(())
    }

    /// Apply a provider's observation of a payment
    ///
    /// Runs under the payment row lock. A payment already in a terminal status
    /// is never re-applied; the stored outcome is returned with `replayed`.
    pub async fn reconcile(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        observed: PaymentStatus,
        amount: Decimal,
        currency: &str,
    ) -> Result<ReconcileOutcome> {
        self.apply_event(provider, provider_payment_id, observed, amount, currency, None)
            .await
    }

    async fn apply_event(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        observed: PaymentStatus,
        amount: Decimal,
        currency: &str,
        charge_id: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let _guard = self
            .locks
            .acquire(IdempotencyKey::Payment { provider, provider_payment_id: provider_payment_id.to_string() })
            .await;

        let started = Instant::now();
        let mut tx = self.db.begin().await?;
        let Some(payment) = PaymentRepository::lock_by_provider_id(&mut tx, provider, provider_payment_id).await? else {
            drop(tx);
            warn!(%provider, provider_payment_id, observed = %observed, "Event for unknown payment");
            log_payment_event(provider.as_str(), provider_payment_id, "unknown", None);
            return Err(BotError::UnknownPayment {
                provider: provider.to_string(),
                provider_payment_id: provider_payment_id.to_string(),
            });
        };

        if payment.status.is_terminal() {
            drop(tx);
            if payment.status != observed {
                warn!(
                    payment_id = payment.id,
                    stored = %payment.status,
                    observed = %observed,
                    "Event disagrees with settled payment; ignoring"
                );
            }
            log_payment_event(provider.as_str(), provider_payment_id, "replayed", Some(payment.user_id));
            return self.replayed(payment).await;
        }

        match observed {
            PaymentStatus::Pending => {
                drop(tx);
                debug!(payment_id = payment.id, "Payment still pending");
                Ok(ReconcileOutcome { payment, expires_at: None, replayed: false, provisioning_deferred: false })
            }
            PaymentStatus::Completed => {
                check_settlement(&payment, amount, currency)?;
                self.settle(tx, payment, charge_id, started).await
            }
            closed => self.close(tx, payment, closed, started, true).await,
        }
    }

    async fn replayed(&self, payment: Payment) -> Result<ReconcileOutcome> {
        let expires_at = if payment.status.is_success() {
            self.db
                .subscriptions
                .find_by_payment(payment.id)
                .await?
                .and_then(|s| s.expires_at)
        } else {
            None
        };
        Ok(ReconcileOutcome { payment, expires_at, replayed: true, provisioning_deferred: false })
    }

    async fn settle(
        &self,
        mut tx: sqlx::Transaction<'static, sqlx::Postgres>,
        payment: Payment,
        charge_id: Option<&str>,
        started: Instant,
    ) -> Result<ReconcileOutcome> {
        let now = Utc::now();
        let user = UserRepository::lock_by_id(&mut tx, payment.user_id).await?;
        let expires_at: DateTime<Utc> =
            renewal_base(now, user.expires_at) + Duration::days(i64::from(payment.duration_days));

        let subscription = match SubscriptionRepository::activate_for_payment(&mut tx, payment.id, now, expires_at).await? {
            Some(subscription) => subscription,
            None => {
                SubscriptionRepository::insert(
                    &mut tx,
                    user.id,
                    &payment.plan_code,
                    SubscriptionStatus::Active,
                    payment.data_limit_bytes,
                    Some(expires_at),
                    Some(payment.id),
                )
                .await?
            }
        };
        SubscriptionRepository::supersede_live(&mut tx, user.id, subscription.id, now).await?;
        let user = UserRepository::apply_paid_period(&mut tx, user.id, expires_at, payment.data_limit_bytes).await?;
        // Report the stored instant; the store keeps microseconds
        let expires_at = user.expires_at.unwrap_or(expires_at);

        // Only the first completed payment earns a commission; the user row lock orders settlements
        let first_payment = !PaymentRepository::has_completed_in(&mut tx, user.id).await?;
        let referral = match payment.referral_id {
            Some(referral_id) if first_payment => {
                ReferralRepository::activate(&mut tx, referral_id, payment.id, now).await?
            }
            Some(referral_id) => {
                warn!(referral_id, payment_id = payment.id, "Referral left pending: not the first payment");
                None
            }
            None => None,
        };
        let commission = referral.as_ref().map(|r| r.bonus_amount);

        let payment = PaymentRepository::mark_completed(&mut tx, payment.id, now, commission, charge_id).await?;
        tx.commit().await?;
        log_database_operation("settle_payment", "payments", started.elapsed().as_millis() as u64, true);

        log_payment_event(payment.provider.as_str(), &payment.provider_payment_id, "completed", Some(user.id));
        info!(
            payment_id = payment.id,
            telegram_id = user.telegram_id,
            plan = %payment.plan_code,
            expires_at = %expires_at,
            "Payment settled"
        );

        self.users.invalidate(user.telegram_id).await;
        let provisioning_deferred = self.lifecycle.provision(&user).await;
        self.sink
            .emit(OutcomeEvent::SubscriptionActivated {
                telegram_id: user.telegram_id,
                plan_code: payment.plan_code.clone(),
                expires_at,
            })
            .await;

        if let Some(referral) = referral {
            match self.db.users.find_by_id(referral.referrer_id).await {
                Ok(Some(referrer)) => {
                    self.cache
                        .invalidate(CacheScope::ReferralStats, &referrer.telegram_id.to_string())
                        .await;
                    self.sink
                        .emit(OutcomeEvent::ReferralBonusEarned {
                            referrer_telegram_id: referrer.telegram_id,
                            amount: referral.bonus_amount,
                        })
                        .await;
                }
                Ok(None) => {}
                Err(e) => warn!(referral_id = referral.id, error = %e, "Could not notify referrer"),
            }
        }

        Ok(ReconcileOutcome { payment, expires_at: Some(expires_at), replayed: false, provisioning_deferred })
    }

    async fn close(
        &self,
        mut tx: sqlx::Transaction<'static, sqlx::Postgres>,
        payment: Payment,
        status: PaymentStatus,
        started: Instant,
        notify: bool,
    ) -> Result<ReconcileOutcome> {
        let now = Utc::now();
        let payment = PaymentRepository::mark_closed(&mut tx, payment.id, status, now).await?;
        SubscriptionRepository::cancel_pending_for_payment(&mut tx, payment.id, now).await?;
        if let Some(promo_code_id) = payment.promo_code_id {
            let released = PromoRepository::release_usage_in(&mut tx, promo_code_id, payment.user_id, payment.id).await?;
            debug!(payment_id = payment.id, promo_code_id, released, "Promo redemption released");
        }
        tx.commit().await?;
        log_database_operation("close_payment", "payments", started.elapsed().as_millis() as u64, true);
        log_payment_event(payment.provider.as_str(), &payment.provider_payment_id, status.as_str(), Some(payment.user_id));

        if !notify {
            return Ok(ReconcileOutcome { payment, expires_at: None, replayed: false, provisioning_deferred: false });
        }
        if let Some(user) = self.db.users.find_by_id(payment.user_id).await? {
            self.sink
                .emit(OutcomeEvent::PaymentFailed {
                    telegram_id: user.telegram_id,
                    provider_payment_id: payment.provider_payment_id.clone(),
                    status: status.to_string(),
                })
                .await;
        }

        Ok(ReconcileOutcome { payment, expires_at: None, replayed: false, provisioning_deferred: false })
    }

    /// A payment owned by the user
    async fn owned_payment(&self, telegram_id: i64, payment_id: i64) -> Result<Payment> {
        let user = self.users.ensure_active(telegram_id).await?;
        self.db
            .payments
            .find_by_id(payment_id)
            .await?
            .filter(|p| p.user_id == user.id)
            .ok_or_else(|| BotError::not_found("Payment", payment_id))
    }

    /// Poll the provider for a payment the user started
    pub async fn check_payment(&self, telegram_id: i64, payment_id: i64) -> Result<ReconcileOutcome> {
        let payment = self.owned_payment(telegram_id, payment_id).await?;
        if payment.status.is_terminal() || payment.provider != PaymentProvider::CryptoBot {
            return self
                .reconcile(payment.provider, &payment.provider_payment_id, PaymentStatus::Pending, payment.amount, &payment.currency)
                .await;
        }

        let invoice = self.providers.cryptobot()?.get_invoice(&payment.provider_payment_id).await?;
        let observed = invoice.observed_status();
        let amount = match invoice.amount.as_deref().map(str::parse::<Decimal>) {
            Some(Ok(amount)) => amount,
            // A paid invoice is only settled against the amount CryptoBot reports
            _ if observed == PaymentStatus::Completed => {
                return Err(BotError::ProviderUnavailable(format!(
                    "CryptoBot invoice {} reported an unreadable amount: {:?}",
                    payment.provider_payment_id, invoice.amount
                )));
            }
            _ => payment.amount,
        };
        self.reconcile(PaymentProvider::CryptoBot, &payment.provider_payment_id, observed, amount, CURRENCY_USD)
            .await
    }

    pub async fn recent_payments(&self, telegram_id: i64) -> Result<Vec<Payment>> {
        let user = self.users.ensure_active(telegram_id).await?;
        self.db.payments.list_for_user(user.id, 10).await
    }

    /// Confirm a YooMoney transfer seen by an operator
    pub async fn confirm_manual(&self, actor_telegram_id: i64, payment_id: i64) -> Result<ReconcileOutcome> {
        self.users.require_role(actor_telegram_id, Role::Manager).await?;
        let payment = self
            .db
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| BotError::not_found("Payment", payment_id))?;
        if payment.provider != PaymentProvider::YooMoney {
            return Err(BotError::Validation(format!(
                "Payment {} is paid through {}, not confirmed by hand",
                payment_id, payment.provider
            )));
        }

        log_admin_action(actor_telegram_id, "confirm_payment", Some(&payment_id.to_string()), None);
        self.reconcile(
            payment.provider,
            &payment.provider_payment_id,
            PaymentStatus::Completed,
            payment.amount,
            &payment.currency,
        )
        .await
    }

    /// Answer a Stars pre-checkout query: the invoice must match a pending payment
    pub async fn validate_stars_checkout(&self, telegram_id: i64, payload: &str, total_amount: u32, currency: &str) -> Result<Payment> {
        let user = self.users.ensure_active(telegram_id).await?;
        let payment = self
            .db
            .payments
            .find_by_provider_id(PaymentProvider::TelegramStars, payload)
            .await?
            .ok_or_else(|| BotError::UnknownPayment {
                provider: PaymentProvider::TelegramStars.to_string(),
                provider_payment_id: payload.to_string(),
            })?;
        if payment.user_id != user.id {
            return Err(BotError::PermissionDenied("invoice belongs to another user".to_string()));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(BotError::InvalidStateTransition {
                from: payment.status.to_string(),
                to: PaymentStatus::Completed.to_string(),
            });
        }
        check_settlement(&payment, Decimal::from(total_amount), currency)?;
        Ok(payment)
    }

    /// Feed a Stars `successful_payment` update into reconciliation
    ///
    /// The Telegram charge id is stored with the settlement; refunds need it.
    pub async fn complete_stars_payment(
        &self,
        payload: &str,
        charge_id: &str,
        total_amount: u32,
        currency: &str,
    ) -> Result<ReconcileOutcome> {
        self.apply_event(
            PaymentProvider::TelegramStars,
            payload,
            PaymentStatus::Completed,
            Decimal::from(total_amount),
            currency,
            Some(charge_id),
        )
        .await
    }

    pub async fn revenue(&self, actor_telegram_id: i64) -> Result<Vec<RevenueRow>> {
        self.users.require_role(actor_telegram_id, Role::Admin).await?;
        self.db.payments.revenue().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn payment(amount: Decimal, currency: &str) -> Payment {
        let now = Utc::now();
        Payment {
            id: 1,
            user_id: 1,
            provider: PaymentProvider::CryptoBot,
            provider_payment_id: "pay_1".to_string(),
            amount,
            original_amount: amount,
            discount_amount: Decimal::ZERO,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            plan_code: "monthly".to_string(),
            duration_days: 30,
            data_limit_bytes: 0,
            promo_code_id: None,
            promo_code: None,
            referral_id: None,
            commission_amount: None,
            provider_charge_id: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_settlement_accepts_exact_and_overpayment() {
        let p = payment(Decimal::new(1000, 2), CURRENCY_USD);
        assert!(check_settlement(&p, Decimal::new(1000, 2), "USD").is_ok());
        assert!(check_settlement(&p, Decimal::new(1001, 2), "usd").is_ok());
    }

    #[test]
    fn test_settlement_rejects_underpayment_and_wrong_currency() {
        let p = payment(Decimal::new(1000, 2), CURRENCY_USD);
        assert_matches!(check_settlement(&p, Decimal::new(999, 2), "USD"), Err(BotError::Validation(_)));
        assert_matches!(check_settlement(&p, Decimal::new(1000, 2), CURRENCY_XTR), Err(BotError::Validation(_)));
    }

    #[test]
    fn test_provider_payment_ids_are_prefixed_and_unique() {
        let a = new_provider_payment_id(PaymentProvider::TelegramStars);
        let b = new_provider_payment_id(PaymentProvider::TelegramStars);
        assert!(a.starts_with("stars_"));
        assert_ne!(a, b);
        assert!(new_provider_payment_id(PaymentProvider::Promo).starts_with("promo_"));
    }
}
