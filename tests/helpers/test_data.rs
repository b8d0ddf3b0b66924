//! Seed data builders

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use hiddify_bot::database::PaymentRepository;
use hiddify_bot::models::invite::{CreateInviteRequest, Invite};
use hiddify_bot::models::payment::{NewPayment, Payment, PaymentProvider};
use hiddify_bot::models::promo::{CreatePromoRequest, PromoCode, PromoType};
use hiddify_bot::models::user::User;

use super::test_context::TestContext;

/// Register a user the way `/start` does
pub async fn seed_user(ctx: &TestContext, telegram_id: i64) -> User {
    ctx.services
        .user_service
        .register(telegram_id, Some(format!("user{}", telegram_id)), Some(format!("User {}", telegram_id)))
        .await
        .expect("Failed to register user")
}

/// Store an invite with a fixed code, bypassing code generation
pub async fn seed_invite(ctx: &TestContext, code: &str, max_uses: i32, expires_at: Option<DateTime<Utc>>) -> Invite {
    ctx.db()
        .invites
        .create(CreateInviteRequest {
            code: code.to_string(),
            created_by: None,
            max_uses,
            expires_at,
        })
        .await
        .expect("Failed to create invite")
}

pub async fn seed_promo(ctx: &TestContext, code: &str, promo_type: PromoType, value: Decimal, max_uses: Option<i32>) -> PromoCode {
    ctx.db()
        .promos
        .create(CreatePromoRequest {
            code: code.to_string(),
            promo_type,
            value,
            max_uses,
            expires_at: None,
            created_by: None,
        })
        .await
        .expect("Failed to create promo code")
}

pub fn usd(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Store a pending USD payment with a caller-chosen provider id
pub async fn seed_pending_payment(
    ctx: &TestContext,
    user: &User,
    provider: PaymentProvider,
    provider_payment_id: &str,
    plan_code: &str,
) -> Payment {
    let plan = ctx.settings.plan(plan_code).expect("unknown plan");
    let new_payment = NewPayment {
        user_id: user.id,
        provider,
        provider_payment_id: provider_payment_id.to_string(),
        amount: plan.price_usd,
        original_amount: plan.price_usd,
        discount_amount: Decimal::ZERO,
        currency: "USD".to_string(),
        plan_code: plan.code.clone(),
        duration_days: plan.duration_days as i32,
        data_limit_bytes: (plan.data_limit_gb * 1024 * 1024 * 1024) as i64,
        promo_code_id: None,
        promo_code: None,
        referral_id: None,
    };

    let mut tx = ctx.database.pool.begin().await.expect("Failed to begin transaction");
    let payment = PaymentRepository::insert(&mut tx, &new_payment).await.expect("Failed to insert payment");
    tx.commit().await.expect("Failed to commit payment");
    payment
}

/// Whether two instants are within a minute of each other
pub fn roughly_equal(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_seconds().abs() < 60
}
