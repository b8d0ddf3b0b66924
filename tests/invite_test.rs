//! Invite redemption against a real store

mod helpers;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use futures::future::join_all;
use helpers::*;
use hiddify_bot::models::invite::InviteUseOutcome;
use hiddify_bot::services::OutcomeEvent;
use hiddify_bot::BotError;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_single_use_invite_is_exhausted_for_second_user() {
    let ctx = TestContext::start().await;
    seed_user(&ctx, 100).await;
    seed_user(&ctx, 200).await;
    seed_invite(&ctx, "INV_abc", 1, None).await;

    let outcome = ctx.services.invite_service.redeem(100, "INV_abc").await.unwrap();
    assert_matches!(&outcome, InviteUseOutcome::Redeemed(invite) => {
        assert_eq!(invite.used_count, 1);
        assert!(!invite.is_active);
    });

    let second = ctx.services.invite_service.redeem(200, "INV_abc").await;
    assert_matches!(second, Err(BotError::Exhausted { entity: "Invite" }));

    let stored = ctx.db().invites.find_by_code("INV_abc").await.unwrap().unwrap();
    assert_eq!(stored.used_count, 1);
    assert_eq!(ctx.database.count_records("invite_redemptions").await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_repeat_redemption_by_same_user_consumes_nothing() {
    let ctx = TestContext::start().await;
    seed_user(&ctx, 100).await;
    seed_invite(&ctx, "INV_repeat01", 5, None).await;

    ctx.services.invite_service.redeem(100, "INV_repeat01").await.unwrap();
    let again = ctx.services.invite_service.redeem(100, "INV_repeat01").await.unwrap();

    assert_matches!(again, InviteUseOutcome::AlreadyRedeemed(_));
    let stored = ctx.db().invites.find_by_code("INV_repeat01").await.unwrap().unwrap();
    assert_eq!(stored.used_count, 1);
    assert_eq!(ctx.sink.named("invite_redeemed").len(), 1);
}

#[tokio::test]
#[serial]
async fn test_concurrent_redemptions_never_exceed_max_uses() {
    let ctx = TestContext::start().await;
    let users: Vec<i64> = (1..=10).map(|i| 1000 + i).collect();
    for &telegram_id in &users {
        seed_user(&ctx, telegram_id).await;
    }
    seed_invite(&ctx, "INV_race0001", 3, None).await;

    let attempts = users.iter().map(|&telegram_id| {
        let invites = ctx.services.invite_service.clone();
        tokio::spawn(async move { invites.redeem(telegram_id, "INV_race0001").await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let redeemed = results
        .iter()
        .filter(|r| matches!(r, Ok(InviteUseOutcome::Redeemed(_))))
        .count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(BotError::Exhausted { .. })))
        .count();
    assert_eq!(redeemed, 3);
    assert_eq!(exhausted, 7);

    let stored = ctx.db().invites.find_by_code("INV_race0001").await.unwrap().unwrap();
    assert_eq!(stored.used_count, 3);
    assert!(!stored.is_active);
    assert_eq!(ctx.database.count_records("invite_redemptions").await.unwrap(), 3);
}

#[tokio::test]
#[serial]
async fn test_unknown_and_expired_invites() {
    let ctx = TestContext::start().await;
    seed_user(&ctx, 100).await;
    seed_invite(&ctx, "INV_old00001", 5, Some(Utc::now() - Duration::days(1))).await;

    assert_matches!(
        ctx.services.invite_service.redeem(100, "INV_missing1").await,
        Err(BotError::NotFound { entity: "Invite", .. })
    );
    assert_matches!(
        ctx.services.invite_service.redeem(100, "INV_old00001").await,
        Err(BotError::Expired { entity: "Invite" })
    );
    assert_eq!(ctx.database.count_records("invite_redemptions").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_manager_created_invite_records_inviter() {
    let ctx = TestContext::start().await;
    let admin = seed_user(&ctx, ADMIN_ID).await;
    seed_user(&ctx, 100).await;

    assert_matches!(
        ctx.services.invite_service.create_invite(100, 1, None).await,
        Err(BotError::PermissionDenied(_))
    );

    let invite = ctx.services.invite_service.create_invite(ADMIN_ID, 2, None).await.unwrap();
    assert!(invite.code.starts_with("INV_"));
    assert_eq!(invite.created_by, Some(admin.id));

    ctx.services.invite_service.redeem(100, &invite.code).await.unwrap();
    let user = ctx.services.user_service.get_fresh(100).await.unwrap();
    assert_eq!(user.invited_by, Some(admin.id));

    assert_eq!(
        ctx.sink.named("invite_redeemed"),
        vec![OutcomeEvent::InviteRedeemed {
            telegram_id: 100,
            code: invite.code.clone(),
            inviter_telegram_id: Some(ADMIN_ID),
        }]
    );
}

#[tokio::test]
#[serial]
async fn test_used_up_invite_past_its_window_reports_expired() {
    let ctx = TestContext::start().await;
    seed_user(&ctx, 100).await;
    seed_user(&ctx, 200).await;
    seed_invite(&ctx, "INV_full0001", 1, Some(Utc::now() + Duration::days(1))).await;
    ctx.services.invite_service.redeem(100, "INV_full0001").await.unwrap();

    sqlx::query("UPDATE invites SET expires_at = $2 WHERE code = $1")
        .bind("INV_full0001")
        .bind(Utc::now() - Duration::hours(1))
        .execute(&ctx.database.pool)
        .await
        .unwrap();

    assert_matches!(
        ctx.services.invite_service.redeem(200, "INV_full0001").await,
        Err(BotError::Expired { entity: "Invite" })
    );
}
