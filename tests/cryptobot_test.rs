//! CryptoBot checkout and polling against a mock Crypto Pay API

mod helpers;

use assert_matches::assert_matches;
use helpers::*;
use hiddify_bot::models::payment::{PaymentProvider, PaymentStatus};
use hiddify_bot::BotError;
use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_with_cryptobot(server: &MockServer) -> TestContext {
    TestContext::start_with_config(TestConfig {
        cryptobot_api_url: Some(server.uri()),
        ..Default::default()
    })
    .await
}

async fn mock_invoice_created(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/createInvoice"))
        .and(header("Crypto-Pay-API-Token", "test-crypto-token"))
        .and(body_partial_json(json!({ "currency_type": "fiat", "fiat": "USD", "amount": "10.00" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {
                "invoice_id": 4242,
                "status": "active",
                "bot_invoice_url": "https://t.me/CryptoBot?start=IV4242"
            }
        })))
        .mount(server)
        .await;
}

async fn mock_invoice_status(server: &MockServer, status: &str) {
    mock_invoice_report(server, status, "10.00").await;
}

async fn mock_invoice_report(server: &MockServer, status: &str, amount: &str) {
    Mock::given(method("POST"))
        .and(path("/getInvoices"))
        .and(body_partial_json(json!({ "invoice_ids": "4242" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "items": [{ "invoice_id": 4242, "status": status, "amount": amount }] }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_checkout_creates_invoice_and_polling_settles() {
    let server = MockServer::start().await;
    let ctx = start_with_cryptobot(&server).await;
    seed_user(&ctx, 100).await;
    mock_invoice_created(&server).await;
    let payments = &ctx.services.payment_service;

    let checkout = payments
        .create_checkout(100, "monthly", PaymentProvider::CryptoBot, None)
        .await
        .unwrap();
    assert_eq!(checkout.payment.provider_payment_id, "4242");
    assert_eq!(checkout.payment.amount, usd(1000));
    assert_eq!(checkout.invoice_url.as_deref(), Some("https://t.me/CryptoBot?start=IV4242"));
    assert!(checkout.settled.is_none());

    mock_invoice_status(&server, "paid").await;
    let outcome = payments.check_payment(100, checkout.payment.id).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Completed);
    assert!(!outcome.replayed);
    assert!(outcome.expires_at.is_some());

    let again = payments.check_payment(100, checkout.payment.id).await.unwrap();
    assert!(again.replayed);
    assert_eq!(again.expires_at, outcome.expires_at);
}

#[tokio::test]
#[serial]
async fn test_unpaid_invoice_leaves_payment_pending() {
    let server = MockServer::start().await;
    let ctx = start_with_cryptobot(&server).await;
    seed_user(&ctx, 100).await;
    seed_user(&ctx, 200).await;
    mock_invoice_created(&server).await;
    mock_invoice_status(&server, "active").await;
    let payments = &ctx.services.payment_service;

    let checkout = payments
        .create_checkout(100, "monthly", PaymentProvider::CryptoBot, None)
        .await
        .unwrap();

    let outcome = payments.check_payment(100, checkout.payment.id).await.unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Pending);
    assert!(outcome.expires_at.is_none());

    // someone else's payment looks missing
    assert_matches!(
        payments.check_payment(200, checkout.payment.id).await,
        Err(BotError::NotFound { .. })
    );
}

#[tokio::test]
#[serial]
async fn test_api_error_is_provider_unavailable() {
    let server = MockServer::start().await;
    let ctx = start_with_cryptobot(&server).await;
    seed_user(&ctx, 100).await;
    Mock::given(method("POST"))
        .and(path("/createInvoice"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "ok": false,
            "error": { "code": 400, "name": "AMOUNT_TOO_SMALL" }
        })))
        .mount(&server)
        .await;

    assert_matches!(
        ctx.services
            .payment_service
            .create_checkout(100, "monthly", PaymentProvider::CryptoBot, None)
            .await,
        Err(BotError::ProviderUnavailable(message)) if message.contains("AMOUNT_TOO_SMALL")
    );
    assert_eq!(ctx.database.count_records("payments").await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_paid_invoice_with_unreadable_amount_is_not_settled() {
    let server = MockServer::start().await;
    let ctx = start_with_cryptobot(&server).await;
    seed_user(&ctx, 100).await;
    mock_invoice_created(&server).await;
    mock_invoice_report(&server, "paid", "ten dollars").await;
    let payments = &ctx.services.payment_service;

    let checkout = payments
        .create_checkout(100, "monthly", PaymentProvider::CryptoBot, None)
        .await
        .unwrap();

    assert_matches!(
        payments.check_payment(100, checkout.payment.id).await,
        Err(BotError::ProviderUnavailable(message)) if message.contains("ten dollars")
    );
    let stored = ctx.db().payments.find_by_id(checkout.payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(ctx.sink.events().is_empty());
}
