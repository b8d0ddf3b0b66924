//! Subscription and payment command handlers

use rust_decimal::prelude::ToPrimitive;
use teloxide::{Bot, types::{LabeledPrice, Message}, prelude::*};
use tracing::info;
use crate::handlers::commands::{parse_buy_args, parse_id, split_first};
use crate::middleware::Caller;
use crate::models::payment::{Payment, PaymentProvider, PaymentStatus, ReconcileOutcome};
use crate::models::plan::Plan;
use crate::services::ServiceFactory;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::{format_bytes, format_timestamp};

fn plan_line(plan: &Plan) -> String {
    format!(
        "{} ({}): {} days, {} - ${} or {} ⭐",
        plan.name,
        plan.code,
        plan.duration_days,
        format_bytes(plan.data_limit_bytes),
        plan.price_usd,
        plan.price_stars
    )
}

fn outcome_text(outcome: &ReconcileOutcome) -> String {
    let payment = &outcome.payment;
    let mut text = match payment.status {
        PaymentStatus::Completed => match outcome.expires_at {
            Some(expires_at) => format!("Payment #{} completed. Active until {}.", payment.id, format_timestamp(expires_at)),
            None => format!("Payment #{} completed.", payment.id),
        },
        PaymentStatus::Pending => format!("Payment #{} is still waiting for confirmation.", payment.id),
        other => format!("Payment #{} {}.", payment.id, other),
    };
    if outcome.provisioning_deferred {
        text.push_str("\nYour VPN account will be updated shortly.");
    }
    text
}

fn payment_line(payment: &Payment) -> String {
    format!(
        "#{} {} {} {} via {} - {}",
        payment.id, payment.plan_code, payment.amount, payment.currency, payment.provider, payment.status
    )
}

pub async fn handle_plans(bot: &Bot, msg: &Message, services: &ServiceFactory) -> Result<()> {
    let plans = services.payment_service.plans().await;
    let providers = services
        .payment_service
        .providers()
        .enabled_for_checkout()
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines: Vec<String> = plans.iter().map(plan_line).collect();
    lines.push(String::new());
    lines.push(format!("Pay with: {}", providers));
    lines.push("Buy with /buy <plan> [provider] [promo]".to_string());
    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

pub async fn handle_trial(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let activation = services.lifecycle_service.activate_trial(caller.telegram_id).await?;
    let mut text = match activation.subscription.expires_at {
        Some(expires_at) => format!("Your free trial is active until {}.", format_timestamp(expires_at)),
        None => "Your free trial is active.".to_string(),
    };
    if activation.provisioning_deferred {
        text.push_str("\nYour VPN account will be ready shortly.");
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn handle_buy(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let args = parse_buy_args(args)?;
    let provider = match args.provider {
        Some(provider) => provider,
        None => services
            .payment_service
            .providers()
            .enabled_for_checkout()
            .into_iter()
            .next()
            .ok_or_else(|| BotError::ProviderUnavailable("no payment provider is enabled".to_string()))?,
    };

    let checkout = services
        .payment_service
        .create_checkout(caller.telegram_id, &args.plan, provider, args.promo.as_deref())
        .await?;

    if let Some(outcome) = &checkout.settled {
        bot.send_message(msg.chat.id, outcome_text(outcome)).await?;
        return Ok(());
    }

    let payment = &checkout.payment;
    let mut summary = format!("{}: {} {}", checkout.plan.name, payment.amount, payment.currency);
    if !payment.discount_amount.is_zero() {
        summary.push_str(&format!(" (was {}, promo {})", payment.original_amount, payment.promo_code.as_deref().unwrap_or("")));
    }

    match payment.provider {
        PaymentProvider::TelegramStars => {
            let stars = payment
                .amount
                .to_u32()
                .ok_or_else(|| BotError::Validation("Stars amount out of range".to_string()))?;
            bot.send_invoice(
                msg.chat.id,
                checkout.plan.name.clone(),
                summary,
                payment.provider_payment_id.clone(),
                payment.currency.clone(),
                vec![LabeledPrice::new(checkout.plan.name.clone(), stars)],
            )
            .await?;
        }
        _ => {
            let mut text = format!("{}\nPayment #{}", summary, payment.id);
            if let Some(url) = &checkout.invoice_url {
                text.push_str(&format!("\nPay here: {}", url));
            }
            if payment.provider == PaymentProvider::CryptoBot {
                text.push_str(&format!("\nAfter paying, send /check {}", payment.id));
            }
            bot.send_message(msg.chat.id, text).await?;
        }
    }

    info!(telegram_id = caller.telegram_id, payment_id = payment.id, "Checkout sent");
    Ok(())
}

pub async fn handle_check(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    if args.trim().is_empty() {
        let payments = services.payment_service.recent_payments(caller.telegram_id).await?;
        let text = if payments.is_empty() {
            "You have no payments yet.".to_string()
        } else {
            payments.iter().map(payment_line).collect::<Vec<_>>().join("\n")
        };
        bot.send_message(msg.chat.id, text).await?;
        return Ok(());
    }

    let payment_id = parse_id(args, "payment id")?;
    let outcome = services.payment_service.check_payment(caller.telegram_id, payment_id).await?;
    bot.send_message(msg.chat.id, outcome_text(&outcome)).await?;
    Ok(())
}

pub async fn handle_status(bot: &Bot, msg: &Message, caller: &Caller, services: &ServiceFactory) -> Result<()> {
    let view = services.lifecycle_service.current_status(caller.telegram_id).await?;
    let entitlement = &view.entitlement;

    let mut lines = Vec::new();
    match (entitlement.status, entitlement.expires_at) {
        (Some(status), Some(expires_at)) => {
            lines.push(format!("Status: {} until {}", status, format_timestamp(expires_at)));
        }
        (Some(status), None) => lines.push(format!("Status: {}", status)),
        (None, _) => lines.push("You have no subscription. See /plans or try /trial.".to_string()),
    }
    if entitlement.status.is_some() {
        lines.push(format!(
            "Traffic: {} of {} used",
            format_bytes(entitlement.used_bytes),
            format_bytes(entitlement.data_limit_bytes)
        ));
    }
    if let Some(subscription) = &view.subscription {
        lines.push(format!("Plan: {}", subscription.plan_code));
    }
    if let Some(url) = &view.subscription_url {
        lines.push(format!("Subscription link: {}", url));
    }
    if view.panel_sync_pending {
        lines.push("Your VPN account is being updated.".to_string());
    }

    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

/// `/cancel` for yourself, `/cancel <telegram_id>` for managers
pub async fn handle_cancel(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let target = if args.trim().is_empty() {
        caller.telegram_id
    } else {
        parse_id(args, "user id")?
    };
    services.lifecycle_service.cancel_subscription(target, caller.telegram_id).await?;
    bot.send_message(msg.chat.id, "Subscription cancelled.").await?;
    Ok(())
}

pub async fn handle_promo(bot: &Bot, msg: &Message, caller: &Caller, args: &str, services: &ServiceFactory) -> Result<()> {
    let (code, rest) = split_first(args);
    let (plan_code, provider) = split_first(rest);
    if code.is_empty() || plan_code.is_empty() {
        return Err(BotError::Validation("Usage: /promo <code> <plan> [provider]".to_string()));
    }
    let provider = if provider.is_empty() {
        PaymentProvider::CryptoBot
    } else {
        provider.parse::<PaymentProvider>().map_err(BotError::Validation)?
    };

    let (plan, discount) = services
        .payment_service
        .quote(caller.telegram_id, plan_code, provider, Some(code))
        .await?;
    let (_, currency) = plan.price_for(provider);
    bot.send_message(
        msg.chat.id,
        format!(
            "{} with {}: {} {} instead of {} (you save {}).\nBuy with /buy {} {} {}",
            plan.name,
            discount.code,
            discount.final_amount,
            currency,
            discount.original_amount,
            discount.discount_amount,
            plan.code,
            provider,
            discount.code
        ),
    )
    .await?;
    Ok(())
}
