//! Telegram Stars payment updates
//!
//! Stars invoices carry our provider payment id as their payload. The
//! pre-checkout query is answered after checking it against the pending
//! payment; the successful-payment message feeds reconciliation.

use std::sync::Arc;
use teloxide::{Bot, types::{Message, PreCheckoutQuery}, prelude::*};
use tracing::{debug, info, warn};
use crate::services::ServiceFactory;
use crate::utils::errors::Result;
use crate::utils::helpers::format_timestamp;

pub async fn handle_pre_checkout(bot: Bot, query: PreCheckoutQuery, services: Arc<ServiceFactory>) -> Result<()> {
    let telegram_id = query.from.id.0 as i64;
    debug!(telegram_id, payload = %query.invoice_payload, "Pre-checkout query");

    let verdict = services
        .payment_service
        .validate_stars_checkout(telegram_id, &query.invoice_payload, query.total_amount, &query.currency)
        .await;

    match verdict {
        Ok(_) => {
            bot.answer_pre_checkout_query(query.id, true).await?;
        }
        Err(e) => {
            warn!(telegram_id, payload = %query.invoice_payload, error = %e, "Pre-checkout rejected");
            bot.answer_pre_checkout_query(query.id, false)
                .error_message(e.user_message())
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_successful_payment(bot: Bot, msg: Message, services: Arc<ServiceFactory>) -> Result<()> {
    let Some(paid) = msg.successful_payment() else {
        return Ok(());
    };
    info!(payload = %paid.invoice_payload, charge = %paid.telegram_payment_charge_id, "Stars payment received");

    let text = match services
        .payment_service
        .complete_stars_payment(
            &paid.invoice_payload,
            &paid.telegram_payment_charge_id,
            paid.total_amount,
            &paid.currency,
        )
        .await
    {
        Ok(outcome) => match outcome.expires_at {
            Some(expires_at) => format!("Thank you! Your subscription is active until {}.", format_timestamp(expires_at)),
            None => "Thank you! Your payment was received.".to_string(),
        },
        Err(e) => {
            warn!(payload = %paid.invoice_payload, error = %e, "Stars payment could not be applied");
            e.user_message()
        }
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
