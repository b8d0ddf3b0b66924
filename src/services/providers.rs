//! Payment provider capabilities and clients

use std::collections::HashMap;
use std::time::Duration;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;
use crate::config::{PaymentsConfig, Settings};
use crate::models::payment::{PaymentProvider, PaymentStatus};
use crate::utils::errors::{BotError, Result};
use crate::utils::logging::log_api_error;

pub const DEFAULT_CRYPTOBOT_API_URL: &str = "https://pay.crypt.bot/api";
const YOOMONEY_QUICKPAY_URL: &str = "https://yoomoney.ru/quickpay/confirm.xml";
const CRYPTOBOT_ASSET: &str = "USDT";
/// How long a CryptoBot invoice stays payable
pub const INVOICE_TTL_SECONDS: u32 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCapability {
    Enabled,
    Disabled(String),
}

impl ProviderCapability {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ProviderCapability::Enabled)
    }
}

/// Which providers may take payments, resolved once at startup
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    capabilities: HashMap<PaymentProvider, ProviderCapability>,
    cryptobot: Option<CryptoBotClient>,
    yoomoney_receiver: Option<String>,
}

impl ProviderRegistry {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let payments = &settings.payments;
        let mut capabilities = HashMap::new();

        let cryptobot = match payments.cryptobot_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                capabilities.insert(PaymentProvider::CryptoBot, ProviderCapability::Enabled);
                Some(CryptoBotClient::new(payments, token)?)
            }
            None => {
                capabilities.insert(
                    PaymentProvider::CryptoBot,
                    ProviderCapability::Disabled("CryptoBot token is not configured".to_string()),
                );
                None
            }
        };

        let stars = if payments.telegram_stars_enabled {
            ProviderCapability::Enabled
        } else {
            ProviderCapability::Disabled("Telegram Stars are turned off".to_string())
        };
        capabilities.insert(PaymentProvider::TelegramStars, stars);

        let yoomoney_receiver = payments.yoomoney_token.clone().filter(|t| !t.is_empty());
        let yoomoney = if yoomoney_receiver.is_some() {
            ProviderCapability::Enabled
        } else {
            ProviderCapability::Disabled("YooMoney wallet is not configured".to_string())
        };
        capabilities.insert(PaymentProvider::YooMoney, yoomoney);

        capabilities.insert(PaymentProvider::Promo, ProviderCapability::Enabled);
        capabilities.insert(
            PaymentProvider::Stripe,
            ProviderCapability::Disabled("Stripe is no longer supported".to_string()),
        );

        for provider in PaymentProvider::ALL {
            if let Some(ProviderCapability::Disabled(reason)) = capabilities.get(&provider) {
                info!(provider = %provider, reason = %reason, "Payment provider disabled");
            }
        }

        Ok(Self { capabilities, cryptobot, yoomoney_receiver })
    }

    pub fn capability(&self, provider: PaymentProvider) -> ProviderCapability {
        self.capabilities
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| ProviderCapability::Disabled("unknown provider".to_string()))
    }

    /// Fail with `ProviderUnavailable` unless the provider may take payments
    pub fn ensure_enabled(&self, provider: PaymentProvider) -> Result<()> {
        match self.capability(provider) {
            ProviderCapability::Enabled => Ok(()),
            ProviderCapability::Disabled(reason) => Err(BotError::ProviderUnavailable(format!("{}: {}", provider, reason))),
        }
    }

    /// Providers a user can pick at checkout
    pub fn enabled_for_checkout(&self) -> Vec<PaymentProvider> {
        PaymentProvider::ALL
            .into_iter()
            .filter(|p| *p != PaymentProvider::Promo && self.capability(*p).is_enabled())
            .collect()
    }

    pub fn cryptobot(&self) -> Result<&CryptoBotClient> {
        self.cryptobot
            .as_ref()
            .ok_or_else(|| BotError::ProviderUnavailable("CryptoBot is not configured".to_string()))
    }

    /// YooMoney quickpay link carrying our payment id as the label
    pub fn yoomoney_url(&self, label: &str, amount: Decimal, description: &str) -> Result<String> {
        let receiver = self
            .yoomoney_receiver
            .as_deref()
            .ok_or_else(|| BotError::ProviderUnavailable("YooMoney is not configured".to_string()))?;

        let mut url = Url::parse(YOOMONEY_QUICKPAY_URL)?;
        url.query_pairs_mut()
            .append_pair("receiver", receiver)
            .append_pair("quickpay-form", "shop")
            .append_pair("targets", description)
            .append_pair("paymentType", "AC")
            .append_pair("sum", &amount.to_string())
            .append_pair("label", label);

        Ok(url.into())
    }
}

/// Invoice as returned by the Crypto Pay API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CryptoInvoice {
    pub invoice_id: i64,
    pub status: String,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub bot_invoice_url: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl CryptoInvoice {
    pub fn url(&self) -> Option<&str> {
        self.bot_invoice_url.as_deref().or(self.pay_url.as_deref())
    }

    /// Payment status this invoice state maps to
    pub fn observed_status(&self) -> PaymentStatus {
        match self.status.as_str() {
            "paid" => PaymentStatus::Completed,
            "expired" => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CryptoResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InvoiceItems {
    items: Vec<CryptoInvoice>,
}

#[derive(Serialize)]
struct CreateInvoiceRequest<'a> {
    currency_type: &'a str,
    fiat: &'a str,
    accepted_assets: &'a str,
    amount: String,
    description: &'a str,
    payload: &'a str,
    expires_in: u32,
}

/// Crypto Pay API client
#[derive(Debug, Clone)]
pub struct CryptoBotClient {
    client: Client,
    api_url: String,
    token: String,
}

impl CryptoBotClient {
    pub fn new(config: &PaymentsConfig, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("HiddifyBot/1.0")
            .build()?;

        let api_url = config
            .cryptobot_api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CRYPTOBOT_API_URL.to_string());

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn unavailable(context: &str, error: impl std::fmt::Display) -> BotError {
        let error = error.to_string();
        log_api_error("cryptobot", &error, Some(context));
        BotError::ProviderUnavailable(format!("CryptoBot {}: {}", context, error))
    }

    async fn call<T, B>(&self, method: &str, body: &B) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.api_url, method);
        debug!(url = %url, "Calling Crypto Pay API");

        let response = self.client
            .post(&url)
            .header("Crypto-Pay-API-Token", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| Self::unavailable(method, e))?;

        let status = response.status();
        let parsed: CryptoResponse<T> = response
            .json()
            .await
            .map_err(|e| Self::unavailable(method, format!("HTTP {}: {}", status, e)))?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => {
                let error = parsed.error.map(|e| e.to_string()).unwrap_or_else(|| format!("HTTP {}", status));
                Err(Self::unavailable(method, error))
            }
        }
    }

    /// Create a USD-denominated invoice payable in USDT
    pub async fn create_invoice(&self, amount: Decimal, description: &str, payload: &str) -> Result<CryptoInvoice> {
        let request = CreateInvoiceRequest {
            currency_type: "fiat",
            fiat: "USD",
            accepted_assets: CRYPTOBOT_ASSET,
            amount: amount.to_string(),
            description,
            payload,
            expires_in: INVOICE_TTL_SECONDS,
        };

        let invoice: CryptoInvoice = self.call("createInvoice", &request).await?;
        info!(invoice_id = invoice.invoice_id, amount = %amount, "CryptoBot invoice created");
        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> Result<CryptoInvoice> {
        let body = serde_json::json!({ "invoice_ids": invoice_id });
        let items: InvoiceItems = self.call("getInvoices", &body).await?;

        items
            .items
            .into_iter()
            .next()
            .ok_or_else(|| BotError::not_found("Invoice", invoice_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(payments: PaymentsConfig) -> Settings {
        Settings { payments, ..Settings::default() }
    }

    #[test]
    fn test_promo_always_enabled_and_stripe_always_disabled() {
        let registry = ProviderRegistry::from_settings(&settings_with(PaymentsConfig {
            stripe_secret_key: Some("sk_live".to_string()),
            ..PaymentsConfig::default()
        }))
        .expect("registry");

        assert!(registry.capability(PaymentProvider::Promo).is_enabled());
        assert!(!registry.capability(PaymentProvider::Stripe).is_enabled());
        assert!(!registry.capability(PaymentProvider::CryptoBot).is_enabled());
        assert!(matches!(
            registry.ensure_enabled(PaymentProvider::Stripe),
            Err(BotError::ProviderUnavailable(_))
        ));
        assert!(registry.enabled_for_checkout().is_empty());
    }

    #[test]
    fn test_enabled_providers_follow_credentials() {
        let registry = ProviderRegistry::from_settings(&settings_with(PaymentsConfig {
            cryptobot_token: Some("123:abc".to_string()),
            telegram_stars_enabled: true,
            yoomoney_token: Some("4100111".to_string()),
            ..PaymentsConfig::default()
        }))
        .expect("registry");

        assert_eq!(
            registry.enabled_for_checkout(),
            vec![PaymentProvider::CryptoBot, PaymentProvider::TelegramStars, PaymentProvider::YooMoney]
        );
        assert!(registry.cryptobot().is_ok());
    }

    #[test]
    fn test_yoomoney_url_carries_label_and_sum() {
        let registry = ProviderRegistry::from_settings(&settings_with(PaymentsConfig {
            yoomoney_token: Some("4100111".to_string()),
            ..PaymentsConfig::default()
        }))
        .expect("registry");

        let url = registry
            .yoomoney_url("yoomoney_1", Decimal::new(1000, 2), "Month")
            .expect("url");
        assert!(url.starts_with(YOOMONEY_QUICKPAY_URL));
        assert!(url.contains("label=yoomoney_1"));
        assert!(url.contains("sum=10.00"));
    }

    #[test]
    fn test_error_response_without_result_parses() {
        let body = r#"{"ok":false,"error":{"code":401,"name":"UNAUTHORIZED"}}"#;
        let response: CryptoResponse<CryptoInvoice> = serde_json::from_str(body).expect("error body");
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert!(response.error.is_some_and(|e| e.to_string().contains("UNAUTHORIZED")));

        let body = r#"{"ok":true,"result":{"items":[{"invoice_id":7,"status":"active"}]}}"#;
        let response: CryptoResponse<InvoiceItems> = serde_json::from_str(body).expect("items body");
        let items = response.result.expect("result").items;
        assert_eq!(items[0].invoice_id, 7);
        assert!(items[0].amount.is_none());
    }

    #[test]
    fn test_invoice_status_mapping() {
        let mut invoice = CryptoInvoice {
            invoice_id: 1,
            status: "paid".to_string(),
            pay_url: Some("https://t.me/CryptoBot?start=x".to_string()),
            bot_invoice_url: None,
            amount: Some("10.00".to_string()),
            payload: None,
        };
        assert_eq!(invoice.observed_status(), PaymentStatus::Completed);
        assert_eq!(invoice.url(), Some("https://t.me/CryptoBot?start=x"));
        invoice.status = "expired".to_string();
        assert_eq!(invoice.observed_status(), PaymentStatus::Expired);
        invoice.status = "active".to_string();
        assert_eq!(invoice.observed_status(), PaymentStatus::Pending);
    }
}
