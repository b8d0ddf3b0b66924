//! Plan catalog entries

use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use crate::config::PlanConfig;
use crate::models::payment::PaymentProvider;
use crate::utils::helpers::gb_to_bytes;

pub const CURRENCY_USD: &str = "USD";
/// Telegram Stars
pub const CURRENCY_XTR: &str = "XTR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub code: String,
    pub name: String,
    pub duration_days: u32,
    pub data_limit_bytes: u64,
    pub price_usd: Decimal,
    pub price_stars: u32,
}

impl Plan {
    /// Price and currency charged through `provider`
    pub fn price_for(&self, provider: PaymentProvider) -> (Decimal, &'static str) {
        match provider {
            PaymentProvider::TelegramStars => (Decimal::from(self.price_stars), CURRENCY_XTR),
            _ => (self.price_usd, CURRENCY_USD),
        }
    }
}

impl From<&PlanConfig> for Plan {
    fn from(config: &PlanConfig) -> Self {
        Self {
            code: config.code.clone(),
            name: config.name.clone(),
            duration_days: config.duration_days,
            data_limit_bytes: gb_to_bytes(config.data_limit_gb),
            price_usd: config.price_usd,
            price_stars: config.price_stars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_plan_from_config() {
        let settings = Settings::default();
        let plan = Plan::from(settings.plan("weekly").expect("weekly"));
        assert_eq!(plan.data_limit_bytes, 10 * 1024 * 1024 * 1024);
        assert_eq!(plan.price_for(PaymentProvider::CryptoBot), (Decimal::new(300, 2), CURRENCY_USD));
        assert_eq!(plan.price_for(PaymentProvider::TelegramStars), (Decimal::from(200u32), CURRENCY_XTR));
    }
}
