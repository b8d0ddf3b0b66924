//! Promo code model and discount arithmetic

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::FromRow;
use crate::utils::errors::{BotError, Result};
use crate::utils::helpers::round_money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "promo_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PromoType {
    /// `value` is a percentage of the original amount
    Percent,
    /// `value` is an absolute amount in the payment currency
    Fixed,
    /// Grants the plan for free
    Trial,
}

impl fmt::Display for PromoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PromoType::Percent => "percent",
            PromoType::Fixed => "fixed",
            PromoType::Trial => "trial",
        })
    }
}

impl FromStr for PromoType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percent" | "%" => Ok(PromoType::Percent),
            "fixed" => Ok(PromoType::Fixed),
            "trial" => Ok(PromoType::Trial),
            other => Err(format!("unknown promo type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: i64,
    pub code: String,
    pub promo_type: PromoType,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.map_or(false, |max| self.used_count >= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoUsage {
    pub id: i64,
    pub promo_code_id: i64,
    pub user_id: i64,
    pub payment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Priced result of applying a promo code to an amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub promo_code_id: i64,
    pub code: String,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

impl Discount {
    pub fn is_free(&self) -> bool {
        self.final_amount.is_zero()
    }

    /// Re-round for currencies without fractional units (Telegram Stars)
    pub fn in_whole_units(self) -> Discount {
        let final_amount = self
            .final_amount
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Discount {
            discount_amount: self.original_amount - final_amount,
            final_amount,
            ..self
        }
    }
}

/// Apply a promo's arithmetic to `original_amount`
///
/// The discount never exceeds the amount, so the final amount is never
/// negative. Results are rounded to cents.
pub fn compute_discount(promo: &PromoCode, original_amount: Decimal) -> Discount {
    let original_amount = original_amount.max(Decimal::ZERO);
    let raw = match promo.promo_type {
        PromoType::Percent => original_amount * promo.value / Decimal::ONE_HUNDRED,
        PromoType::Fixed => promo.value,
        PromoType::Trial => original_amount,
    };
    let discount_amount = round_money(raw.max(Decimal::ZERO).min(original_amount));
    let final_amount = round_money((original_amount - discount_amount).max(Decimal::ZERO));

    Discount {
        promo_code_id: promo.id,
        code: promo.code.clone(),
        original_amount,
        discount_amount,
        final_amount,
    }
}

/// Normalize user input into the stored code form
pub fn normalize_promo_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePromoRequest {
    pub code: String,
    pub promo_type: PromoType,
    pub value: Decimal,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

impl CreatePromoRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        let code = normalize_promo_code(&self.code);
        if code.len() < 3 || code.len() > 50 || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(BotError::Validation(
                "Promo code must be 3-50 latin letters, digits or underscores".to_string(),
            ));
        }
        if self.value < Decimal::ZERO {
            return Err(BotError::Validation("Promo value cannot be negative".to_string()));
        }
        if self.promo_type == PromoType::Percent && self.value > Decimal::ONE_HUNDRED {
            return Err(BotError::Validation("Percent discount cannot exceed 100".to_string()));
        }
        if matches!(self.max_uses, Some(max) if max < 1) {
            return Err(BotError::Validation("Promo max uses must be positive".to_string()));
        }
        if matches!(self.expires_at, Some(at) if at <= now) {
            return Err(BotError::Validation("Promo expiry cannot be in the past".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn promo(promo_type: PromoType, value: Decimal) -> PromoCode {
        let now = Utc::now();
        PromoCode {
            id: 1,
            code: "SAVE10".to_string(),
            promo_type,
            value,
            max_uses: None,
            used_count: 0,
            expires_at: None,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percent_discount() {
        let d = compute_discount(&promo(PromoType::Percent, Decimal::new(10, 0)), Decimal::new(1000, 2));
        assert_eq!(d.discount_amount, Decimal::new(100, 2));
        assert_eq!(d.final_amount, Decimal::new(900, 2));
    }

    #[test]
    fn test_fixed_discount_capped_at_amount() {
        let d = compute_discount(&promo(PromoType::Fixed, Decimal::new(5, 0)), Decimal::new(300, 2));
        assert_eq!(d.discount_amount, Decimal::new(300, 2));
        assert_eq!(d.final_amount, Decimal::ZERO);
        assert!(d.is_free());
    }

    #[test]
    fn test_trial_promo_is_free() {
        let d = compute_discount(&promo(PromoType::Trial, Decimal::ZERO), Decimal::new(2500, 2));
        assert_eq!(d.discount_amount, Decimal::new(2500, 2));
        assert!(d.is_free());
    }

    #[test]
    fn test_whole_units_for_stars() {
        let d = compute_discount(&promo(PromoType::Percent, Decimal::new(15, 0)), Decimal::new(700, 0));
        assert_eq!(d.final_amount, Decimal::new(595, 0));
        let d = compute_discount(&promo(PromoType::Percent, Decimal::new(15, 0)), Decimal::new(203, 0)).in_whole_units();
        assert_eq!(d.final_amount, Decimal::new(173, 0));
        assert_eq!(d.discount_amount, Decimal::new(30, 0));
    }

    #[test]
    fn test_exhaustion_and_expiry() {
        let now = Utc::now();
        let mut p = promo(PromoType::Percent, Decimal::new(10, 0));
        assert!(!p.is_exhausted());
        p.max_uses = Some(2);
        p.used_count = 2;
        assert!(p.is_exhausted());
        p.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(p.is_expired(now));
    }

    #[test]
    fn test_create_request_validation() {
        let now = Utc::now();
        let mut req = CreatePromoRequest {
            code: "save10".to_string(),
            promo_type: PromoType::Percent,
            value: Decimal::new(10, 0),
            max_uses: Some(100),
            expires_at: None,
            created_by: None,
        };
        assert!(req.validate(now).is_ok());
        req.value = Decimal::new(150, 0);
        assert!(req.validate(now).is_err());
        req.value = Decimal::new(10, 0);
        req.code = "a b".to_string();
        assert!(req.validate(now).is_err());
    }

    proptest! {
        #[test]
        fn prop_discount_never_exceeds_amount(
            cents in 0i64..10_000_000,
            value in 0i64..100_000,
            kind in 0u8..3,
        ) {
            let promo_type = match kind {
                0 => PromoType::Percent,
                1 => PromoType::Fixed,
                _ => PromoType::Trial,
            };
            let value = if promo_type == PromoType::Percent {
                Decimal::new(value % 101, 0)
            } else {
                Decimal::new(value, 2)
            };
            let amount = Decimal::new(cents, 2);
            let d = compute_discount(&promo(promo_type, value), amount);
            prop_assert!(d.discount_amount >= Decimal::ZERO);
            prop_assert!(d.discount_amount <= amount);
            prop_assert!(d.final_amount >= Decimal::ZERO);
            prop_assert_eq!(d.discount_amount + d.final_amount, amount);
        }
    }
}
