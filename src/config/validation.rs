//! Configuration validation module
//!
//! This module provides validation functions for application configuration
//! to ensure all required settings are properly configured.

use std::collections::HashSet;
use rust_decimal::Decimal;
use crate::utils::errors::{BotError, Result};
use super::Settings;

/// Validate all configuration settings
pub fn validate_settings(settings: &Settings) -> Result<()> {
    validate_bot_config(&settings.bot)?;
    validate_database_config(&settings.database)?;
    validate_redis_config(&settings.redis)?;
    validate_panel_config(&settings.panel)?;
    validate_plans(&settings.plans)?;
    validate_trial_config(&settings.trial)?;
    validate_referral_config(&settings.referral)?;
    validate_support_config(&settings.support)?;
    validate_logging_config(&settings.logging)?;

    Ok(())
}

/// Validate bot configuration
fn validate_bot_config(config: &super::BotConfig) -> Result<()> {
    if config.token.is_empty() {
        return Err(BotError::Config(
            "Bot token is required".to_string()
        ));
    }

    if config.username.is_empty() {
        return Err(BotError::Config(
            "Bot username is required for referral links".to_string()
        ));
    }

    if config.admin_ids.is_empty() {
        return Err(BotError::Config(
            "At least one admin ID must be configured".to_string()
        ));
    }

    Ok(())
}

/// Validate database configuration
fn validate_database_config(config: &super::DatabaseConfig) -> Result<()> {
    if config.url.is_empty() {
        return Err(BotError::Config(
            "Database URL is required".to_string()
        ));
    }

    if config.max_connections == 0 {
        return Err(BotError::Config(
            "Max connections must be greater than 0".to_string()
        ));
    }

    if config.min_connections > config.max_connections {
        return Err(BotError::Config(
            "Min connections cannot be greater than max connections".to_string()
        ));
    }

    Ok(())
}

/// Validate Redis configuration
fn validate_redis_config(config: &super::RedisConfig) -> Result<()> {
    if config.enabled && config.url.is_empty() {
        return Err(BotError::Config(
            "Redis URL is required when caching is enabled".to_string()
        ));
    }

    Ok(())
}

/// Validate VPN panel configuration
fn validate_panel_config(config: &super::PanelConfig) -> Result<()> {
    if config.api_url.is_empty() {
        return Err(BotError::Config(
            "Panel API URL is required".to_string()
        ));
    }
    url::Url::parse(&config.api_url)?;

    if config.api_token.is_empty() {
        return Err(BotError::Config(
            "Panel API token is required".to_string()
        ));
    }

    if config.timeout_seconds == 0 {
        return Err(BotError::Config(
            "Panel timeout must be greater than 0".to_string()
        ));
    }

    if config.protocols.is_empty() {
        return Err(BotError::Config(
            "At least one VPN protocol must be enabled".to_string()
        ));
    }

    Ok(())
}

/// Validate the plan catalog
fn validate_plans(plans: &[super::PlanConfig]) -> Result<()> {
    if plans.is_empty() {
        return Err(BotError::Config(
            "At least one plan must be configured".to_string()
        ));
    }

    let mut codes = HashSet::new();
    for plan in plans {
        if !codes.insert(plan.code.as_str()) {
            return Err(BotError::Config(format!("Duplicate plan code: {}", plan.code)));
        }
        if plan.duration_days == 0 {
            return Err(BotError::Config(format!("Plan {} must last at least one day", plan.code)));
        }
        if plan.price_usd <= Decimal::ZERO {
            return Err(BotError::Config(format!("Plan {} must have a positive price", plan.code)));
        }
    }

    Ok(())
}

/// Validate trial configuration
fn validate_trial_config(config: &super::TrialConfig) -> Result<()> {
    if config.days == 0 || config.data_limit_gb == 0 {
        return Err(BotError::Config(
            "Trial duration and data limit must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate referral configuration
fn validate_referral_config(config: &super::ReferralConfig) -> Result<()> {
    if config.bonus_amount < Decimal::ZERO {
        return Err(BotError::Config(
            "Referral bonus cannot be negative".to_string()
        ));
    }

    Ok(())
}

fn validate_support_config(config: &super::SupportConfig) -> Result<()> {
    if config.max_open_tickets == 0 {
        return Err(BotError::Config(
            "Max open tickets must be greater than 0".to_string()
        ));
    }

    Ok(())
}

/// Validate logging configuration
fn validate_logging_config(config: &super::LoggingConfig) -> Result<()> {
    if config.level.is_empty() {
        return Err(BotError::Config(
            "Log level is required".to_string()
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.level.as_str()) {
        return Err(BotError::Config(
            format!("Invalid log level: {}. Valid levels: {:?}", config.level, valid_levels)
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.bot.token = "12345:token".to_string();
        settings.bot.admin_ids = vec![1];
        settings.panel.api_token = "secret".to_string();
        settings
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(validate_settings(&valid_settings()).is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let mut settings = valid_settings();
        settings.bot.token.clear();
        assert_matches!(validate_settings(&settings), Err(BotError::Config(_)));
    }

    #[test]
    fn test_duplicate_plan_rejected() {
        let mut settings = valid_settings();
        let dup = settings.plans[0].clone();
        settings.plans.push(dup);
        assert_matches!(validate_settings(&settings), Err(BotError::Config(msg)) if msg.contains("Duplicate"));
    }

    #[test]
    fn test_bad_panel_url_rejected() {
        let mut settings = valid_settings();
        settings.panel.api_url = "not a url".to_string();
        assert_matches!(validate_settings(&settings), Err(BotError::UrlParse(_)));
    }
}
