//! Loading and validating configuration files

use std::io::Write;
use std::path::PathBuf;
use assert_matches::assert_matches;
use hiddify_bot::{BotError, Settings};
use rust_decimal::Decimal;
use tempfile::NamedTempFile;

fn example_config() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
    std::fs::read_to_string(path).unwrap()
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_example_config_loads_and_validates() {
    let file = write_config(&example_config());
    let settings = Settings::from_path(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.plans.len(), 3);
    let monthly = settings.plan("monthly").unwrap();
    assert_eq!(monthly.price_usd, Decimal::new(1000, 2));
    assert_eq!(monthly.price_stars, 700);
    assert_eq!(settings.referral.bonus_amount, Decimal::ONE);
    assert!(settings.is_config_admin(555_666_777));
    assert_eq!(settings.panel.protocols.len(), 3);
}

#[test]
fn test_omitted_sections_fall_back_to_defaults() {
    let trimmed: String = example_config()
        .split("[trial]")
        .next()
        .unwrap()
        .to_string()
        + "[logging]\nlevel = \"debug\"\nfile_path = \"logs\"\n";
    let file = write_config(&trimmed);

    let settings = Settings::from_path(file.path()).unwrap();
    assert_eq!(settings.trial.days, 7);
    assert_eq!(settings.support.max_open_tickets, 3);
    assert!(settings.features.promo_codes);
    settings.validate().unwrap();
}

#[test]
fn test_invalid_values_are_rejected() {
    let config = example_config().replace("level = \"info\"", "level = \"loud\"");
    let settings = Settings::from_path(write_config(&config).path()).unwrap();
    assert_matches!(settings.validate(), Err(BotError::Config(message)) if message.contains("loud"));

    let config = example_config().replace("admin_ids = [555666777]", "admin_ids = []");
    let settings = Settings::from_path(write_config(&config).path()).unwrap();
    assert_matches!(settings.validate(), Err(BotError::Config(_)));

    let config = example_config().replace("code = \"quarterly\"", "code = \"monthly\"");
    let settings = Settings::from_path(write_config(&config).path()).unwrap();
    assert_matches!(settings.validate(), Err(BotError::Config(message)) if message.contains("Duplicate"));
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Settings::from_path("/nonexistent/hiddify-bot.toml").is_err());
}
