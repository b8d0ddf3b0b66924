//! Helper functions and utilities
//!
//! This module contains common helper functions used throughout the application.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Bytes in one gibibyte
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Convert whole gigabytes to bytes
pub fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

/// Clamp an unsigned byte count into the store's BIGINT range
pub fn bytes_to_db(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Read a stored byte count; negative values never occur under the schema checks
pub fn bytes_from_db(bytes: i64) -> u64 {
    u64::try_from(bytes).unwrap_or(0)
}

/// Format a timestamp for display
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Round a money amount to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Truncate text to a maximum number of characters with ellipsis
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Convert bytes to human readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Generate a random lowercase hex string of `length` characters
pub fn generate_hex_token(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Build a referral deep link for the given referrer
pub fn referral_link(bot_username: &str, referrer_telegram_id: i64) -> String {
    format!("https://t.me/{}?start=ref_{}", bot_username, referrer_telegram_id)
}

/// Extract the referrer id from a `/start` payload such as `ref_456`
pub fn parse_referral_payload(payload: &str) -> Option<i64> {
    payload
        .strip_prefix("ref_")
        .and_then(|id| id.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
