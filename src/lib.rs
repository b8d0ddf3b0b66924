//! Hiddify VPN Telegram Bot
//!
//! A Telegram bot that resells Hiddify VPN subscriptions. This library
//! provides the entitlement store, subscription lifecycle, payment
//! reconciliation, referral and promo ledgers, support tickets and the
//! Telegram command surface on top of them.

pub mod config;
pub mod handlers;
pub mod services;
pub mod models;
pub mod database;
pub mod utils;
pub mod middleware;

// Re-export commonly used types
pub use config::Settings;
pub use utils::errors::{BotError, Result};

// Re-export main components for easy access
pub use database::DatabaseService;
pub use services::ServiceFactory;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!("{} v{}", NAME, VERSION)
}
