//! Bot handlers module
//!
//! This module contains all Telegram bot handlers organized by type:
//! - Command handlers for bot commands
//! - Payment handlers for Telegram Stars updates

pub mod commands;
pub mod payments;

// Re-export commonly used handler functions
pub use commands::{handle_command, Command};
pub use payments::{handle_pre_checkout, handle_successful_payment};
