//! Database module
//!
//! This module handles database connections and operations

pub mod connection;
pub mod repositories;
pub mod service;

// Re-export commonly used database components
pub use connection::{
    DatabasePool, DatabaseConfig, create_pool, run_migrations, health_check, is_unique_violation,
    is_foreign_key_violation,
};
pub use repositories::{
    UserRepository, InviteRepository, ReferralRepository, SubscriptionRepository, PaymentRepository,
    PromoRepository, TicketRepository,
};
pub use service::DatabaseService;
