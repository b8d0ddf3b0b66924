//! Database repositories module
//!
//! This module contains repository implementations for data access

pub mod user;
pub mod invite;
pub mod referral;
pub mod subscription;
pub mod payment;
pub mod promo;
pub mod ticket;

pub use user::UserRepository;
pub use invite::InviteRepository;
pub use referral::ReferralRepository;
pub use subscription::SubscriptionRepository;
pub use payment::{PaymentRepository, RevenueRow};
pub use promo::PromoRepository;
pub use ticket::TicketRepository;
