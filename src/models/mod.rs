//! Data models module
//!
//! This module contains all data structures used throughout the application

pub mod user;
pub mod invite;
pub mod referral;
pub mod subscription;
pub mod payment;
pub mod promo;
pub mod ticket;
pub mod plan;

// Re-export commonly used models
pub use user::{User, Role, Entitlement, CreateUserRequest, UserStats};
pub use invite::{Invite, InviteRedemption, InviteUseOutcome, CreateInviteRequest};
pub use referral::{Referral, ReferralStatus, ReferralStats};
pub use subscription::{Subscription, SubscriptionStatus};
pub use payment::{Payment, PaymentProvider, PaymentStatus, NewPayment, ReconcileOutcome};
pub use promo::{PromoCode, PromoType, PromoUsage, Discount, CreatePromoRequest};
pub use ticket::{SupportTicket, TicketMessage, TicketCategory, TicketPriority, TicketStatus, CreateTicketRequest};
pub use plan::Plan;
