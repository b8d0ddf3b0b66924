//! Idempotency keys and in-process request coalescing
//!
//! Correctness of every at-most-once effect comes from the store's unique
//! constraints and conditional updates. The locks here only collapse
//! near-simultaneous duplicates (double taps, webhook retries) arriving at one
//! process so that external side effects are not attempted twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use crate::models::payment::PaymentProvider;

/// Natural key of an operation that must take effect at most once
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdempotencyKey {
    Invite { code: String, telegram_id: i64 },
    Payment { provider: PaymentProvider, provider_payment_id: String },
    Promo { promo_code_id: i64, user_id: i64 },
    Referral { referred_id: i64 },
    Trial { telegram_id: i64 },
    /// Checkout creation for a user
    Checkout { telegram_id: i64 },
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdempotencyKey::Invite { code, telegram_id } => write!(f, "invite:{}:{}", code, telegram_id),
            IdempotencyKey::Payment { provider, provider_payment_id } => {
                write!(f, "payment:{}:{}", provider, provider_payment_id)
            }
            IdempotencyKey::Promo { promo_code_id, user_id } => write!(f, "promo:{}:{}", promo_code_id, user_id),
            IdempotencyKey::Referral { referred_id } => write!(f, "referral:{}", referred_id),
            IdempotencyKey::Trial { telegram_id } => write!(f, "trial:{}", telegram_id),
            IdempotencyKey::Checkout { telegram_id } => write!(f, "checkout:{}", telegram_id),
        }
    }
}

type SlotMap = HashMap<IdempotencyKey, Weak<tokio::sync::Mutex<()>>>;

/// Per-key async mutexes; entries disappear once no caller holds them
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Mutex<SlotMap>>,
}

/// Held while an operation for a key is in flight
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller in this process holds `key`
    pub async fn acquire(&self, key: IdempotencyKey) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.retain(|_, weak| weak.strong_count() > 0);
            match slots.get(&key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(tokio::sync::Mutex::new(()));
                    slots.insert(key.clone(), Arc::downgrade(&slot));
                    slot
                }
            }
        };

        debug!(key = %key, "Acquiring idempotency lock");
        KeyGuard { _guard: slot.lock_owned().await }
    }

    /// Number of keys with a live holder or waiter
    pub fn in_flight(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

impl fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks").field("in_flight", &self.in_flight()).finish()
    }
}
