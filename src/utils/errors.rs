//! Error handling for the Hiddify bot
//!
//! This module defines the main error types used throughout the application
//! and the classification that decides how a failure is reported to users.

use thiserror::Error;

/// Main error type for the Hiddify bot
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("VPN panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("User not found: {telegram_id}")]
    UserNotFound { telegram_id: i64 },

    #[error("{entity} has expired")]
    Expired { entity: &'static str },

    #[error("{entity} has no uses left")]
    Exhausted { entity: &'static str },

    #[error("Promo code already used by this user")]
    AlreadyUsed,

    #[error("User {referred_id} already has a referrer")]
    AlreadyReferred { referred_id: i64 },

    #[error("Trial already used by user {telegram_id}")]
    TrialAlreadyUsed { telegram_id: i64 },

    #[error("Users cannot refer themselves")]
    SelfReferral,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("User {telegram_id} is blocked")]
    UserBlocked { telegram_id: i64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown payment {provider}:{provider_payment_id}")]
    UnknownPayment { provider: String, provider_payment_id: String },

    #[error("VPN panel unavailable: {0}")]
    PanelUnavailable(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// VPN panel specific errors
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Panel authentication failed")]
    Unauthorized,

    #[error("Panel API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Panel request timed out")]
    Timeout,

    #[error("Panel connection failed: {0}")]
    Connection(String),

    #[error("Invalid panel response: {0}")]
    InvalidResponse(String),
}

impl PanelError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PanelError::Timeout | PanelError::Connection(_) => true,
            PanelError::Api { status, .. } => *status >= 500 || *status == 429,
            PanelError::Unauthorized | PanelError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PanelError::Timeout
        } else if err.is_decode() {
            PanelError::InvalidResponse(err.to_string())
        } else {
            PanelError::Connection(err.to_string())
        }
    }
}

/// Result type alias for bot operations
pub type Result<T> = std::result::Result<T, BotError>;

/// Result type alias for VPN panel operations
pub type PanelResult<T> = std::result::Result<T, PanelError>;

/// How a failure should be treated by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The effect already happened; report success-like
    AlreadyDone,
    /// The request itself is invalid; report and do not retry
    CallerError,
    /// A collaborator failed; safe to retry later
    Transient,
    /// Stored state disagrees with the event; alert an operator
    Inconsistency,
    /// Infrastructure failure
    Fatal,
}

impl BotError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        BotError::NotFound { entity, key: key.to_string() }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::AlreadyUsed
            | BotError::AlreadyReferred { .. }
            | BotError::TrialAlreadyUsed { .. } => ErrorKind::AlreadyDone,
            BotError::NotFound { .. }
            | BotError::UserNotFound { .. }
            | BotError::Expired { .. }
            | BotError::Exhausted { .. }
            | BotError::SelfReferral
            | BotError::Validation(_)
            | BotError::PermissionDenied(_)
            | BotError::UserBlocked { .. }
            | BotError::InvalidStateTransition { .. } => ErrorKind::CallerError,
            BotError::PanelUnavailable(_)
            | BotError::ProviderUnavailable(_)
            | BotError::Telegram(_)
            | BotError::Redis(_)
            | BotError::Http(_) => ErrorKind::Transient,
            BotError::Panel(e) if e.is_transient() => ErrorKind::Transient,
            BotError::UnknownPayment { .. } => ErrorKind::Inconsistency,
            _ => ErrorKind::Fatal,
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BotError::Database(_) => ErrorSeverity::Critical,
            BotError::Migration(_) => ErrorSeverity::Critical,
            BotError::Config(_) => ErrorSeverity::Critical,
            BotError::UnknownPayment { .. } => ErrorSeverity::Warning,
            BotError::PermissionDenied(_) => ErrorSeverity::Warning,
            BotError::UserBlocked { .. } => ErrorSeverity::Warning,
            _ => match self.kind() {
                ErrorKind::AlreadyDone | ErrorKind::CallerError => ErrorSeverity::Info,
                ErrorKind::Transient => ErrorSeverity::Warning,
                _ => ErrorSeverity::Error,
            },
        }
    }

    /// Short reply for the user who triggered the failing operation
    pub fn user_message(&self) -> String {
        match self {
            BotError::NotFound { entity, .. } => format!("{} not found.", entity),
            BotError::UserNotFound { .. } => "Please send /start first.".to_string(),
            BotError::Expired { entity } => format!("This {} has expired.", entity.to_lowercase()),
            BotError::Exhausted { entity } => format!("This {} has no uses left.", entity.to_lowercase()),
            BotError::AlreadyUsed => "You have already used this promo code.".to_string(),
            BotError::AlreadyReferred { .. } => "You already have a referrer.".to_string(),
            BotError::TrialAlreadyUsed { .. } => "You have already used your free trial.".to_string(),
            BotError::SelfReferral => "You cannot invite yourself.".to_string(),
            BotError::Validation(msg) => msg.clone(),
            BotError::PermissionDenied(_) => "You are not allowed to do that.".to_string(),
            BotError::UserBlocked { .. } => "Your account is blocked.".to_string(),
            BotError::InvalidStateTransition { .. } => "That is not possible right now.".to_string(),
            _ => match self.kind() {
                ErrorKind::Transient => "Service is temporarily unavailable, please try again later.".to_string(),
                _ => "Something went wrong. Support has been notified.".to_string(),
            },
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_done_kinds() {
        assert_eq!(BotError::AlreadyUsed.kind(), ErrorKind::AlreadyDone);
        assert_eq!(BotError::AlreadyReferred { referred_id: 1 }.kind(), ErrorKind::AlreadyDone);
        assert_eq!(BotError::TrialAlreadyUsed { telegram_id: 1 }.kind(), ErrorKind::AlreadyDone);
    }

    #[test]
    fn test_transient_errors_are_recoverable() {
        assert!(BotError::PanelUnavailable("down".into()).is_recoverable());
        assert!(BotError::Panel(PanelError::Timeout).is_recoverable());
        assert!(!BotError::Panel(PanelError::Unauthorized).is_recoverable());
        assert!(!BotError::SelfReferral.is_recoverable());
    }

    #[test]
    fn test_unknown_payment_is_inconsistency() {
        let err = BotError::UnknownPayment {
            provider: "cryptobot".into(),
            provider_payment_id: "x".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Inconsistency);
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_panel_error_transience() {
        assert!(PanelError::Api { status: 502, message: String::new() }.is_transient());
        assert!(PanelError::Api { status: 429, message: String::new() }.is_transient());
        assert!(!PanelError::Api { status: 400, message: String::new() }.is_transient());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            BotError::Exhausted { entity: "Invite" }.user_message(),
            "This invite has no uses left."
        );
        assert!(BotError::PanelUnavailable("x".into()).user_message().contains("try again later"));
    }
}
