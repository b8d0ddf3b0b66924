//! Application settings management
//!
//! This module defines the configuration structure and provides methods
//! for loading settings from TOML files and environment variables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub bot: BotConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub panel: PanelConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default = "default_plans")]
    pub plans: Vec<PlanConfig>,
    #[serde(default)]
    pub trial: TrialConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub support: SupportConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Telegram bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub admin_ids: Vec<i64>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,
    pub prefix: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub profile_ttl_seconds: u64,
    pub subscription_ttl_seconds: u64,
    pub catalog_ttl_seconds: u64,
}

/// Hiddify panel API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    pub api_url: String,
    pub api_token: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub protocols: Vec<String>,
}

/// Payment provider credentials
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentsConfig {
    pub cryptobot_token: Option<String>,
    pub cryptobot_api_url: Option<String>,
    pub telegram_stars_enabled: bool,
    pub yoomoney_token: Option<String>,
    pub stripe_secret_key: Option<String>,
}

/// A purchasable plan
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanConfig {
    pub code: String,
    pub name: String,
    pub duration_days: u32,
    pub data_limit_gb: u64,
    pub price_usd: Decimal,
    pub price_stars: u32,
}

/// Trial configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrialConfig {
    pub days: u32,
    pub data_limit_gb: u64,
}

/// Referral program configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReferralConfig {
    pub bonus_amount: Decimal,
}

/// Support desk configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupportConfig {
    pub max_open_tickets: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: String,
    #[serde(default)]
    pub json: bool,
}

/// Feature flags configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeaturesConfig {
    pub promo_codes: bool,
    pub referral_system: bool,
    pub trial: bool,
    pub invites: bool,
}

fn default_true() -> bool {
    true
}

fn default_plans() -> Vec<PlanConfig> {
    vec![
        PlanConfig {
            code: "weekly".to_string(),
            name: "Week".to_string(),
            duration_days: 7,
            data_limit_gb: 10,
            price_usd: Decimal::new(300, 2),
            price_stars: 200,
        },
        PlanConfig {
            code: "monthly".to_string(),
            name: "Month".to_string(),
            duration_days: 30,
            data_limit_gb: 50,
            price_usd: Decimal::new(1000, 2),
            price_stars: 700,
        },
        PlanConfig {
            code: "quarterly".to_string(),
            name: "Quarter".to_string(),
            duration_days: 90,
            data_limit_gb: 200,
            price_usd: Decimal::new(2500, 2),
            price_stars: 1700,
        },
    ]
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self { days: 7, data_limit_gb: 10 }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self { bonus_amount: Decimal::new(100, 2) }
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self { max_open_tickets: 3 }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            promo_codes: true,
            referral_system: true,
            trial: true,
            invites: true,
        }
    }
}

impl Settings {
    /// Load settings from configuration file and environment variables
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::load(config::File::with_name("config").required(false))
    }

    /// Load settings from an explicit TOML file, still overridable from the environment
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, config::ConfigError> {
        Self::load(config::File::from(path.as_ref()).required(true))
    }

    fn load<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("HIDDIFY_BOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bot.admin_ids")
                    .with_list_parse_key("panel.protocols"),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), crate::utils::errors::BotError> {
        super::validation::validate_settings(self)
    }

    /// Look up a plan by its code
    pub fn plan(&self, code: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.code == code)
    }

    pub fn is_config_admin(&self, telegram_id: i64) -> bool {
        self.bot.admin_ids.contains(&telegram_id)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                token: String::new(),
                username: "hiddify_vpn_bot".to_string(),
                admin_ids: vec![],
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/hiddify_bot".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                prefix: "hiddify_bot:".to_string(),
                enabled: true,
                profile_ttl_seconds: 300,
                subscription_ttl_seconds: 60,
                catalog_ttl_seconds: 600,
            },
            panel: PanelConfig {
                api_url: "http://localhost:8080/api/v2/admin".to_string(),
                api_token: String::new(),
                timeout_seconds: 30,
                max_retries: 3,
                retry_base_delay_ms: 500,
                protocols: vec![
                    "vless_reality".to_string(),
                    "hysteria2".to_string(),
                    "shadowsocks2022".to_string(),
                ],
            },
            payments: PaymentsConfig::default(),
            plans: default_plans(),
            trial: TrialConfig::default(),
            referral: ReferralConfig::default(),
            support: SupportConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: "logs".to_string(),
                json: false,
            },
            features: FeaturesConfig::default(),
        }
    }
}
