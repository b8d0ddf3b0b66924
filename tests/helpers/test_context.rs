//! Test context for unified test setup
//!
//! Wires a real `ServiceFactory` onto the test database with the cache
//! disabled and the in-memory panel and sink.

use std::sync::Arc;
use hiddify_bot::config::Settings;
use hiddify_bot::database::DatabaseService;
use hiddify_bot::services::{CacheService, OutcomeSink, ServiceFactory, VpnPanel};

use super::database_helper::TestDatabase;
use super::fakes::{FakePanel, RecordingSink};

pub const ADMIN_ID: i64 = 555_666_777;

/// Test configuration options
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub admin_ids: Vec<i64>,
    pub cryptobot_api_url: Option<String>,
    pub max_open_tickets: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            admin_ids: vec![ADMIN_ID],
            cryptobot_api_url: None,
            max_open_tickets: 3,
        }
    }
}

/// Unified test context that manages all test components
pub struct TestContext {
    pub database: TestDatabase,
    pub services: ServiceFactory,
    pub panel: Arc<FakePanel>,
    pub sink: Arc<RecordingSink>,
    pub settings: Settings,
}

impl TestContext {
    /// Create a context with default settings
    ///
    /// Panics without Docker or `TEST_DATABASE_URL`; store tests never pass vacuously.
    pub async fn start() -> Self {
        Self::start_with_config(TestConfig::default()).await
    }

    pub async fn start_with_config(config: TestConfig) -> Self {
        let database = TestDatabase::new()
            .await
            .expect("test database: set TEST_DATABASE_URL or make Docker available");
        let settings = Self::create_test_settings(&database, &config);

        let panel = Arc::new(FakePanel::new());
        let sink = Arc::new(RecordingSink::new());
        let services = ServiceFactory::new(
            &settings,
            DatabaseService::new(database.pool.clone()),
            CacheService::disabled(&settings.redis),
            panel.clone() as Arc<dyn VpnPanel>,
            sink.clone() as Arc<dyn OutcomeSink>,
        )
        .expect("Failed to build services");

        Self { database, services, panel, sink, settings }
    }

    /// Create test-specific settings
    fn create_test_settings(database: &TestDatabase, config: &TestConfig) -> Settings {
        let mut settings = Settings::default();

        settings.bot.token = "12345:test_token".to_string();
        settings.bot.admin_ids = config.admin_ids.clone();

        settings.database.url = database.database_url.clone();
        settings.database.max_connections = 5;

        settings.redis.enabled = false;
        settings.redis.prefix = "test_hiddify_bot:".to_string();

        settings.panel.max_retries = 2;
        settings.panel.retry_base_delay_ms = 1;

        settings.payments.telegram_stars_enabled = true;
        settings.payments.yoomoney_token = Some("410011111111111".to_string());
        if let Some(url) = &config.cryptobot_api_url {
            settings.payments.cryptobot_token = Some("test-crypto-token".to_string());
            settings.payments.cryptobot_api_url = Some(url.clone());
        }

        settings.support.max_open_tickets = config.max_open_tickets;
        settings.logging.level = "debug".to_string();

        settings
    }

    /// Direct store access for assertions
    pub fn db(&self) -> DatabaseService {
        DatabaseService::new(self.database.pool.clone())
    }
}
