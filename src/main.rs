//! Hiddify VPN bot
//!
//! Main application entry point

use std::sync::Arc;
use teloxide::{prelude::*, types::Update};
use teloxide::dispatching::UpdateHandler;
use teloxide::types::PreCheckoutQuery;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use hiddify_bot::{
    config::Settings,
    utils::logging,
    database::{DatabaseService, DatabaseConfig, create_pool, run_migrations},
    handlers::{handle_command, handle_pre_checkout, handle_successful_payment, Command},
    middleware::AccessGuard,
    services::{CacheService, HiddifyPanel, OutcomeSink, ServiceFactory, TelegramNotifier, VpnPanel},
};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    settings.validate()?;

    // Initialize logging; the guard flushes the log file on shutdown
    let _log_guard = logging::init_logging(&settings.logging)?;

    info!("Starting {}...", hiddify_bot::info());

    info!("Connecting to database...");
    let db_pool = create_pool(&DatabaseConfig::from(&settings.database)).await?;
    run_migrations(&db_pool).await?;
    let database_service = DatabaseService::new(db_pool);

    info!("Connecting to Redis...");
    let cache = CacheService::connect(&settings.redis).await;

    let bot = Bot::new(&settings.bot.token);
    let panel: Arc<dyn VpnPanel> = Arc::new(HiddifyPanel::new(&settings.panel)?);
    let sink: Arc<dyn OutcomeSink> = Arc::new(TelegramNotifier::new(bot.clone(), settings.bot.admin_ids.clone()));

    info!("Initializing services...");
    let services = ServiceFactory::new(&settings, database_service, cache, panel, sink)?;

    let health = services.health_check().await;
    for issue in health.get_issues() {
        warn!(issue = %issue, "Startup health check");
    }
    if !health.is_healthy() {
        return Err("database is not reachable".into());
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    let guard = AccessGuard::new(services.user_service.clone());
    let services = Arc::new(services);

    let mut dispatcher = Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![services, guard])
        .default_handler(|upd| async move {
            tracing::debug!(update_id = ?upd.id, "Unhandled update");
        })
        .enable_ctrlc_handler()
        .build();

    info!("Bot is ready, polling for updates");
    dispatcher.dispatch().await;

    info!("Bot has been shut down.");
    Ok(())
}

/// Create the main update handler
fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    dptree::entry()
        .branch(Update::filter_pre_checkout_query().endpoint(on_pre_checkout))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::filter(|msg: Message| msg.successful_payment().is_some())
                        .endpoint(on_successful_payment),
                )
                .branch(dptree::entry().filter_command::<Command>().endpoint(on_command)),
        )
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    services: Arc<ServiceFactory>,
    guard: AccessGuard,
) -> HandlerResult {
    handle_command(bot, msg, cmd, services, guard).await?;
    Ok(())
}

async fn on_pre_checkout(bot: Bot, query: PreCheckoutQuery, services: Arc<ServiceFactory>) -> HandlerResult {
    handle_pre_checkout(bot, query, services).await?;
    Ok(())
}

async fn on_successful_payment(bot: Bot, msg: Message, services: Arc<ServiceFactory>) -> HandlerResult {
    handle_successful_payment(bot, msg, services).await?;
    Ok(())
}
