//! # Nudge — Scheduled Check-ins over Telegram
//!
//! Prompts users with their own questions inside their own daily windows,
//! correlates replies back to the question that prompted them, and lets the
//! administrator broadcast to everyone.
//!
//! Usage:
//!   nudge                          # Run the bot with ~/.nudge/config.toml
//!   nudge --config ./nudge.toml    # Custom config path
//!   nudge --init-config            # Write a default config and exit
//!   nudge --sweep                  # One maintenance sweep and exit

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use nudge_core::NudgeConfig;
use nudge_engine::{
    BroadcastManager, Dispatcher, InboundRouter, RateLimiter, Scheduler, SettingsService,
};
use nudge_store::NudgeDb;
use nudge_telegram::{TelegramApi, TelegramPoller};

#[derive(Parser)]
#[command(name = "nudge", version, about = "📬 Nudge — scheduled check-ins over Telegram")]
struct Cli {
    /// Config path (default: ~/.nudge/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Run one maintenance sweep against the store and exit
    #[arg(long)]
    sweep: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "nudge=debug,nudge_engine=debug,nudge_store=debug,nudge_telegram=debug"
    } else {
        "nudge=info,nudge_engine=info,nudge_store=info,nudge_telegram=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if cli.init_config {
        let config = NudgeConfig::default();
        config.save()?;
        println!("✅ Wrote default config to {}", NudgeConfig::default_path().display());
        println!("   Set telegram.bot_token and telegram.admin_chat_id before running.");
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => NudgeConfig::load_from(std::path::Path::new(path))?,
        None => NudgeConfig::load()?,
    };

    let db_path = config.store.resolved_path();
    let db = Arc::new(NudgeDb::open(&db_path)?);

    if cli.sweep {
        let removed = db.sweep_notifications(Utc::now())?;
        println!("🧹 Swept {removed} expired correlation record(s)");
        return Ok(());
    }

    if config.telegram.bot_token.is_empty() {
        anyhow::bail!(
            "No bot token configured. Set telegram.bot_token in {}",
            NudgeConfig::default_path().display()
        );
    }
    if config.telegram.admin_chat_id == 0 {
        tracing::warn!("⚠️ telegram.admin_chat_id is unset; /broadcast will be rejected for everyone");
    }

    let api = TelegramApi::new(&config.telegram.bot_token);
    let me = api.get_me().await?;
    println!("📬 Nudge v{}", env!("CARGO_PKG_VERSION"));
    println!("   🤖 Bot:      @{}", me.username.as_deref().unwrap_or(&me.first_name));
    println!("   🗄️  Database: {}", db_path.display());
    println!("   ⏰ Tick:     every {}s", config.scheduler.tick_secs);
    println!();

    let settings = Arc::new(SettingsService::new(
        db.clone(),
        config.cache.max_entries,
        config.cache.default_ttl_secs,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(api.clone()),
        db.clone(),
        config.broadcast.send_timeout_secs,
        config.correlation.ttl_days,
    ));
    let limiter = Arc::new(RateLimiter::new());
    let broadcast = Arc::new(BroadcastManager::new(
        db.clone(),
        dispatcher.clone(),
        &config.broadcast,
    ));
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        settings.clone(),
        dispatcher.clone(),
        config.broadcast.fetch_page_size,
    ));
    let router = InboundRouter::new(
        db.clone(),
        limiter.clone(),
        dispatcher,
        broadcast,
        config.telegram.admin_chat_id,
    );

    nudge_engine::spawn_scheduler(scheduler, config.scheduler.tick_secs);
    nudge_engine::spawn_maintenance(db, settings, limiter, config.scheduler.sweep_secs);

    let poller = TelegramPoller::new(api, config.telegram.poll_interval_secs);
    let mut inbound = poller.start_polling();
    while let Some(message) = inbound.next().await {
        if let Err(e) = router.handle(&message).await {
            tracing::error!("Failed to handle message from {}: {e}", message.user_id);
        }
    }

    Ok(())
}
