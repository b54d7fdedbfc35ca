/// Telegram Menfess Bot - Main entry point.
///
/// Users send anonymous posts to the bot in a private chat, tagged `#pria`
/// or `#wanita`. Admitted posts are relayed to a channel and logged to a
/// separate log chat, subject to per-user daily quotas. In groups the bot
/// deletes links from non-admins, bans the sender for an hour and welcomes
/// new members once.
///
/// Runs with long polling by default, or behind a webhook when
/// `WEBHOOK_DOMAIN` is set.
mod bot;
mod config;
mod error;
mod menfess;
mod tracker;

use bot::{
    handle_command, handle_group_link, handle_new_members, handle_post, handle_unknown, BotState,
    Command, Route,
};
use config::Config;
use error::Result;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Me, Update};
use teloxide::update_listeners::{webhooks, Polling};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set up the command menu that appears in Telegram.
async fn set_bot_commands(bot: &Bot) -> Result<()> {
    bot.set_my_commands(Command::bot_commands()).await?;
    info!("Bot commands menu set successfully");
    Ok(())
}

/// Warn early if the bot cannot see the target or log chat. Posts are
/// still attempted later; failures fall back to the owner.
async fn validate_channels(bot: &Bot, config: &Config) {
    let chats: [(&str, ChatId); 2] = [
        ("CHANNEL_ID", config.target_chat_id),
        ("LOG_CHANNEL_ID", config.log_chat_id),
    ];
    for (name, chat_id) in chats {
        match bot.get_chat(chat_id).await {
            Ok(_) => info!("{} ({}) reachable", name, chat_id),
            Err(e) => warn!("{} ({}) not reachable at startup: {}", name, chat_id, e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "menfess_bot=info,teloxide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Telegram Menfess Bot...");

    // Load .env file if present (for development)
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or error loading it: {}", e);
    }

    // Load configuration from environment variables
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");
    info!(
        "Daily limits: {} text, {} media, {} downloads per user",
        config.limits.text, config.limits.media, config.limits.download
    );
    info!(
        "Quota reset every {} hours",
        config.reset_interval.as_secs() / 3600
    );

    let bot = Bot::new(&config.bot_token);

    set_bot_commands(&bot).await?;
    validate_channels(&bot, &config).await;

    let webhook = config.webhook.clone();
    let state = BotState::new(config);
    let reset_task = state.spawn_daily_reset();

    let message_handler = Update::filter_message()
        .filter_map(|msg: Message, me: Me| bot::route(&msg, me.username()))
        .branch(dptree::case![Route::GroupLink].endpoint(handle_group_link))
        .branch(dptree::case![Route::Command(cmd)].endpoint(handle_command))
        .branch(dptree::case![Route::NewMembers].endpoint(handle_new_members))
        .branch(dptree::case![Route::Post(kind)].endpoint(handle_post))
        .branch(dptree::case![Route::PrivateOther].endpoint(handle_unknown));

    let handler = dptree::entry().branch(message_handler);

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    let error_handler = LoggingErrorHandler::with_custom_text("An error from the update listener");

    match webhook {
        Some(webhook) => {
            let url = webhook.url()?;
            info!("Registering webhook {} on {}", url, webhook.address());
            let listener =
                webhooks::axum(bot, webhooks::Options::new(webhook.address(), url)).await?;
            dispatcher
                .dispatch_with_listener(listener, error_handler)
                .await;
        }
        None => {
            info!("Bot initialized, starting long polling...");
            let listener = Polling::builder(bot).drop_pending_updates().build();
            dispatcher
                .dispatch_with_listener(listener, error_handler)
                .await;
        }
    }

    reset_task.abort();
    info!("Bot stopped");

    Ok(())
}
