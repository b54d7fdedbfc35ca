/// Configuration management for the menfess bot.
use crate::error::{BotError, Result};
use crate::tracker::QuotaLimits;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use teloxide::types::{ChatId, UserId};
use url::Url;

/// Webhook settings; present only when the bot runs behind a public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Public domain Telegram posts updates to (from WEBHOOK_DOMAIN).
    pub domain: String,
    /// Path of the update endpoint (from WEBHOOK_PATH).
    pub path: String,
    /// Local port the HTTP server listens on (from PORT).
    pub port: u16,
}

impl WebhookConfig {
    /// The URL registered with Telegram.
    pub fn url(&self) -> Result<Url> {
        let domain = self
            .domain
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        Ok(Url::parse(&format!("https://{}/{}", domain, path))?)
    }

    pub fn address(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.port).into()
    }
}

/// Main application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (from BOT_TOKEN).
    pub bot_token: String,
    /// Chat that receives relayed posts (from CHANNEL_ID).
    pub target_chat_id: ChatId,
    /// Chat that receives audit lines (from LOG_CHANNEL_ID).
    pub log_chat_id: ChatId,
    /// The only user allowed to run admin commands (from OWNER_ID).
    pub owner_id: UserId,
    /// Daily per-user limits.
    pub limits: QuotaLimits,
    /// How often quotas are cleared.
    pub reset_interval: Duration,
    /// Webhook mode when set, long polling otherwise.
    pub webhook: Option<WebhookConfig>,
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| BotError::Config(format!("{} must be a number, got '{}'", key, value))),
        _ => Ok(default),
    }
}

fn parse_required<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<T> {
    let value = lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| BotError::Config(format!("{} environment variable is required", key)))?;
    value
        .trim()
        .parse::<T>()
        .map_err(|_| BotError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_chat_id(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<ChatId> {
    let id: i64 = parse_required(lookup, key)?;
    if id == 0 {
        return Err(BotError::Config(format!(
            "{} must not be 0 (channels look like -100...)",
            key
        )));
    }
    Ok(ChatId(id))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `BOT_TOKEN`: The bot token from BotFather.
    /// - `CHANNEL_ID`: Chat that menfess posts are relayed to.
    /// - `LOG_CHANNEL_ID`: Chat that receives the audit log.
    /// - `OWNER_ID`: Numeric id of the bot owner.
    ///
    /// Optional environment variables:
    /// - `LIMIT_MENFESS_TEXT`: Text posts per user per day (default: 5).
    /// - `LIMIT_MENFESS_MEDIA`: Photo/video posts per user per day (default: 10).
    /// - `LIMIT_DOWNLOAD`: Downloads per user per day (default: 2).
    /// - `RESET_INTERVAL_HOURS`: Hours between quota resets (default: 24).
    /// - `WEBHOOK_DOMAIN`: Public domain; enables webhook mode.
    /// - `WEBHOOK_PATH`: Webhook path (default: `/`).
    /// - `PORT`: Webhook listen port (default: 8080).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Required: bot token
        let bot_token = lookup("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(BotError::Config(
                "BOT_TOKEN environment variable is required. \
                 Get your token from @BotFather on Telegram."
                    .to_string(),
            ));
        }

        let target_chat_id = parse_chat_id(&lookup, "CHANNEL_ID")?;
        let log_chat_id = parse_chat_id(&lookup, "LOG_CHANNEL_ID")?;
        let owner_id = UserId(parse_required(&lookup, "OWNER_ID")?);

        let defaults = QuotaLimits::default();
        let limits = QuotaLimits {
            text: parse_optional(&lookup, "LIMIT_MENFESS_TEXT", defaults.text)?,
            media: parse_optional(&lookup, "LIMIT_MENFESS_MEDIA", defaults.media)?,
            download: parse_optional(&lookup, "LIMIT_DOWNLOAD", defaults.download)?,
        };

        let reset_hours: u64 = parse_optional(&lookup, "RESET_INTERVAL_HOURS", 24)?;
        if reset_hours == 0 {
            return Err(BotError::Config(
                "RESET_INTERVAL_HOURS must be greater than 0".to_string(),
            ));
        }

        let webhook = match lookup("WEBHOOK_DOMAIN").filter(|d| !d.trim().is_empty()) {
            Some(domain) => Some(WebhookConfig {
                domain: domain.trim().to_string(),
                path: lookup("WEBHOOK_PATH").unwrap_or_else(|| "/".to_string()),
                port: parse_optional(&lookup, "PORT", 8080)?,
            }),
            None => None,
        };

        Ok(Config {
            bot_token,
            target_chat_id,
            log_chat_id,
            owner_id,
            limits,
            reset_interval: Duration::from_secs(reset_hours * 3600),
            webhook,
        })
    }
}
