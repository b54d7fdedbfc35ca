/// Custom error types for the menfess bot.
use crate::menfess::HumanDuration;
use crate::tracker::{Gender, QuotaCategory};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration errors (missing or invalid environment variables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed command arguments (user ids, hours, URLs).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Telegram API errors.
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Webhook URL construction errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenient Result alias using our custom error type.
pub type Result<T> = std::result::Result<T, BotError>;

/// Reasons an inbound user action is turned away.
///
/// The `Display` text is what the user sees, except for `Unauthorized`,
/// which is never sent: admin commands from anyone else are ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("❌ Post ditolak.\nWajib pakai #pria atau #wanita")]
    MissingClassificationTag,

    #[error("😅 Kuota kirim {category} hari ini sudah habis.\n⏳ Reset dalam {resets_in}")]
    QuotaExceeded {
        category: QuotaCategory,
        resets_in: HumanDuration,
    },

    #[error("❌ Post ditolak.\nGender akun kamu sudah tercatat sebagai #{recorded}.")]
    GenderMismatch { recorded: Gender },

    #[error("🚫 Kamu sedang diblokir.\n⏳ Berakhir dalam {remaining}")]
    Banned { remaining: HumanDuration },

    #[error("unauthorized")]
    Unauthorized,
}
