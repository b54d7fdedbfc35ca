/// Telegram handlers: menfess relay, group moderation and admin commands.
use crate::config::Config;
use crate::menfess::{
    self, format_log_entry, post_kind, sanitize_text, AdminAction,
    AdminOutcome, MAX_TEXT_CHARS,
};
use crate::tracker::{PostKind, QuotaTracker};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMember, InputFile, ParseMode, User, UserId};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Telegram bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Menfess Bot Commands:")]
pub enum Command {
    #[command(description = "Start the bot and see how to post")]
    Start,
    #[command(description = "Show help and usage information")]
    Help,
    #[command(description = "Fetch a file by URL: /download <url>")]
    Download(String),
    #[command(description = "Owner only: /ban <userId> [hours]")]
    Ban(String),
    #[command(description = "Owner only: /unban <userId>")]
    Unban(String),
    #[command(description = "Owner only: /kick <userId>")]
    Kick(String),
}

/// Where an incoming message is handled.
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    GroupLink,
    Command(Command),
    NewMembers,
    Post(PostKind),
    PrivateOther,
}

/// Picks the handler for a message, or `None` when the bot ignores it.
///
/// Links in groups are moderated before anything else, commands included.
pub fn route(msg: &Message, bot_username: &str) -> Option<Route> {
    let private = msg.chat.is_private();

    if !private && menfess::message_has_link(msg) {
        return Some(Route::GroupLink);
    }
    if let Some(cmd) = msg
        .text()
        .and_then(|text| Command::parse(text, bot_username).ok())
    {
        return Some(Route::Command(cmd));
    }
    if msg.new_chat_members().is_some() {
        return Some(Route::NewMembers);
    }
    if private {
        return Some(post_kind(msg).map_or(Route::PrivateOther, Route::Post));
    }
    None
}

/// Shared bot state including configuration and the quota tracker.
#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub tracker: Arc<Mutex<QuotaTracker>>,
}

impl BotState {
    pub fn new(config: Config) -> Self {
        let reset_period = ChronoDuration::from_std(config.reset_interval)
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        let tracker = QuotaTracker::new(config.limits, reset_period);
        Self {
            config: Arc::new(config),
            tracker: Arc::new(Mutex::new(tracker)),
        }
    }

    /// Clears the quotas every reset interval and drops expired bans.
    ///
    /// The first tick fires one full interval after start.
    pub fn spawn_daily_reset(&self) -> JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let period = self.config.reset_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let mut tracker = tracker.lock().await;
                tracker.reset_daily();
                let purged = tracker.purge_expired_bans_at(Utc::now());
                info!("Daily quotas reset, {} expired bans purged", purged);
            }
        })
    }
}

fn help_text(state: &BotState) -> String {
    let limits = state.config.limits;
    format!(
        "📚 Fitur Bot\n\n\
        • Menfess via private chat: kirim teks/foto/video dengan tag #pria atau #wanita\n\
        • Limit per hari: {} teks, {} foto/video, {} download\n\
        • /download <url> - ambil file dari URL\n\
        • Moderasi grup: link otomatis dihapus dan pengirim diblokir 1 jam\n\
        • Owner: /ban <userId> [jam], /unban <userId>, /kick <userId>",
        limits.text, limits.media, limits.download
    )
}

/// Main command dispatcher.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: BotState,
) -> ResponseResult<()> {
    match cmd {
        Command::Start | Command::Help => {
            bot.send_message(msg.chat.id, help_text(&state)).await?;
            Ok(())
        }
        Command::Download(args) => handle_download(bot, msg, state, args).await,
        Command::Ban(args) => handle_admin(bot, msg, state, AdminAction::Ban, args).await,
        Command::Unban(args) => handle_admin(bot, msg, state, AdminAction::Unban, args).await,
        Command::Kick(args) => handle_admin(bot, msg, state, AdminAction::Kick, args).await,
    }
}

/// Handler for private text/photo/video posts.
pub async fn handle_post(
    bot: Bot,
    msg: Message,
    kind: PostKind,
    state: BotState,
) -> ResponseResult<()> {
    let Some(user) = msg.from().cloned() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let text = msg.text().or_else(|| msg.caption());
    let decision = {
        let mut tracker = state.tracker.lock().await;
        menfess::admit_post(
            &mut tracker,
            state.config.owner_id,
            user.id,
            text,
            kind,
            Utc::now(),
        )
    };

    let gender = match decision {
        Ok(gender) => gender,
        Err(rejection) => {
            info!("Rejected post from {}: {:?}", user.id, rejection);
            bot.send_message(msg.chat.id, rejection.to_string()).await?;
            return Ok(());
        }
    };

    if let Err(e) = relay_post(&bot, &msg, kind, &state).await {
        warn!("Failed to relay post from {}: {}", user.id, e);
        // The post never went out, so it does not count
        if user.id != state.config.owner_id {
            state.tracker.lock().await.refund_post(user.id, kind);
        }
        notify_owner_of_failed_relay(&bot, &state, &user, kind, text).await;
        bot.send_message(
            msg.chat.id,
            "⚠️ Posting ke channel gagal; admin telah diberitahu.",
        )
        .await?;
        return Ok(());
    }

    let content = match kind {
        PostKind::Text => text,
        PostKind::Media => None,
    };
    let entry = format_log_entry(
        &user.full_name(),
        user.username.as_deref(),
        user.id,
        gender,
        content,
    );
    send_log(&bot, &msg, kind, &state, entry).await;

    info!("Relayed {:?} post from {} ({})", kind, user.id, gender);
    bot.send_message(msg.chat.id, "✅ Post berhasil dikirim.").await?;

    Ok(())
}

async fn relay_post(
    bot: &Bot,
    msg: &Message,
    kind: PostKind,
    state: &BotState,
) -> ResponseResult<()> {
    let target = state.config.target_chat_id;
    match kind {
        PostKind::Text => {
            let text = sanitize_text(msg.text().unwrap_or_default(), MAX_TEXT_CHARS);
            bot.send_message(target, text)
                .disable_web_page_preview(true)
                .await?;
        }
        PostKind::Media => {
            bot.copy_message(target, msg.chat.id, msg.id).await?;
        }
    }
    Ok(())
}

/// Writes the audit line to the log chat, or to the owner when the log
/// chat is unreachable. Failures here never reach the user.
async fn send_log(bot: &Bot, msg: &Message, kind: PostKind, state: &BotState, entry: String) {
    let log_chat = state.config.log_chat_id;

    let result = async {
        if kind == PostKind::Media {
            bot.copy_message(log_chat, msg.chat.id, msg.id).await?;
        }
        bot.send_message(log_chat, entry.clone())
            .parse_mode(ParseMode::Html)
            .await?;
        Ok::<(), teloxide::RequestError>(())
    }
    .await;

    if let Err(e) = result {
        warn!("Failed to write to log chat {}: {}", log_chat, e);
        let fallback = bot
            .send_message(
                ChatId::from(state.config.owner_id),
                format!("[LOG] Bot could not reach LOG_CHANNEL_ID. User post:\n\n{}", entry),
            )
            .parse_mode(ParseMode::Html)
            .await;
        if let Err(e) = fallback {
            warn!("Failed to send log fallback to owner: {}", e);
        }
    }
}

async fn notify_owner_of_failed_relay(
    bot: &Bot,
    state: &BotState,
    user: &User,
    kind: PostKind,
    text: Option<&str>,
) {
    let content = match (kind, text) {
        (PostKind::Text, Some(text)) => sanitize_text(text, MAX_TEXT_CHARS),
        _ => "(media attached)".to_string(),
    };
    let username = user
        .username
        .as_deref()
        .map(|u| format!("@{}", u))
        .unwrap_or_else(|| "(no username)".to_string());

    let notice = format!(
        "[FALLBACK] Failed to post to CHANNEL_ID ({}).\nUser: {} (id: {})\n\nContent:\n{}",
        state.config.target_chat_id, username, user.id, content
    );
    if let Err(e) = bot
        .send_message(ChatId::from(state.config.owner_id), notice)
        .disable_web_page_preview(true)
        .await
    {
        warn!("Failed to notify owner about failed post: {}", e);
    }
}

/// Handler for `/download <url>` in private chats.
pub async fn handle_download(
    bot: Bot,
    msg: Message,
    state: BotState,
    args: String,
) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };

    let url = match menfess::parse_download_url(&args) {
        Ok(url) => url,
        Err(e) => {
            bot.send_message(
                msg.chat.id,
                format!("❌ {}\n\nUsage: /download <url>", e),
            )
            .await?;
            return Ok(());
        }
    };

    let decision = {
        let mut tracker = state.tracker.lock().await;
        menfess::admit_download(&mut tracker, state.config.owner_id, user.id, Utc::now())
    };
    if let Err(rejection) = decision {
        info!("Rejected download from {}: {:?}", user.id, rejection);
        bot.send_message(msg.chat.id, rejection.to_string()).await?;
        return Ok(());
    }

    info!("Download requested by {}: {}", user.id, url);
    if let Err(e) = bot.send_document(msg.chat.id, InputFile::url(url)).await {
        warn!("Download for {} failed: {}", user.id, e);
        bot.send_message(msg.chat.id, "❌ Gagal mengunduh file.").await?;
    }

    Ok(())
}

/// Handler for owner-only `/ban`, `/unban` and `/kick`.
pub async fn handle_admin(
    bot: Bot,
    msg: Message,
    state: BotState,
    action: AdminAction,
    args: String,
) -> ResponseResult<()> {
    let Some(sender) = msg.from() else {
        return Ok(());
    };

    let outcome = {
        let mut tracker = state.tracker.lock().await;
        menfess::run_admin_command(
            &mut tracker,
            state.config.owner_id,
            sender.id,
            action,
            &args,
            Utc::now(),
        )
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(rejection) => {
            debug!("Ignoring {:?} from {}: {:?}", action, sender.id, rejection);
            return Ok(());
        }
    };

    // Groups also get the ban applied on the platform side
    if !msg.chat.is_private() {
        let chat = msg.chat.id;
        let platform = match &outcome {
            AdminOutcome::Banned { user, until } => bot
                .ban_chat_member(chat, *user)
                .until_date(*until)
                .await
                .map(|_| ()),
            AdminOutcome::Unbanned { user, .. } => bot
                .unban_chat_member(chat, *user)
                .only_if_banned(true)
                .await
                .map(|_| ()),
            AdminOutcome::Kick { user } => kick(&bot, chat, *user).await,
            AdminOutcome::Usage { .. } => Ok(()),
        };
        if let Err(e) = platform {
            warn!("{:?} in chat {} failed: {}", action, chat, e);
            bot.send_message(chat, format!("❌ Gagal: {}", e)).await?;
            return Ok(());
        }
    } else if let AdminOutcome::Kick { .. } = outcome {
        bot.send_message(msg.chat.id, "ℹ️ /kick hanya bisa dipakai di grup.")
            .await?;
        return Ok(());
    }

    info!("Admin command applied: {}", outcome);
    bot.send_message(msg.chat.id, outcome.to_string()).await?;

    Ok(())
}

/// A kick is a ban lifted right away, so the user may rejoin.
async fn kick(bot: &Bot, chat: ChatId, user: UserId) -> ResponseResult<()> {
    bot.ban_chat_member(chat, user).await?;
    bot.unban_chat_member(chat, user).await?;
    Ok(())
}

/// Handler for messages with links in groups.
pub async fn handle_group_link(bot: Bot, msg: Message, state: BotState) -> ResponseResult<()> {
    let Some(user) = msg.from().cloned() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    // Admins may post links
    match bot.get_chat_member(msg.chat.id, user.id).await {
        Ok(ChatMember { kind, .. }) if kind.is_privileged() => {
            debug!("Skipping link from admin {} in {}", user.id, msg.chat.id);
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => warn!("Could not look up {} in {}: {}", user.id, msg.chat.id, e),
    }

    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        warn!("Failed to delete link message in {}: {}", msg.chat.id, e);
    }

    let until = state.tracker.lock().await.ban(user.id, Some(1));

    match bot
        .ban_chat_member(msg.chat.id, user.id)
        .until_date(until)
        .await
    {
        Ok(_) => {
            info!("Banned {} in {} for posting a link", user.id, msg.chat.id);
            bot.send_message(
                msg.chat.id,
                format!(
                    "🚫 {} diblokir 1 jam\nAlasan: Mengirim link",
                    html::escape(&user.first_name)
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => warn!("Ban of {} in {} failed: {}", user.id, msg.chat.id, e),
    }

    Ok(())
}

/// Handler for new-chat-member notifications.
pub async fn handle_new_members(bot: Bot, msg: Message, state: BotState) -> ResponseResult<()> {
    let Some(members) = msg.new_chat_members() else {
        return Ok(());
    };

    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        warn!("Failed to delete join message in {}: {}", msg.chat.id, e);
    }

    for member in members.iter().filter(|m| !m.is_bot) {
        let first_time = state.tracker.lock().await.mark_welcomed_if_new(member.id);
        if !first_time {
            continue;
        }

        let welcome = bot
            .send_message(
                msg.chat.id,
                format!("👋 Selamat datang {}!", html::escape(&member.first_name)),
            )
            .parse_mode(ParseMode::Html)
            .await;
        if let Err(e) = welcome {
            warn!("Failed to welcome {} in {}: {}", member.id, msg.chat.id, e);
        }
    }

    Ok(())
}

/// Handler for anything else sent in a private chat.
pub async fn handle_unknown(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(
        msg.chat.id,
        "❓ Kirim teks, foto, atau video dengan tag #pria atau #wanita. Ketik /help untuk bantuan.",
    )
    .await?;
    Ok(())
}
