/// Admission decisions for menfess posts, downloads and admin commands.
///
/// Nothing in here talks to Telegram: each function takes the tracker plus
/// the facts of one inbound event and returns what the handler should do.
use crate::error::{BotError, Rejection, Result};
use crate::tracker::{Admission, Gender, PostKind, QuotaCategory, QuotaTracker};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use teloxide::types::{Message, MessageEntity, MessageEntityKind, UserId};
use teloxide::utils::html;
use url::Url;

/// Telegram's message text limit.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Room left for the post body once the log header is in place.
const MAX_LOG_BODY_CHARS: usize = 3584;

/// Substrings treated as a link in group chats.
const LINK_MARKERS: &[&str] = &["http://", "https://", "www.", "t.me/", "telegram.me/"];

/// Finds the first classification tag in a post, ignoring case.
pub fn classify(text: &str) -> Option<Gender> {
    let lower = text.to_lowercase();
    [Gender::Pria, Gender::Wanita]
        .into_iter()
        .find(|gender| lower.contains(gender.tag()))
}

/// A duration rendered the way users read it ("2 jam 5 menit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.0.num_seconds().max(0);
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        if hours > 0 {
            write!(f, "{} jam {} menit", hours, minutes)
        } else if minutes > 0 {
            write!(f, "{} menit", minutes)
        } else {
            f.write_str("beberapa detik")
        }
    }
}

/// Strips NUL bytes and caps the text at `limit` characters.
pub fn sanitize_text(text: &str, limit: usize) -> String {
    text.chars().filter(|&c| c != '\0').take(limit).collect()
}

/// Like [`sanitize_text`], but ends a cut text with "…".
pub fn truncate_marked(text: &str, limit: usize) -> String {
    let clean = sanitize_text(text, limit.saturating_add(1));
    if clean.chars().count() <= limit {
        return clean;
    }
    let mut cut: String = clean.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Whether the message is a relayable post, and which kind.
pub fn post_kind(msg: &Message) -> Option<PostKind> {
    if msg.photo().is_some() || msg.video().is_some() {
        Some(PostKind::Media)
    } else if msg.text().is_some() {
        Some(PostKind::Text)
    } else {
        None
    }
}

pub fn contains_link(text: &str) -> bool {
    let lower = text.to_lowercase();
    LINK_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn has_link_entity(entities: Option<&[MessageEntity]>) -> bool {
    entities.map_or(false, |entities| {
        entities.iter().any(|entity| {
            matches!(
                entity.kind,
                MessageEntityKind::Url | MessageEntityKind::TextLink { .. }
            )
        })
    })
}

/// Link check for group moderation: URL entities or a link-like substring
/// in the text or caption.
pub fn message_has_link(msg: &Message) -> bool {
    has_link_entity(msg.entities())
        || has_link_entity(msg.caption_entities())
        || msg.text().or_else(|| msg.caption()).map_or(false, contains_link)
}

fn quota_rejection(tracker: &QuotaTracker, category: QuotaCategory, now: DateTime<Utc>) -> Rejection {
    Rejection::QuotaExceeded {
        category,
        resets_in: HumanDuration(tracker.time_until_reset_at(now)),
    }
}

fn check_not_banned(tracker: &QuotaTracker, user: UserId, now: DateTime<Utc>) -> std::result::Result<(), Rejection> {
    match tracker.ban_remaining_at(user, now) {
        Some(remaining) => Err(Rejection::Banned {
            remaining: HumanDuration(remaining),
        }),
        None => Ok(()),
    }
}

/// Decides whether a private post goes out.
///
/// Untagged posts are turned away before the tracker is touched. A user
/// stays with the gender of their first post. The owner is never held to
/// a quota.
pub fn admit_post(
    tracker: &mut QuotaTracker,
    owner: UserId,
    user: UserId,
    text: Option<&str>,
    kind: PostKind,
    now: DateTime<Utc>,
) -> std::result::Result<Gender, Rejection> {
    let gender = text
        .and_then(classify)
        .ok_or(Rejection::MissingClassificationTag)?;

    check_not_banned(tracker, user, now)?;

    tracker
        .record_gender(user, gender)
        .map_err(|recorded| Rejection::GenderMismatch { recorded })?;

    if user == owner {
        return Ok(gender);
    }

    if tracker.try_register_post(user, kind).is_admitted() {
        Ok(gender)
    } else {
        Err(quota_rejection(tracker, kind.into(), now))
    }
}

/// Decides whether a `/download` request goes out.
pub fn admit_download(
    tracker: &mut QuotaTracker,
    owner: UserId,
    user: UserId,
    now: DateTime<Utc>,
) -> std::result::Result<(), Rejection> {
    check_not_banned(tracker, user, now)?;

    if user == owner {
        return Ok(());
    }

    match tracker.try_register_download(user) {
        Admission::Admitted { .. } => Ok(()),
        Admission::QuotaExceeded => Err(quota_rejection(tracker, QuotaCategory::Download, now)),
    }
}

/// Parses the argument of `/download`. Only http(s) URLs are accepted.
pub fn parse_download_url(args: &str) -> Result<Url> {
    let url = Url::parse(args.trim())
        .map_err(|e| BotError::InvalidArgument(format!("'{}' is not a URL: {}", args.trim(), e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BotError::InvalidArgument(format!(
            "Unsupported URL scheme: {}",
            other
        ))),
    }
}

/// Builds the audit line sent to the log chat. `content` is `None` for
/// media posts, which are logged with the `MEDIA` marker.
pub fn format_log_entry(
    display_name: &str,
    username: Option<&str>,
    user: UserId,
    gender: Gender,
    content: Option<&str>,
) -> String {
    let username = match username {
        Some(name) => format!("@{}", name),
        None => "(no username)".to_string(),
    };
    let body = match content {
        Some(text) => html::escape(&truncate_marked(text, MAX_LOG_BODY_CHARS)),
        None => "MEDIA".to_string(),
    };

    format!(
        "👤 {} {}\n🔗 {} {}\n🆔 {} {}\n⚧ {} #{}\n\n{}",
        html::bold("Nama:"),
        html::escape(display_name),
        html::bold("Username:"),
        html::escape(&username),
        html::bold("User ID:"),
        html::code_inline(&user.to_string()),
        html::bold("Gender:"),
        gender,
        body
    )
}

/// Owner-only moderation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Ban,
    Unban,
    Kick,
}

impl AdminAction {
    fn usage(self) -> &'static str {
        match self {
            AdminAction::Ban => "Usage: /ban <userId> [hours]",
            AdminAction::Unban => "Usage: /unban <userId>",
            AdminAction::Kick => "Usage: /kick <userId>",
        }
    }
}

/// A parsed, not yet applied, admin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Ban { user: UserId, hours: Option<i64> },
    Unban { user: UserId },
    Kick { user: UserId },
}

impl AdminCommand {
    /// Parses `<userId> [hours]`. Extra words after the expected arguments
    /// are ignored.
    pub fn parse(action: AdminAction, args: &str) -> Result<Self> {
        let mut parts = args.split_whitespace();

        let user = parts
            .next()
            .ok_or_else(|| BotError::InvalidArgument("Missing user id".to_string()))?;
        let user = user.parse::<u64>().map(UserId).map_err(|_| {
            BotError::InvalidArgument(format!("Invalid user id: '{}'. Expected a number.", user))
        })?;

        match action {
            AdminAction::Ban => {
                let hours = parts
                    .next()
                    .map(|h| {
                        h.parse::<i64>().map_err(|_| {
                            BotError::InvalidArgument(format!(
                                "Invalid hours: '{}'. Expected a number.",
                                h
                            ))
                        })
                    })
                    .transpose()?;
                Ok(AdminCommand::Ban { user, hours })
            }
            AdminAction::Unban => Ok(AdminCommand::Unban { user }),
            AdminAction::Kick => Ok(AdminCommand::Kick { user }),
        }
    }
}

/// What an authorized admin command did to the tracker, and what the
/// handler still has to do on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminOutcome {
    Banned { user: UserId, until: DateTime<Utc> },
    Unbanned { user: UserId, was_banned: bool },
    Kick { user: UserId },
    /// Arguments did not parse; nothing changed.
    Usage { error: String, usage: &'static str },
}

impl fmt::Display for AdminOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminOutcome::Banned { user, until } => write!(
                f,
                "🚫 User {} diblokir sampai {}",
                user,
                until.format("%Y-%m-%d %H:%M UTC")
            ),
            AdminOutcome::Unbanned { user, was_banned: true } => {
                write!(f, "✅ User {} sudah di-unban", user)
            }
            AdminOutcome::Unbanned { user, was_banned: false } => {
                write!(f, "ℹ️ User {} tidak sedang diblokir", user)
            }
            AdminOutcome::Kick { user } => write!(f, "👢 User {} dikeluarkan", user),
            AdminOutcome::Usage { error, usage } => write!(f, "❌ {}\n{}", error, usage),
        }
    }
}

/// Authorizes and applies an admin command to the tracker.
///
/// Anyone but the owner gets `Rejection::Unauthorized` before the
/// arguments are even looked at.
pub fn run_admin_command(
    tracker: &mut QuotaTracker,
    owner: UserId,
    sender: UserId,
    action: AdminAction,
    args: &str,
    now: DateTime<Utc>,
) -> std::result::Result<AdminOutcome, Rejection> {
    if sender != owner {
        return Err(Rejection::Unauthorized);
    }

    let command = match AdminCommand::parse(action, args) {
        Ok(command) => command,
        Err(e) => {
            return Ok(AdminOutcome::Usage {
                error: e.to_string(),
                usage: action.usage(),
            })
        }
    };

    Ok(match command {
        AdminCommand::Ban { user, hours } => AdminOutcome::Banned {
            user,
            until: tracker.ban_at(user, hours, now),
        },
        AdminCommand::Unban { user } => AdminOutcome::Unbanned {
            user,
            was_banned: tracker.unban(user),
        },
        AdminCommand::Kick { user } => AdminOutcome::Kick { user },
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::{self, group_chat, message, private_chat};
    use super::*;
    use crate::tracker::QuotaLimits;
    use chrono::TimeZone;
    use serde_json::json;

    const OWNER: UserId = UserId(1000);

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn tracker() -> QuotaTracker {
        QuotaTracker::new_at(QuotaLimits::default(), Duration::hours(24), start())
    }

    #[test]
    fn test_classify_tags() {
        assert_eq!(classify("hello #pria"), Some(Gender::Pria));
        assert_eq!(classify("#WANITA cari teman"), Some(Gender::Wanita));
        assert_eq!(classify("#Pria dan #wanita"), Some(Gender::Pria));
        assert_eq!(classify("hello pria"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(HumanDuration(Duration::minutes(125)).to_string(), "2 jam 5 menit");
        assert_eq!(HumanDuration(Duration::minutes(7)).to_string(), "7 menit");
        assert_eq!(HumanDuration(Duration::seconds(30)).to_string(), "beberapa detik");
        assert_eq!(HumanDuration(Duration::seconds(-5)).to_string(), "beberapa detik");
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("a\0b\0c", 10), "abc");
        assert_eq!(sanitize_text("ééééé", 3), "ééé");
    }

    #[test]
    fn test_contains_link() {
        assert!(contains_link("cek https://example.com"));
        assert!(contains_link("join T.ME/somegroup"));
        assert!(contains_link("www.example.org"));
        assert!(!contains_link("no links here"));
    }

    #[test]
    fn test_five_posts_then_quota() {
        let mut tracker = tracker();
        let user = UserId(42);
        let now = start();

        for _ in 0..5 {
            let gender = admit_post(&mut tracker, OWNER, user, Some("hello #pria"), PostKind::Text, now);
            assert_eq!(gender, Ok(Gender::Pria));
        }

        match admit_post(&mut tracker, OWNER, user, Some("hello #pria"), PostKind::Text, now) {
            Err(Rejection::QuotaExceeded { category, resets_in }) => {
                assert_eq!(category, QuotaCategory::Text);
                assert_eq!(resets_in, HumanDuration(Duration::hours(24)));
            }
            other => panic!("expected quota rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_untagged_post_does_not_count() {
        let mut tracker = tracker();
        let user = UserId(43);
        let now = start();

        for _ in 0..10 {
            assert_eq!(
                admit_post(&mut tracker, OWNER, user, Some("hello"), PostKind::Text, now),
                Err(Rejection::MissingClassificationTag)
            );
        }
        assert_eq!(
            admit_post(&mut tracker, OWNER, user, None, PostKind::Media, now),
            Err(Rejection::MissingClassificationTag)
        );
        assert_eq!(
            tracker.try_register_post(user, PostKind::Text),
            Admission::Admitted { remaining: 4 }
        );
    }

    #[test]
    fn test_banned_user_is_rejected() {
        let mut tracker = tracker();
        let user = UserId(44);
        let now = start();
        tracker.ban_at(user, Some(1), now);

        let result = admit_post(&mut tracker, OWNER, user, Some("#wanita hi"), PostKind::Media, now);
        assert!(matches!(result, Err(Rejection::Banned { .. })));
        assert!(matches!(
            admit_download(&mut tracker, OWNER, user, now),
            Err(Rejection::Banned { .. })
        ));

        let later = now + Duration::hours(1);
        assert_eq!(
            admit_post(&mut tracker, OWNER, user, Some("#wanita hi"), PostKind::Media, later),
            Ok(Gender::Wanita)
        );
    }

    #[test]
    fn test_owner_has_no_quota() {
        let mut tracker = tracker();
        let now = start();

        for _ in 0..20 {
            assert!(admit_post(&mut tracker, OWNER, OWNER, Some("#pria"), PostKind::Text, now).is_ok());
            assert!(admit_download(&mut tracker, OWNER, OWNER, now).is_ok());
        }
    }

    #[test]
    fn test_download_quota() {
        let mut tracker = tracker();
        let user = UserId(45);
        let now = start();

        assert!(admit_download(&mut tracker, OWNER, user, now).is_ok());
        assert!(admit_download(&mut tracker, OWNER, user, now).is_ok());
        assert!(matches!(
            admit_download(&mut tracker, OWNER, user, now),
            Err(Rejection::QuotaExceeded {
                category: QuotaCategory::Download,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_download_url() {
        assert!(parse_download_url(" https://example.com/file.pdf ").is_ok());
        assert!(parse_download_url("ftp://example.com/file").is_err());
        assert!(parse_download_url("not a url").is_err());
        assert!(parse_download_url("").is_err());
    }

    #[test]
    fn test_log_entry_text() {
        let entry = format_log_entry("Budi <3", Some("budi"), UserId(7), Gender::Pria, Some("hello #pria"));
        assert!(entry.contains("Budi &lt;3"));
        assert!(entry.contains("@budi"));
        assert!(entry.contains("<code>7</code>"));
        assert!(entry.contains("#Pria"));
        assert!(entry.ends_with("hello #pria"));
    }

    #[test]
    fn test_log_entry_media_without_username() {
        let entry = format_log_entry("Sari", None, UserId(8), Gender::Wanita, None);
        assert!(entry.contains("(no username)"));
        assert!(entry.contains("#Wanita"));
        assert!(entry.ends_with("MEDIA"));
    }

    #[test]
    fn test_parse_admin_commands() {
        assert_eq!(
            AdminCommand::parse(AdminAction::Ban, "12345 2").unwrap(),
            AdminCommand::Ban {
                user: UserId(12345),
                hours: Some(2)
            }
        );
        assert_eq!(
            AdminCommand::parse(AdminAction::Ban, "12345").unwrap(),
            AdminCommand::Ban {
                user: UserId(12345),
                hours: None
            }
        );
        assert_eq!(
            AdminCommand::parse(AdminAction::Kick, " 9 ").unwrap(),
            AdminCommand::Kick { user: UserId(9) }
        );
        assert!(AdminCommand::parse(AdminAction::Unban, "").is_err());
        assert!(AdminCommand::parse(AdminAction::Unban, "@someone").is_err());
        assert!(AdminCommand::parse(AdminAction::Ban, "12 two").is_err());
    }

    #[test]
    fn test_owner_ban_command() {
        let mut tracker = tracker();
        let now = start();
        let target = UserId(12345);

        let outcome = run_admin_command(&mut tracker, OWNER, OWNER, AdminAction::Ban, "12345 2", now);
        assert_eq!(
            outcome,
            Ok(AdminOutcome::Banned {
                user: target,
                until: now + Duration::hours(2)
            })
        );
        assert!(tracker.is_banned_at(target, now + Duration::minutes(119)));
        assert!(!tracker.is_banned_at(target, now + Duration::hours(2)));
    }

    #[test]
    fn test_non_owner_command_is_ignored() {
        let mut tracker = tracker();
        let now = start();

        for action in [AdminAction::Ban, AdminAction::Unban, AdminAction::Kick] {
            assert_eq!(
                run_admin_command(&mut tracker, OWNER, UserId(5), action, "12345 2", now),
                Err(Rejection::Unauthorized)
            );
        }
        assert!(!tracker.is_banned_at(UserId(12345), now));
    }

    #[test]
    fn test_owner_unban_command() {
        let mut tracker = tracker();
        let now = start();
        tracker.ban_at(UserId(77), Some(10), now);

        let outcome = run_admin_command(&mut tracker, OWNER, OWNER, AdminAction::Unban, "77", now).unwrap();
        assert_eq!(
            outcome,
            AdminOutcome::Unbanned {
                user: UserId(77),
                was_banned: true
            }
        );
        assert!(!tracker.is_banned_at(UserId(77), now));
    }

    #[test]
    fn test_malformed_command_reports_usage() {
        let mut tracker = tracker();
        let outcome = run_admin_command(&mut tracker, OWNER, OWNER, AdminAction::Ban, "abc", start()).unwrap();
        match outcome {
            AdminOutcome::Usage { usage, .. } => assert_eq!(usage, "Usage: /ban <userId> [hours]"),
            other => panic!("expected usage, got {:?}", other),
        }
        let outcome = run_admin_command(&mut tracker, OWNER, OWNER, AdminAction::Kick, "", start()).unwrap();
        assert!(outcome.to_string().contains("/kick <userId>"));
    }

    #[test]
    fn test_text_link_entity_is_a_link() {
        // The URL only lives in the entity, not in the visible text
        let msg = message(
            group_chat(),
            json!({
                "text": "klik di sini",
                "entities": [{ "type": "text_link", "offset": 0, "length": 4, "url": "https://spam.example/" }]
            }),
        );
        assert!(!contains_link("klik di sini"));
        assert!(message_has_link(&msg));
    }

    #[test]
    fn test_caption_url_entity_is_a_link() {
        let msg = message(
            group_chat(),
            json!({
                "photo": fixtures::photo(),
                "caption": "cek example.com",
                "caption_entities": [{ "type": "url", "offset": 4, "length": 11 }]
            }),
        );
        assert!(!contains_link("cek example.com"));
        assert!(message_has_link(&msg));
    }

    #[test]
    fn test_plain_text_has_no_link() {
        let msg = message(group_chat(), json!({ "text": "halo semua, apa kabar?" }));
        assert!(!message_has_link(&msg));

        let msg = message(group_chat(), json!({ "text": "mampir ke www.example.com ya" }));
        assert!(message_has_link(&msg));
    }

    #[test]
    fn test_post_kind() {
        let text = message(private_chat(), json!({ "text": "hello #pria" }));
        assert_eq!(post_kind(&text), Some(PostKind::Text));

        let photo = message(
            private_chat(),
            json!({ "photo": fixtures::photo(), "caption": "#wanita" }),
        );
        assert_eq!(post_kind(&photo), Some(PostKind::Media));

        let sticker = message(private_chat(), json!({ "sticker": fixtures::sticker() }));
        assert_eq!(post_kind(&sticker), None);
    }

    #[test]
    fn test_gender_mismatch_is_rejected_without_counting() {
        let mut tracker = tracker();
        let user = UserId(46);
        let now = start();

        assert_eq!(
            admit_post(&mut tracker, OWNER, user, Some("#pria halo"), PostKind::Text, now),
            Ok(Gender::Pria)
        );
        for _ in 0..3 {
            assert_eq!(
                admit_post(&mut tracker, OWNER, user, Some("#wanita halo"), PostKind::Text, now),
                Err(Rejection::GenderMismatch {
                    recorded: Gender::Pria
                })
            );
        }

        // Only the first post used a slot
        assert_eq!(
            tracker.try_register_post(user, PostKind::Text),
            Admission::Admitted { remaining: 3 }
        );

        // Still locked after the daily reset
        tracker.reset_daily_at(now + Duration::hours(24));
        assert!(matches!(
            admit_post(&mut tracker, OWNER, user, Some("#wanita"), PostKind::Media, now + Duration::hours(25)),
            Err(Rejection::GenderMismatch { .. })
        ));
    }

    #[test]
    fn test_truncate_marked() {
        assert_eq!(truncate_marked("pendek", 10), "pendek");
        assert_eq!(truncate_marked("abcdef", 6), "abcdef");
        assert_eq!(truncate_marked("abcdefg", 6), "abcde…");
        assert_eq!(truncate_marked("a\0b", 5), "ab");
    }

    #[test]
    fn test_long_post_is_logged_with_marker() {
        let long = "x".repeat(MAX_TEXT_CHARS);
        let entry = format_log_entry("Budi", None, UserId(9), Gender::Pria, Some(&long));
        assert!(entry.ends_with('…'));
        assert!(entry.chars().count() < MAX_TEXT_CHARS);

        // Longer than a caption, short enough for the log: kept whole
        let medium = "y".repeat(2000);
        let entry = format_log_entry("Budi", None, UserId(9), Gender::Pria, Some(&medium));
        assert!(entry.ends_with(&medium));
    }
}
