/// Per-user daily quotas, temporary bans and the one-time welcome set.
///
/// Every method that depends on the clock has an `_at` twin taking the
/// current time explicitly, so the time-based behaviour can be tested
/// without sleeping.
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use teloxide::types::UserId;

/// Longest ban the tracker will record. Telegram treats anything longer
/// than 366 days as permanent.
const MAX_BAN_HOURS: i64 = 366 * 24;

/// Daily limits per user, compared against but never stored per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub text: u32,
    pub media: u32,
    pub download: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            text: 5,
            media: 10,
            download: 2,
        }
    }
}

/// Kind of a relayed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Text,
    Media,
}

/// Classification tag carried by every menfess post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Pria,
    Wanita,
}

impl Gender {
    pub fn tag(self) -> &'static str {
        match self {
            Gender::Pria => "#pria",
            Gender::Wanita => "#wanita",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Pria => f.write_str("Pria"),
            Gender::Wanita => f.write_str("Wanita"),
        }
    }
}

/// A counter a user can run out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCategory {
    Text,
    Media,
    Download,
}

impl From<PostKind> for QuotaCategory {
    fn from(kind: PostKind) -> Self {
        match kind {
            PostKind::Text => QuotaCategory::Text,
            PostKind::Media => QuotaCategory::Media,
        }
    }
}

impl fmt::Display for QuotaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuotaCategory::Text => "teks",
            QuotaCategory::Media => "foto/video",
            QuotaCategory::Download => "download",
        };
        f.write_str(name)
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The action was counted; `remaining` more are allowed before reset.
    Admitted { remaining: u32 },
    QuotaExceeded,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct UserQuota {
    text_count: u32,
    media_count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct DownloadQuota {
    count: u32,
}

#[derive(Debug, Clone, Copy)]
struct BanRecord {
    expires_at: DateTime<Utc>,
}

/// Bumps `counter` unless it already sits at `limit`.
fn admit(counter: &mut u32, limit: u32) -> Admission {
    if *counter >= limit {
        return Admission::QuotaExceeded;
    }
    *counter += 1;
    Admission::Admitted {
        remaining: limit - *counter,
    }
}

/// Sole owner of the quota, ban and welcome state.
#[derive(Debug)]
pub struct QuotaTracker {
    limits: QuotaLimits,
    reset_period: Duration,
    last_reset: DateTime<Utc>,
    posts: HashMap<UserId, UserQuota>,
    downloads: HashMap<UserId, DownloadQuota>,
    bans: HashMap<UserId, BanRecord>,
    welcomed: HashSet<UserId>,
    genders: HashMap<UserId, Gender>,
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits, reset_period: Duration) -> Self {
        Self::new_at(limits, reset_period, Utc::now())
    }

    pub fn new_at(limits: QuotaLimits, reset_period: Duration, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            reset_period,
            last_reset: now,
            posts: HashMap::new(),
            downloads: HashMap::new(),
            bans: HashMap::new(),
            welcomed: HashSet::new(),
            genders: HashMap::new(),
        }
    }

    pub fn is_banned(&self, user: UserId) -> bool {
        self.is_banned_at(user, Utc::now())
    }

    /// A user is banned while their record's expiry is strictly in the future.
    pub fn is_banned_at(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.bans
            .get(&user)
            .map_or(false, |record| record.expires_at > now)
    }

    /// Time left on an active ban, if any.
    pub fn ban_remaining_at(&self, user: UserId, now: DateTime<Utc>) -> Option<Duration> {
        self.bans
            .get(&user)
            .filter(|record| record.expires_at > now)
            .map(|record| record.expires_at - now)
    }

    pub fn try_register_post(&mut self, user: UserId, kind: PostKind) -> Admission {
        let quota = self.posts.entry(user).or_default();
        match kind {
            PostKind::Text => admit(&mut quota.text_count, self.limits.text),
            PostKind::Media => admit(&mut quota.media_count, self.limits.media),
        }
    }

    /// Gives back a post slot taken by `try_register_post`, e.g. when the
    /// relay failed. Never goes below zero.
    pub fn refund_post(&mut self, user: UserId, kind: PostKind) {
        if let Some(quota) = self.posts.get_mut(&user) {
            let counter = match kind {
                PostKind::Text => &mut quota.text_count,
                PostKind::Media => &mut quota.media_count,
            };
            *counter = counter.saturating_sub(1);
        }
    }

    /// Locks a user to the first gender they post with. Returns the
    /// recorded gender as the error when a later post disagrees.
    pub fn record_gender(&mut self, user: UserId, gender: Gender) -> Result<(), Gender> {
        let recorded = *self.genders.entry(user).or_insert(gender);
        if recorded == gender {
            Ok(())
        } else {
            Err(recorded)
        }
    }

    pub fn try_register_download(&mut self, user: UserId) -> Admission {
        let quota = self.downloads.entry(user).or_default();
        admit(&mut quota.count, self.limits.download)
    }

    pub fn ban(&mut self, user: UserId, hours: Option<i64>) -> DateTime<Utc> {
        self.ban_at(user, hours, Utc::now())
    }

    /// Records a ban lasting `hours` (one hour when absent or non-positive),
    /// replacing any earlier ban of the same user. Returns the expiry.
    pub fn ban_at(&mut self, user: UserId, hours: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
        let hours = match hours {
            Some(h) if h > 0 => h.min(MAX_BAN_HOURS),
            _ => 1,
        };
        let expires_at = now + Duration::hours(hours);
        self.bans.insert(user, BanRecord { expires_at });
        expires_at
    }

    /// Drops the user's ban record. Returns whether one existed.
    pub fn unban(&mut self, user: UserId) -> bool {
        self.bans.remove(&user).is_some()
    }

    /// Returns true the first time a user is seen, false ever after.
    pub fn mark_welcomed_if_new(&mut self, user: UserId) -> bool {
        self.welcomed.insert(user)
    }

    pub fn reset_daily(&mut self) {
        self.reset_daily_at(Utc::now());
    }

    /// Clears every post and download counter. Bans, recorded genders and
    /// the welcomed set are left alone.
    pub fn reset_daily_at(&mut self, now: DateTime<Utc>) {
        self.posts.clear();
        self.downloads.clear();
        self.last_reset = now;
    }

    /// Time until the next scheduled reset, never negative.
    pub fn time_until_reset_at(&self, now: DateTime<Utc>) -> Duration {
        let next = self.last_reset + self.reset_period;
        (next - now).max(Duration::zero())
    }

    /// Removes ban records that have already expired. Returns how many went.
    pub fn purge_expired_bans_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.bans.len();
        self.bans.retain(|_, record| record.expires_at > now);
        before - self.bans.len()
    }
}
