use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serenity::all::{GuildId, UserId};
use tokio::time::Instant;

use super::{MAX_USER_COOLDOWN_SECONDS, RATE_WINDOW};

const PRUNE_THRESHOLD: usize = 1024;

/// Per-user cooldown plus a per-guild sliding window over successful
/// creations. Each map has its own lock and neither is held across an await.
pub struct AbuseGuard {
    max_per_minute: usize,
    cooldowns: Mutex<HashMap<(GuildId, UserId), Instant>>,
    windows: Mutex<HashMap<GuildId, VecDeque<Instant>>>,
}

impl AbuseGuard {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            cooldowns: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_per_minute(&self) -> usize {
        self.max_per_minute
    }

    /// Records a creation for the user unless the previous one is younger
    /// than `cooldown`.
    pub fn try_consume_user_slot(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        cooldown: Duration,
    ) -> bool {
        let now = Instant::now();
        let mut cooldowns = self.cooldowns.lock();

        if !cooldown.is_zero() {
            if let Some(last) = cooldowns.get(&(guild_id, user_id)) {
                if now.duration_since(*last) < cooldown {
                    return false;
                }
            }
        }

        if cooldowns.len() >= PRUNE_THRESHOLD {
            let horizon = Duration::from_secs(u64::from(MAX_USER_COOLDOWN_SECONDS));
            cooldowns.retain(|_, last| now.duration_since(*last) < horizon);
        }

        cooldowns.insert((guild_id, user_id), now);
        true
    }

    pub fn try_consume_guild_slot(&self, guild_id: GuildId) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, window| {
                purge_expired(window, now);
                !window.is_empty()
            });
        }

        let window = windows.entry(guild_id).or_default();
        purge_expired(window, now);

        if window.len() >= self.max_per_minute {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Drops all state for a guild the bot no longer belongs to.
    pub fn forget_guild(&self, guild_id: GuildId) {
        self.cooldowns.lock().retain(|(guild, _), _| *guild != guild_id);
        self.windows.lock().remove(&guild_id);
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.cooldowns.lock().len()
    }

    #[cfg(test)]
    fn tracked_guilds(&self) -> usize {
        self.windows.lock().len()
    }
}

fn purge_expired(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= RATE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serenity::all::{GuildId, UserId};

    use super::AbuseGuard;

    const GUILD: GuildId = GuildId::new(100);
    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    #[tokio::test(start_paused = true)]
    async fn cooldown_rejects_until_exactly_elapsed() {
        let guard = AbuseGuard::new(5);
        let cooldown = Duration::from_secs(10);

        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        assert!(guard.try_consume_user_slot(GUILD, BOB, cooldown));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_attempt_does_not_extend_cooldown() {
        let guard = AbuseGuard::new(5);
        let cooldown = Duration::from_secs(10);

        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cooldown_always_succeeds() {
        let guard = AbuseGuard::new(5);

        for _ in 0..3 {
            assert!(guard.try_consume_user_slot(GUILD, ALICE, Duration::ZERO));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_are_scoped_per_guild() {
        let guard = AbuseGuard::new(5);
        let cooldown = Duration::from_secs(10);

        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        assert!(guard.try_consume_user_slot(GuildId::new(200), ALICE, cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn guild_window_caps_creations_per_minute() {
        let guard = AbuseGuard::new(5);

        for _ in 0..5 {
            assert!(guard.try_consume_guild_slot(GUILD));
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        assert!(!guard.try_consume_guild_slot(GUILD));
        assert!(guard.try_consume_guild_slot(GuildId::new(200)));

        // The first slot was taken 25s ago; it leaves the window at 60s.
        tokio::time::advance(Duration::from_secs(34)).await;
        assert!(!guard.try_consume_guild_slot(GUILD));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(guard.try_consume_guild_slot(GUILD));
        assert!(!guard.try_consume_guild_slot(GUILD));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_guild_windows_are_dropped() {
        let guard = AbuseGuard::new(5);

        for guild in 1..=1024 {
            assert!(guard.try_consume_guild_slot(GuildId::new(guild)));
        }
        assert_eq!(guard.tracked_guilds(), 1024);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(guard.try_consume_guild_slot(GUILD));

        assert_eq!(guard.tracked_guilds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_guild_windows_survive_pruning() {
        let guard = AbuseGuard::new(1);

        for guild in 1..=1024 {
            assert!(guard.try_consume_guild_slot(GuildId::new(guild)));
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(!guard.try_consume_guild_slot(GuildId::new(1)));
        assert_eq!(guard.tracked_guilds(), 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_guild_clears_both_trackers() {
        let guard = AbuseGuard::new(1);
        let cooldown = Duration::from_secs(60);

        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        assert!(guard.try_consume_guild_slot(GUILD));
        guard.forget_guild(GUILD);

        assert_eq!(guard.tracked_users(), 0);
        assert!(guard.try_consume_user_slot(GUILD, ALICE, cooldown));
        assert!(guard.try_consume_guild_slot(GUILD));
    }
}
