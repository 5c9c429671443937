use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::TempChannelStore;
use crate::web::metrics::Metrics;

use super::index::LifecycleIndex;
use super::platform::VoicePlatform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    AlreadyGone,
    Occupied,
    Failed,
}

struct PendingDeletion {
    ticket: u64,
    guild_id: GuildId,
    handle: JoinHandle<()>,
}

/// One cancellable deletion timer per empty temp channel.
///
/// A timer must claim its entry (matching ticket, under the lock) after its
/// sleep before it may run the deletion body, so a timer that was cancelled
/// or superseded never deletes anything even if it already woke up.
pub struct DeletionScheduler {
    platform: Arc<dyn VoicePlatform>,
    records: Arc<dyn TempChannelStore>,
    index: Arc<LifecycleIndex>,
    pending: Mutex<HashMap<ChannelId, PendingDeletion>>,
    next_ticket: AtomicU64,
}

impl DeletionScheduler {
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        records: Arc<dyn TempChannelStore>,
        index: Arc<LifecycleIndex>,
    ) -> Self {
        Self {
            platform,
            records,
            index,
            pending: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Starts a deletion timer, replacing any timer already pending for the
    /// channel.
    pub fn schedule(self: &Arc<Self>, guild_id: GuildId, channel_id: ChannelId, delay: Duration) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::clone(self);

        let mut pending = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !scheduler.claim(channel_id, ticket) {
                return;
            }
            scheduler.delete_if_empty(guild_id, channel_id).await;
        });

        let previous = pending.insert(
            channel_id,
            PendingDeletion {
                ticket,
                guild_id,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(channel_id = %channel_id, "replaced pending deletion timer");
        }
        Metrics::set_pending_deletions(pending.len() as u64);

        info!(
            guild_id = %guild_id,
            channel_id = %channel_id,
            delay_seconds = delay.as_secs(),
            "scheduled temp channel deletion"
        );
    }

    /// Returns whether a timer was pending.
    pub fn cancel(&self, channel_id: ChannelId) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.remove(&channel_id) else {
            return false;
        };
        entry.handle.abort();
        Metrics::set_pending_deletions(pending.len() as u64);
        true
    }

    pub fn cancel_guild(&self, guild_id: GuildId) -> usize {
        let mut pending = self.pending.lock();
        let channels: Vec<ChannelId> = pending
            .iter()
            .filter(|(_, entry)| entry.guild_id == guild_id)
            .map(|(channel_id, _)| *channel_id)
            .collect();
        for channel_id in &channels {
            if let Some(entry) = pending.remove(channel_id) {
                entry.handle.abort();
            }
        }
        Metrics::set_pending_deletions(pending.len() as u64);
        channels.len()
    }

    pub fn is_pending(&self, channel_id: ChannelId) -> bool {
        self.pending.lock().contains_key(&channel_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Cancels every pending timer without running its body.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<PendingDeletion> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.handle.abort();
        }
        Metrics::set_pending_deletions(0);
        drained.len()
    }

    fn claim(&self, channel_id: ChannelId, ticket: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&channel_id) {
            Some(entry) if entry.ticket == ticket => {
                pending.remove(&channel_id);
                Metrics::set_pending_deletions(pending.len() as u64);
                true
            }
            _ => false,
        }
    }

    /// Timer body: re-checks occupancy and deletes the channel only if it is
    /// still empty.
    pub async fn delete_if_empty(&self, guild_id: GuildId, channel_id: ChannelId) -> DeletionOutcome {
        match self.platform.occupancy(guild_id, channel_id).await {
            Ok(None) => {
                warn!(channel_id = %channel_id, "temp channel vanished before scheduled deletion");
                let tracked = self.index.untrack(channel_id);
                self.finalize(channel_id, tracked.map(|tracked| tracked.created_at))
                    .await;
                DeletionOutcome::AlreadyGone
            }
            Ok(Some(occupants)) if occupants > 0 => {
                info!(
                    channel_id = %channel_id,
                    occupants,
                    "temp channel no longer empty, skipping deletion"
                );
                DeletionOutcome::Occupied
            }
            Ok(Some(_)) => {
                let outcome = self.delete_now(guild_id, channel_id).await;
                if outcome == DeletionOutcome::Deleted {
                    Metrics::channel_deleted_by_timer();
                }
                outcome
            }
            Err(err) => {
                error!(channel_id = %channel_id, "failed to read temp channel occupancy: {err}");
                DeletionOutcome::Failed
            }
        }
    }

    /// Deletes the channel on the platform, then closes its lifecycle record.
    /// On failure the channel stays tracked so a later event can retry.
    pub async fn delete_now(&self, guild_id: GuildId, channel_id: ChannelId) -> DeletionOutcome {
        let tracked = self.index.untrack(channel_id);

        match self.platform.delete_channel(channel_id).await {
            Ok(()) => {
                let lifetime = self
                    .finalize(channel_id, tracked.map(|tracked| tracked.created_at))
                    .await;
                info!(
                    guild_id = %guild_id,
                    channel_id = %channel_id,
                    lifetime_seconds = lifetime,
                    "deleted temp channel"
                );
                DeletionOutcome::Deleted
            }
            Err(err) => {
                error!(
                    guild_id = %guild_id,
                    channel_id = %channel_id,
                    "failed to delete temp channel: {err}"
                );
                if let Some(tracked) = tracked {
                    self.index.track(channel_id, tracked);
                }
                DeletionOutcome::Failed
            }
        }
    }

    /// Handles a channel removed by someone else. Returns `false` for
    /// channels this process does not track.
    pub async fn finalize_manual_deletion(&self, channel_id: ChannelId) -> bool {
        if self.cancel(channel_id) {
            debug!(channel_id = %channel_id, "cancelled deletion timer of manually deleted channel");
        }
        let Some(tracked) = self.index.untrack(channel_id) else {
            return false;
        };

        let lifetime = self.finalize(channel_id, Some(tracked.created_at)).await;
        Metrics::channel_deleted_manually();
        info!(
            guild_id = %tracked.guild_id,
            channel_id = %channel_id,
            lifetime_seconds = lifetime,
            "temp channel was deleted manually"
        );
        true
    }

    /// Closes the live record of a channel. When the creation time is not
    /// known locally it is read from the record. Returns the lifetime used.
    pub(crate) async fn finalize(
        &self,
        channel_id: ChannelId,
        created_at: Option<DateTime<Utc>>,
    ) -> i64 {
        let key = channel_id.to_string();
        let created_at = match created_at {
            Some(created_at) => Some(created_at),
            None => match self.records.get_live_channel(&key).await {
                Ok(record) => record.map(|record| record.created_at),
                Err(err) => {
                    error!(channel_id = %channel_id, "failed to load temp channel record: {err}");
                    None
                }
            },
        };

        let now = Utc::now();
        let lifetime = lifetime_seconds(created_at, now);
        match self.records.finalize_channel(&key, now, lifetime).await {
            Ok(true) => {}
            Ok(false) => debug!(channel_id = %channel_id, "temp channel record already finalized"),
            Err(err) => {
                error!(channel_id = %channel_id, "failed to finalize temp channel record: {err}")
            }
        }
        lifetime
    }
}

pub(crate) fn lifetime_seconds(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    created_at
        .map(|created_at| (now - created_at).num_seconds().max(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use serenity::all::{ChannelId, GuildId};

    use super::{DeletionOutcome, DeletionScheduler, lifetime_seconds};
    use crate::voice::index::{LifecycleIndex, TrackedChannel};
    use crate::voice::testing::{FakePlatform, MemoryTempChannelStore, temp_record};

    const GUILD: GuildId = GuildId::new(100);
    const CHANNEL: ChannelId = ChannelId::new(900);

    struct Harness {
        platform: Arc<FakePlatform>,
        records: Arc<MemoryTempChannelStore>,
        index: Arc<LifecycleIndex>,
        scheduler: Arc<DeletionScheduler>,
    }

    fn harness(age_seconds: i64) -> Harness {
        let platform = Arc::new(FakePlatform::new(GUILD));
        platform.add_voice_channel(CHANNEL, 0);
        let records = Arc::new(MemoryTempChannelStore::default());
        let created_at = Utc::now() - ChronoDuration::seconds(age_seconds);
        records.put(temp_record(GUILD, CHANNEL, created_at));
        let index = Arc::new(LifecycleIndex::new());
        index.track(
            CHANNEL,
            TrackedChannel {
                guild_id: GUILD,
                created_at,
            },
        );
        let scheduler = Arc::new(DeletionScheduler::new(
            platform.clone(),
            records.clone(),
            index.clone(),
        ));
        Harness {
            platform,
            records,
            index,
            scheduler,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_deletes_empty_channel_after_delay() {
        let h = harness(120);

        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(h.platform.deleted().is_empty());
        assert!(h.scheduler.is_pending(CHANNEL));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.platform.deleted(), vec![CHANNEL]);
        assert!(!h.index.contains(CHANNEL));
        assert!(!h.scheduler.is_pending(CHANNEL));

        let record = h.records.record(CHANNEL).expect("record kept");
        assert!(record.deleted_at.is_some());
        let lifetime = record.total_lifetime_seconds.expect("lifetime set");
        assert!((120..=125).contains(&lifetime), "lifetime was {lifetime}");
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let h = harness(0);

        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        tokio::time::sleep(Duration::from_secs(15)).await;
        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        assert_eq!(h.scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.platform.deleted().is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.platform.deleted(), vec![CHANNEL]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let h = harness(0);

        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        assert!(h.scheduler.cancel(CHANNEL));
        assert!(!h.scheduler.cancel(CHANNEL));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.platform.deleted().is_empty());
        assert!(h.index.contains(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn reoccupied_channel_is_left_alone() {
        let h = harness(0);

        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        h.platform.set_occupancy(CHANNEL, 2);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(h.platform.deleted().is_empty());
        assert!(h.index.contains(CHANNEL));
        assert!(h.records.record(CHANNEL).expect("record").deleted_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_channel_is_finalized_without_delete_call() {
        let h = harness(30);
        h.platform.remove_channel(CHANNEL);

        let outcome = h.scheduler.delete_if_empty(GUILD, CHANNEL).await;

        assert_eq!(outcome, DeletionOutcome::AlreadyGone);
        assert!(h.platform.deleted().is_empty());
        assert!(!h.index.contains(CHANNEL));
        assert!(h.records.record(CHANNEL).expect("record").deleted_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_keeps_channel_tracked() {
        let h = harness(0);
        h.platform.fail_deletes(true);

        let outcome = h.scheduler.delete_if_empty(GUILD, CHANNEL).await;

        assert_eq!(outcome, DeletionOutcome::Failed);
        assert!(h.index.contains(CHANNEL));
        assert!(h.records.record(CHANNEL).expect("record").deleted_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_deletion_cancels_timer_and_finalizes_once() {
        let h = harness(45);
        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(20));
        h.platform.remove_channel(CHANNEL);

        assert!(h.scheduler.finalize_manual_deletion(CHANNEL).await);
        assert!(!h.scheduler.finalize_manual_deletion(CHANNEL).await);
        assert!(!h.scheduler.is_pending(CHANNEL));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.platform.deleted().is_empty());

        let record = h.records.record(CHANNEL).expect("record");
        let lifetime = record.total_lifetime_seconds.expect("lifetime");
        assert!((45..=50).contains(&lifetime), "lifetime was {lifetime}");
        assert_eq!(h.records.finalize_calls(CHANNEL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_all_pending_timers() {
        let h = harness(0);
        let other = ChannelId::new(901);
        h.platform.add_voice_channel(other, 0);

        h.scheduler.schedule(GUILD, CHANNEL, Duration::from_secs(5));
        h.scheduler.schedule(GUILD, other, Duration::from_secs(5));
        assert_eq!(h.scheduler.shutdown(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.platform.deleted().is_empty());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn lifetime_is_never_negative() {
        let now = Utc::now();

        assert_eq!(lifetime_seconds(Some(now + ChronoDuration::seconds(5)), now), 0);
        assert_eq!(lifetime_seconds(Some(now - ChronoDuration::seconds(20)), now), 20);
        assert_eq!(lifetime_seconds(None, now), 0);
    }
}
