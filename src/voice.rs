//! Join-to-Create: on-demand temporary voice channels.
//!
//! A member joining a guild's trigger channel gets a fresh voice channel
//! created and is moved into it. Once the channel empties, a deletion timer
//! removes it after the configured delay. Every channel's life is recorded
//! in the lifecycle store, which reconciliation trusts on startup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serenity::all::{ChannelId, GuildId, UserId};
use tracing::{debug, error, info, warn};

use crate::config::VoiceDefaultsConfig;
use crate::db::{GuildConfigStore, TempChannelStore};

pub mod abuse_guard;
pub mod admin;
pub mod config_store;
pub mod error;
pub mod index;
pub mod orchestrator;
pub mod platform;
pub mod reconcile;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use self::abuse_guard::AbuseGuard;
pub use self::admin::{JoinToCreateSettings, JoinToCreateStatus};
pub use self::config_store::{ConfigStore, GuildConfig};
pub use self::error::VoiceError;
pub use self::index::{LifecycleIndex, TrackedChannel};
pub use self::orchestrator::{ChannelOrchestrator, CreationOutcome};
pub use self::platform::{
    ChannelShape, CreateTempChannel, PlatformError, VoiceMember, VoicePlatform, VoiceStateChange,
};
pub use self::reconcile::{ReconciliationReport, ReconciliationService};
pub use self::scheduler::{DeletionOutcome, DeletionScheduler};

pub const MAX_DELETE_DELAY_SECONDS: u32 = 300;
pub const MAX_USER_COOLDOWN_SECONDS: u32 = 60;
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Entry point for everything the gateway and the admin surface ask of the
/// voice lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct VoiceCore {
    platform: Arc<dyn VoicePlatform>,
    records: Arc<dyn TempChannelStore>,
    configs: Arc<ConfigStore>,
    guard: Arc<AbuseGuard>,
    index: Arc<LifecycleIndex>,
    scheduler: Arc<DeletionScheduler>,
    orchestrator: Arc<ChannelOrchestrator>,
    reconciler: Arc<ReconciliationService>,
    default_delete_delay: Duration,
    reconcile_started: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
}

impl VoiceCore {
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        config_store: Arc<dyn GuildConfigStore>,
        records: Arc<dyn TempChannelStore>,
        defaults: &VoiceDefaultsConfig,
    ) -> Self {
        let configs = Arc::new(ConfigStore::new(
            config_store,
            Duration::from_secs(defaults.config_cache_ttl_seconds),
        ));
        let guard = Arc::new(AbuseGuard::new(defaults.max_creations_per_minute));
        let index = Arc::new(LifecycleIndex::new());
        let scheduler = Arc::new(DeletionScheduler::new(
            platform.clone(),
            records.clone(),
            index.clone(),
        ));
        let orchestrator = Arc::new(ChannelOrchestrator::new(
            platform.clone(),
            records.clone(),
            guard.clone(),
            index.clone(),
            scheduler.clone(),
        ));
        let reconciler = Arc::new(ReconciliationService::new(
            platform.clone(),
            records.clone(),
            index.clone(),
            scheduler.clone(),
        ));

        Self {
            platform,
            records,
            configs,
            guard,
            index,
            scheduler,
            orchestrator,
            reconciler,
            default_delete_delay: Duration::from_secs(u64::from(
                defaults.default_delete_delay_seconds,
            )),
            reconcile_started: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs reconciliation once per process. Events are accepted afterwards
    /// even when reconciliation failed, since the next restart repeats it.
    /// Leaves dropped while it ran are caught by re-reading the occupancy of
    /// every tracked channel without a pending timer.
    pub async fn reconcile(&self) -> Option<ReconciliationReport> {
        if self.reconcile_started.swap(true, Ordering::SeqCst) {
            debug!("reconciliation already ran");
            return None;
        }

        let report = match self.reconciler.run().await {
            Ok(report) => Some(report),
            Err(err) => {
                error!("temp channel reconciliation failed: {err}");
                None
            }
        };
        self.ready.store(true, Ordering::SeqCst);
        self.schedule_empty_tracked().await;
        report
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn handle_voice_state(&self, change: VoiceStateChange) {
        if !self.is_ready() {
            debug!(guild_id = %change.guild_id, "dropping voice state update before reconciliation");
            return;
        }
        if change.member.bot || change.before == change.after {
            return;
        }

        if let Some(joined) = change.after {
            if self.index.contains(joined) {
                self.on_temp_channel_joined(change.guild_id, joined).await;
            } else if let Some(config) = self.enabled_config(change.guild_id).await {
                if config.trigger_channel_id == joined {
                    self.orchestrator
                        .handle_trigger_join(&config, &change.member)
                        .await;
                }
            }
        }

        if let Some(left) = change.before {
            if self.index.contains(left) {
                self.on_temp_channel_left(change.guild_id, left).await;
            }
        }
    }

    pub async fn handle_channel_deleted(&self, channel_id: ChannelId) {
        if !self.is_ready() {
            return;
        }
        self.scheduler.finalize_manual_deletion(channel_id).await;
    }

    /// The bot was removed from the guild: forget everything about it.
    pub async fn handle_guild_removed(&self, guild_id: GuildId) {
        let cancelled = self.scheduler.cancel_guild(guild_id);
        let untracked = self.index.remove_guild(guild_id);

        match self
            .records
            .list_live_channels_in_guild(&guild_id.to_string())
            .await
        {
            Ok(records) => {
                for record in records {
                    if let Ok(id) = config_store::parse_snowflake("channel_id", &record.channel_id) {
                        self.scheduler
                            .finalize(ChannelId::new(id), Some(record.created_at))
                            .await;
                    }
                }
            }
            Err(err) => {
                error!(guild_id = %guild_id, "failed to list temp channels of removed guild: {err}")
            }
        }

        if let Err(err) = self.configs.delete(guild_id).await {
            error!(guild_id = %guild_id, "failed to delete join-to-create config: {err}");
        }
        self.guard.forget_guild(guild_id);

        info!(
            guild_id = %guild_id,
            cancelled_timers = cancelled,
            untracked_channels = untracked.len(),
            "cleaned up join-to-create state for removed guild"
        );
    }

    pub async fn is_trigger_channel(&self, channel_id: ChannelId) -> bool {
        self.configs.is_trigger_channel(channel_id).await
    }

    /// Checks the in-memory index first and falls back to the store for
    /// channels created before this process started.
    pub async fn is_temp_channel(&self, channel_id: ChannelId) -> bool {
        if self.index.contains(channel_id) {
            return true;
        }
        match self.records.get_live_channel(&channel_id.to_string()).await {
            Ok(record) => record.is_some(),
            Err(err) => {
                warn!(channel_id = %channel_id, "temp channel lookup failed: {err}");
                false
            }
        }
    }

    /// Owner of a live private temp channel.
    pub async fn channel_owner(&self, channel_id: ChannelId) -> Result<Option<UserId>, VoiceError> {
        let record = self.records.get_live_channel(&channel_id.to_string()).await?;
        Ok(record
            .and_then(|record| record.owner_user_id)
            .and_then(|owner| owner.parse::<u64>().ok())
            .filter(|owner| *owner != 0)
            .map(UserId::new))
    }

    pub fn tracked_channels(&self) -> usize {
        self.index.len()
    }

    pub fn pending_deletions(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Cancels all pending deletion timers. Whatever they would have done is
    /// repaired by reconciliation on the next start.
    pub fn shutdown(&self) {
        let cancelled = self.scheduler.shutdown();
        info!(cancelled, "voice lifecycle stopped");
    }

    async fn on_temp_channel_joined(&self, guild_id: GuildId, channel_id: ChannelId) {
        if self.scheduler.cancel(channel_id) {
            info!(channel_id = %channel_id, "temp channel reoccupied, cancelled deletion");
        }

        match self.platform.occupancy(guild_id, channel_id).await {
            Ok(Some(occupants)) => {
                let occupants = i32::try_from(occupants).unwrap_or(i32::MAX);
                if let Err(err) = self
                    .records
                    .raise_peak_occupancy(&channel_id.to_string(), occupants)
                    .await
                {
                    warn!(channel_id = %channel_id, "failed to record peak occupancy: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(channel_id = %channel_id, "failed to read occupancy: {err}"),
        }
    }

    async fn on_temp_channel_left(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.scheduler.cancel(channel_id);
        self.schedule_if_empty(guild_id, channel_id).await;
    }

    async fn schedule_empty_tracked(&self) {
        let mut scheduled = 0;
        for (channel_id, tracked) in self.index.snapshot() {
            if self.scheduler.is_pending(channel_id) {
                continue;
            }
            if self.schedule_if_empty(tracked.guild_id, channel_id).await {
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            info!(scheduled, "scheduled deletion of temp channels emptied during reconciliation");
        }
    }

    /// Returns `true` when a deletion timer was started.
    async fn schedule_if_empty(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        match self.platform.occupancy(guild_id, channel_id).await {
            Ok(Some(0)) => {
                let delay = match self.configs.get_config(guild_id).await {
                    Ok(Some(config)) => config.delete_delay(),
                    Ok(None) | Err(_) => self.default_delete_delay,
                };
                self.scheduler.schedule(guild_id, channel_id, delay);
                true
            }
            Ok(Some(_)) => false,
            Ok(None) => {
                debug!(channel_id = %channel_id, "temp channel no longer exists");
                false
            }
            Err(err) => {
                warn!(channel_id = %channel_id, "failed to read temp channel occupancy: {err}");
                false
            }
        }
    }

    async fn enabled_config(&self, guild_id: GuildId) -> Option<GuildConfig> {
        match self.configs.get_config(guild_id).await {
            Ok(config) => config.filter(|config| config.enabled),
            Err(err) => {
                warn!(guild_id = %guild_id, "skipping voice event: {err}");
                None
            }
        }
    }
}
