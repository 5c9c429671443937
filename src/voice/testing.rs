//! In-memory stand-ins for the platform and the stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId, UserId};
use tokio::sync::Notify;

use crate::config::VoiceDefaultsConfig;
use crate::db::{
    DatabaseError, GuildConfigRecord, GuildConfigStore, TempChannelRecord, TempChannelStats,
    TempChannelStore,
};

use super::config_store::GuildConfig;
use super::index::TrackedChannel;
use super::platform::{CreateTempChannel, PlatformError, VoiceMember, VoicePlatform, VoiceStateChange};
use super::VoiceCore;

pub(crate) const TRIGGER: ChannelId = ChannelId::new(500);
pub(crate) const CATEGORY: ChannelId = ChannelId::new(600);

pub(crate) fn guild_config(guild_id: GuildId) -> GuildConfig {
    GuildConfig {
        guild_id,
        trigger_channel_id: TRIGGER,
        category_id: CATEGORY,
        enabled: true,
        delete_delay_seconds: 20,
        user_cooldown_seconds: 10,
        private_vc_role_id: None,
        force_private: false,
        min_session_minutes: 0,
    }
}

pub(crate) fn member(user_id: u64, name: &str) -> VoiceMember {
    VoiceMember {
        user_id: UserId::new(user_id),
        username: name.to_string(),
        display_name: name.to_string(),
        role_ids: Vec::new(),
        bot: false,
    }
}

pub(crate) fn voice_change(
    guild_id: GuildId,
    member: VoiceMember,
    before: Option<ChannelId>,
    after: Option<ChannelId>,
) -> VoiceStateChange {
    VoiceStateChange {
        guild_id,
        member,
        before,
        after,
    }
}

pub(crate) fn temp_record(
    guild_id: GuildId,
    channel_id: ChannelId,
    created_at: DateTime<Utc>,
) -> TempChannelRecord {
    TempChannelRecord {
        id: 0,
        guild_id: guild_id.to_string(),
        channel_id: channel_id.to_string(),
        trigger_channel_id: TRIGGER.to_string(),
        category_id: CATEGORY.to_string(),
        creator_user_id: "1".to_string(),
        creator_username: "alice".to_string(),
        is_private: false,
        owner_user_id: None,
        owner_username: None,
        max_concurrent_users: 0,
        created_at,
        deleted_at: None,
        total_lifetime_seconds: None,
    }
}

/// Parks one async call until the test releases it, so a test can run other
/// operations while that call is in flight.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }

    /// Resolves once the gated call is parked.
    pub(crate) async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct PlatformState {
    guilds: HashSet<GuildId>,
    categories: HashSet<ChannelId>,
    voice_channels: HashMap<ChannelId, usize>,
    created: Vec<(ChannelId, CreateTempChannel)>,
    moves: Vec<(UserId, ChannelId)>,
    deleted: Vec<ChannelId>,
    panels: Vec<(ChannelId, UserId)>,
    fail_moves: bool,
    fail_deletes: bool,
    occupancy_gate: Option<(ChannelId, Gate)>,
    delete_gate: Option<Gate>,
}

pub(crate) struct FakePlatform {
    state: Mutex<PlatformState>,
    next_channel: AtomicU64,
}

impl FakePlatform {
    pub(crate) fn new(guild_id: GuildId) -> Self {
        let mut state = PlatformState::default();
        state.guilds.insert(guild_id);
        Self {
            state: Mutex::new(state),
            next_channel: AtomicU64::new(10_000),
        }
    }

    pub(crate) fn add_category(&self, category_id: ChannelId) {
        self.state.lock().categories.insert(category_id);
    }

    pub(crate) fn add_voice_channel(&self, channel_id: ChannelId, occupants: usize) {
        self.state.lock().voice_channels.insert(channel_id, occupants);
    }

    pub(crate) fn set_occupancy(&self, channel_id: ChannelId, occupants: usize) {
        self.add_voice_channel(channel_id, occupants);
    }

    pub(crate) fn remove_channel(&self, channel_id: ChannelId) {
        self.state.lock().voice_channels.remove(&channel_id);
    }

    pub(crate) fn occupancy_of(&self, channel_id: ChannelId) -> Option<usize> {
        self.state.lock().voice_channels.get(&channel_id).copied()
    }

    pub(crate) fn fail_moves(&self, fail: bool) {
        self.state.lock().fail_moves = fail;
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Parks the next occupancy read of `channel_id`.
    pub(crate) fn gate_occupancy(&self, channel_id: ChannelId) -> Gate {
        let gate = Gate::default();
        self.state.lock().occupancy_gate = Some((channel_id, gate.clone()));
        gate
    }

    /// Parks the next channel delete before it takes effect.
    pub(crate) fn gate_delete(&self) -> Gate {
        let gate = Gate::default();
        self.state.lock().delete_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn created(&self) -> Vec<CreateTempChannel> {
        self.state
            .lock()
            .created
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn created_ids(&self) -> Vec<ChannelId> {
        self.state.lock().created.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn moves(&self) -> Vec<(UserId, ChannelId)> {
        self.state.lock().moves.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<ChannelId> {
        self.state.lock().deleted.clone()
    }

    pub(crate) fn panels(&self) -> Vec<(ChannelId, UserId)> {
        self.state.lock().panels.clone()
    }
}

#[async_trait]
impl VoicePlatform for FakePlatform {
    async fn guild_available(&self, guild_id: GuildId) -> bool {
        self.state.lock().guilds.contains(&guild_id)
    }

    async fn voice_channel_exists(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<bool, PlatformError> {
        Ok(self.state.lock().voice_channels.contains_key(&channel_id))
    }

    async fn category_exists(
        &self,
        _guild_id: GuildId,
        category_id: ChannelId,
    ) -> Result<bool, PlatformError> {
        Ok(self.state.lock().categories.contains(&category_id))
    }

    async fn occupancy(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<usize>, PlatformError> {
        let gate = {
            let mut state = self.state.lock();
            match state.occupancy_gate.take() {
                Some((gated, gate)) if gated == channel_id => Some(gate),
                other => {
                    state.occupancy_gate = other;
                    None
                }
            }
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(self.occupancy_of(channel_id))
    }

    async fn create_voice_channel(
        &self,
        request: &CreateTempChannel,
    ) -> Result<ChannelId, PlatformError> {
        let channel_id = ChannelId::new(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.voice_channels.insert(channel_id, 0);
        state.created.push((channel_id, request.clone()));
        Ok(channel_id)
    }

    async fn move_member(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.fail_moves {
            return Err(PlatformError::Forbidden("move members".to_string()));
        }
        *state.voice_channels.entry(channel_id).or_default() += 1;
        state.moves.push((user_id, channel_id));
        Ok(())
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError> {
        let gate = self.state.lock().delete_gate.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.state.lock();
        if state.fail_deletes {
            return Err(PlatformError::Unavailable("gateway timeout".to_string()));
        }
        state.voice_channels.remove(&channel_id);
        state.deleted.push(channel_id);
        Ok(())
    }

    async fn send_control_panel(
        &self,
        channel_id: ChannelId,
        owner_id: UserId,
    ) -> Result<(), PlatformError> {
        self.state.lock().panels.push((channel_id, owner_id));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryConfigStore {
    rows: Mutex<HashMap<String, GuildConfigRecord>>,
    failing: AtomicBool,
    reads: AtomicUsize,
    read_gate: Mutex<Option<Gate>>,
}

impl MemoryConfigStore {
    pub(crate) fn put(&self, record: GuildConfigRecord) {
        self.rows.lock().insert(record.guild_id.clone(), record);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Parks the next enabled-config read after it has taken its snapshot.
    pub(crate) fn gate_read(&self) -> Gate {
        let gate = Gate::default();
        *self.read_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DatabaseError::Connection("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GuildConfigStore for MemoryConfigStore {
    async fn get_enabled_config(
        &self,
        guild_id: &str,
    ) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self
            .rows
            .lock()
            .get(guild_id)
            .filter(|row| row.enabled)
            .cloned();
        let gate = self.read_gate.lock().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(snapshot)
    }

    async fn get_config(&self, guild_id: &str) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        self.check()?;
        Ok(self.rows.lock().get(guild_id).cloned())
    }

    async fn upsert_config(&self, config: &GuildConfigRecord) -> Result<(), DatabaseError> {
        self.check()?;
        let mut rows = self.rows.lock();
        let created_at = rows
            .get(&config.guild_id)
            .map(|row| row.created_at)
            .unwrap_or(config.created_at);
        let mut row = config.clone();
        row.created_at = created_at;
        rows.insert(row.guild_id.clone(), row);
        Ok(())
    }

    async fn disable_config(&self, guild_id: &str) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(match self.rows.lock().get_mut(guild_id) {
            Some(row) => {
                row.enabled = false;
                row.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn delete_config(&self, guild_id: &str) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self.rows.lock().remove(guild_id).is_some())
    }

    async fn is_enabled_trigger(&self, channel_id: &str) -> Result<bool, DatabaseError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .values()
            .any(|row| row.enabled && row.trigger_channel_id == channel_id))
    }
}

#[derive(Default)]
pub(crate) struct MemoryTempChannelStore {
    rows: Mutex<Vec<TempChannelRecord>>,
    finalized: Mutex<HashMap<String, usize>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryTempChannelStore {
    pub(crate) fn put(&self, mut record: TempChannelRecord) {
        let mut rows = self.rows.lock();
        record.id = rows.len() as i64 + 1;
        rows.push(record);
    }

    /// Most recent record for the channel, live or not.
    pub(crate) fn record(&self, channel_id: ChannelId) -> Option<TempChannelRecord> {
        let key = channel_id.to_string();
        self.rows
            .lock()
            .iter()
            .rev()
            .find(|row| row.channel_id == key)
            .cloned()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.rows.lock().iter().filter(|row| row.is_live()).count()
    }

    pub(crate) fn finalize_calls(&self, channel_id: ChannelId) -> usize {
        self.finalized
            .lock()
            .get(&channel_id.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), DatabaseError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(DatabaseError::Query("read failed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TempChannelStore for MemoryTempChannelStore {
    async fn insert_temp_channel(&self, record: &TempChannelRecord) -> Result<(), DatabaseError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("insert failed".to_string()));
        }
        let duplicate = self
            .rows
            .lock()
            .iter()
            .any(|row| row.is_live() && row.channel_id == record.channel_id);
        if duplicate {
            return Err(DatabaseError::Query(
                "UNIQUE constraint failed: voice_temp_channels.channel_id".to_string(),
            ));
        }
        self.put(record.clone());
        Ok(())
    }

    async fn get_live_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<TempChannelRecord>, DatabaseError> {
        self.check_read()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|row| row.is_live() && row.channel_id == channel_id)
            .cloned())
    }

    async fn list_live_channels(&self) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        self.check_read()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.is_live())
            .cloned()
            .collect())
    }

    async fn list_live_channels_in_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        self.check_read()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| row.is_live() && row.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn finalize_channel(
        &self,
        channel_id: &str,
        deleted_at: DateTime<Utc>,
        lifetime_seconds: i64,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self.rows.lock();
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.is_live() && row.channel_id == channel_id)
        else {
            return Ok(false);
        };
        row.deleted_at = Some(deleted_at);
        row.total_lifetime_seconds = Some(lifetime_seconds);
        *self
            .finalized
            .lock()
            .entry(channel_id.to_string())
            .or_default() += 1;
        Ok(true)
    }

    async fn raise_peak_occupancy(
        &self,
        channel_id: &str,
        occupancy: i32,
    ) -> Result<(), DatabaseError> {
        if let Some(row) = self
            .rows
            .lock()
            .iter_mut()
            .find(|row| row.is_live() && row.channel_id == channel_id)
        {
            row.max_concurrent_users = row.max_concurrent_users.max(occupancy);
        }
        Ok(())
    }

    async fn guild_stats(&self, guild_id: &str) -> Result<TempChannelStats, DatabaseError> {
        self.check_read()?;
        let rows: Vec<(Option<i64>, bool)> = self
            .rows
            .lock()
            .iter()
            .filter(|row| row.guild_id == guild_id)
            .map(|row| (row.total_lifetime_seconds, row.is_live()))
            .collect();
        Ok(TempChannelStats::from_rows(&rows))
    }
}

pub(crate) struct TestCore {
    pub core: VoiceCore,
    pub platform: Arc<FakePlatform>,
    pub configs: Arc<MemoryConfigStore>,
    pub records: Arc<MemoryTempChannelStore>,
}

impl TestCore {
    pub(crate) fn enable(&self, guild_id: GuildId) {
        self.configs.put(guild_config(guild_id).to_record());
    }

    pub(crate) fn index_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        created_at: DateTime<Utc>,
    ) {
        self.core.index.track(
            channel_id,
            TrackedChannel {
                guild_id,
                created_at,
            },
        );
    }
}

/// A core whose platform knows `guild_id` with the trigger channel and
/// category from [`guild_config`].
pub(crate) fn core_with(guild_id: GuildId) -> TestCore {
    let platform = Arc::new(FakePlatform::new(guild_id));
    platform.add_voice_channel(TRIGGER, 0);
    platform.add_category(CATEGORY);
    let configs = Arc::new(MemoryConfigStore::default());
    let records = Arc::new(MemoryTempChannelStore::default());
    let core = VoiceCore::new(
        platform.clone(),
        configs.clone(),
        records.clone(),
        &VoiceDefaultsConfig::default(),
    );
    TestCore {
        core,
        platform,
        configs,
        records,
    }
}
