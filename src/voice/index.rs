use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedChannel {
    pub guild_id: GuildId,
    pub created_at: DateTime<Utc>,
}

/// Process-local view of the live temp channels. Rebuilt from the lifecycle
/// store on startup, so losing it is never a correctness problem.
#[derive(Default)]
pub struct LifecycleIndex {
    temp_channels: Mutex<HashMap<ChannelId, TrackedChannel>>,
}

impl LifecycleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, channel_id: ChannelId, tracked: TrackedChannel) {
        self.temp_channels.lock().insert(channel_id, tracked);
    }

    pub fn untrack(&self, channel_id: ChannelId) -> Option<TrackedChannel> {
        self.temp_channels.lock().remove(&channel_id)
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<TrackedChannel> {
        self.temp_channels.lock().get(&channel_id).copied()
    }

    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.temp_channels.lock().contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.temp_channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.temp_channels.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(ChannelId, TrackedChannel)> {
        self.temp_channels
            .lock()
            .iter()
            .map(|(channel_id, tracked)| (*channel_id, *tracked))
            .collect()
    }

    /// Removes and returns every channel tracked for `guild_id`.
    pub fn remove_guild(&self, guild_id: GuildId) -> Vec<ChannelId> {
        let mut temp_channels = self.temp_channels.lock();
        let removed: Vec<ChannelId> = temp_channels
            .iter()
            .filter(|(_, tracked)| tracked.guild_id == guild_id)
            .map(|(channel_id, _)| *channel_id)
            .collect();
        for channel_id in &removed {
            temp_channels.remove(channel_id);
        }
        removed
    }
}
