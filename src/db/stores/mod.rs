use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DatabaseError;
use super::models::{GuildConfigRecord, TempChannelRecord, TempChannelStats};

#[async_trait]
pub trait GuildConfigStore: Send + Sync {
    async fn get_enabled_config(
        &self,
        guild_id: &str,
    ) -> Result<Option<GuildConfigRecord>, DatabaseError>;
    async fn get_config(
        &self,
        guild_id: &str,
    ) -> Result<Option<GuildConfigRecord>, DatabaseError>;
    async fn upsert_config(&self, config: &GuildConfigRecord) -> Result<(), DatabaseError>;
    /// Returns `false` when the guild has no config row at all.
    async fn disable_config(&self, guild_id: &str) -> Result<bool, DatabaseError>;
    async fn delete_config(&self, guild_id: &str) -> Result<bool, DatabaseError>;
    async fn is_enabled_trigger(&self, channel_id: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TempChannelStore: Send + Sync {
    async fn insert_temp_channel(&self, record: &TempChannelRecord) -> Result<(), DatabaseError>;
    async fn get_live_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<TempChannelRecord>, DatabaseError>;
    async fn list_live_channels(&self) -> Result<Vec<TempChannelRecord>, DatabaseError>;
    async fn list_live_channels_in_guild(
        &self,
        guild_id: &str,
    ) -> Result<Vec<TempChannelRecord>, DatabaseError>;
    /// Sets `deleted_at` and `total_lifetime_seconds` on the live record of
    /// `channel_id`. Returns `false` if no live record existed, so a record
    /// is finalized at most once.
    async fn finalize_channel(
        &self,
        channel_id: &str,
        deleted_at: DateTime<Utc>,
        lifetime_seconds: i64,
    ) -> Result<bool, DatabaseError>;
    async fn raise_peak_occupancy(
        &self,
        channel_id: &str,
        occupancy: i32,
    ) -> Result<(), DatabaseError>;
    async fn guild_stats(&self, guild_id: &str) -> Result<TempChannelStats, DatabaseError>;
}
