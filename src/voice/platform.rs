//! The narrow view of the chat platform that the voice lifecycle needs.
//!
//! Everything the core does to Discord goes through [`VoicePlatform`], which
//! keeps the lifecycle logic testable without a gateway connection.

use std::fmt;

use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId, RoleId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing permissions: {0}")]
    Forbidden(String),

    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// The member whose voice state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceMember {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub role_ids: Vec<RoleId>,
    pub bot: bool,
}

/// A member moving between voice channels. Either side is `None` when the
/// member connected or disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub guild_id: GuildId,
    pub member: VoiceMember,
    pub before: Option<ChannelId>,
    pub after: Option<ChannelId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelShape {
    Public,
    Private,
}

impl ChannelShape {
    pub fn is_private(self) -> bool {
        matches!(self, ChannelShape::Private)
    }
}

impl fmt::Display for ChannelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelShape::Public => f.write_str("Public"),
            ChannelShape::Private => f.write_str("Private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTempChannel {
    pub guild_id: GuildId,
    pub category_id: ChannelId,
    pub name: String,
    pub shape: ChannelShape,
    pub owner_id: UserId,
    pub reason: String,
}

#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Whether the bot can currently see the guild at all.
    async fn guild_available(&self, guild_id: GuildId) -> bool;

    async fn voice_channel_exists(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<bool, PlatformError>;

    async fn category_exists(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
    ) -> Result<bool, PlatformError>;

    /// Number of members connected to the channel, or `None` when the channel
    /// no longer exists.
    async fn occupancy(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<usize>, PlatformError>;

    async fn create_voice_channel(
        &self,
        request: &CreateTempChannel,
    ) -> Result<ChannelId, PlatformError>;

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError>;

    /// Deleting a channel that is already gone succeeds.
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError>;

    async fn send_control_panel(
        &self,
        channel_id: ChannelId,
        owner_id: UserId,
    ) -> Result<(), PlatformError>;
}
