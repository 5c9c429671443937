use serenity::all::{ChannelId, GuildId, RoleId};
use tracing::info;

use crate::db::TempChannelStats;

use super::config_store::GuildConfig;
use super::{VoiceCore, VoiceError};

pub const DEFAULT_DELETE_DELAY_SECONDS: u32 = 20;
pub const DEFAULT_USER_COOLDOWN_SECONDS: u32 = 10;

/// What an administrator submits to turn the feature on for a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinToCreateSettings {
    pub trigger_channel_id: ChannelId,
    pub category_id: ChannelId,
    pub delete_delay_seconds: u32,
    pub user_cooldown_seconds: u32,
    pub private_vc_role_id: Option<RoleId>,
    pub force_private: bool,
    pub min_session_minutes: u32,
}

impl JoinToCreateSettings {
    pub fn new(trigger_channel_id: ChannelId, category_id: ChannelId) -> Self {
        Self {
            trigger_channel_id,
            category_id,
            delete_delay_seconds: DEFAULT_DELETE_DELAY_SECONDS,
            user_cooldown_seconds: DEFAULT_USER_COOLDOWN_SECONDS,
            private_vc_role_id: None,
            force_private: false,
            min_session_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinToCreateStatus {
    pub config: Option<GuildConfig>,
    pub stats: TempChannelStats,
}

impl VoiceCore {
    /// Validates and stores the settings, then drops the cached config so
    /// the next voice event sees them.
    pub async fn setup(
        &self,
        guild_id: GuildId,
        settings: JoinToCreateSettings,
    ) -> Result<GuildConfig, VoiceError> {
        let config = GuildConfig {
            guild_id,
            trigger_channel_id: settings.trigger_channel_id,
            category_id: settings.category_id,
            enabled: true,
            delete_delay_seconds: settings.delete_delay_seconds,
            user_cooldown_seconds: settings.user_cooldown_seconds,
            private_vc_role_id: settings.private_vc_role_id,
            force_private: settings.force_private,
            min_session_minutes: settings.min_session_minutes,
        };
        config.validate()?;

        if !self
            .platform
            .voice_channel_exists(guild_id, config.trigger_channel_id)
            .await?
        {
            return Err(VoiceError::MissingChannel(format!(
                "trigger voice channel {}",
                config.trigger_channel_id
            )));
        }
        if !self
            .platform
            .category_exists(guild_id, config.category_id)
            .await?
        {
            return Err(VoiceError::MissingChannel(format!(
                "category {}",
                config.category_id
            )));
        }

        self.configs.save(&config).await?;
        info!(
            guild_id = %guild_id,
            trigger_channel_id = %config.trigger_channel_id,
            category_id = %config.category_id,
            "join-to-create configured"
        );
        Ok(config)
    }

    /// Existing temp channels keep their lifecycle. Returns `false` when the
    /// guild was never configured.
    pub async fn disable(&self, guild_id: GuildId) -> Result<bool, VoiceError> {
        let existed = self.configs.disable(guild_id).await?;
        if existed {
            info!(guild_id = %guild_id, "join-to-create disabled");
        }
        Ok(existed)
    }

    pub async fn status(&self, guild_id: GuildId) -> Result<JoinToCreateStatus, VoiceError> {
        let config = self.configs.get_config(guild_id).await?;
        let stats = self.records.guild_stats(&guild_id.to_string()).await?;
        Ok(JoinToCreateStatus { config, stats })
    }
}
