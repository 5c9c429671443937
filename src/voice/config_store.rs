use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serenity::all::{ChannelId, GuildId, RoleId};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::db::{GuildConfigRecord, GuildConfigStore};
use crate::web::metrics::Metrics;

use super::platform::ChannelShape;
use super::{MAX_DELETE_DELAY_SECONDS, MAX_USER_COOLDOWN_SECONDS, VoiceError};

/// Join-to-Create settings of one guild, validated and with typed ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildConfig {
    pub guild_id: GuildId,
    pub trigger_channel_id: ChannelId,
    pub category_id: ChannelId,
    pub enabled: bool,
    pub delete_delay_seconds: u32,
    pub user_cooldown_seconds: u32,
    pub private_vc_role_id: Option<RoleId>,
    pub force_private: bool,
    /// Stored for analytics consumers; the lifecycle itself ignores it.
    pub min_session_minutes: u32,
}

impl GuildConfig {
    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delete_delay_seconds))
    }

    pub fn user_cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.user_cooldown_seconds))
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.delete_delay_seconds > MAX_DELETE_DELAY_SECONDS {
            return Err(VoiceError::InvalidSettings(format!(
                "delete delay must be between 0 and {MAX_DELETE_DELAY_SECONDS} seconds"
            )));
        }
        if self.user_cooldown_seconds > MAX_USER_COOLDOWN_SECONDS {
            return Err(VoiceError::InvalidSettings(format!(
                "user cooldown must be between 0 and {MAX_USER_COOLDOWN_SECONDS} seconds"
            )));
        }
        if self.trigger_channel_id == self.category_id {
            return Err(VoiceError::InvalidSettings(
                "trigger channel and category must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shape_for(&self, member_roles: &[RoleId]) -> ChannelShape {
        let holds_private_role = self
            .private_vc_role_id
            .is_some_and(|role| member_roles.contains(&role));
        if self.force_private || holds_private_role {
            ChannelShape::Private
        } else {
            ChannelShape::Public
        }
    }

    pub fn to_record(&self) -> GuildConfigRecord {
        let now = Utc::now();
        GuildConfigRecord {
            guild_id: self.guild_id.to_string(),
            trigger_channel_id: self.trigger_channel_id.to_string(),
            category_id: self.category_id.to_string(),
            enabled: self.enabled,
            delete_delay_seconds: self.delete_delay_seconds as i32,
            user_cooldown_seconds: self.user_cooldown_seconds as i32,
            private_vc_role_id: self.private_vc_role_id.map(|role| role.to_string()),
            force_private: self.force_private,
            min_session_minutes: self.min_session_minutes as i32,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<GuildConfigRecord> for GuildConfig {
    type Error = VoiceError;

    fn try_from(record: GuildConfigRecord) -> Result<Self, Self::Error> {
        let config = Self {
            guild_id: GuildId::new(parse_snowflake("guild_id", &record.guild_id)?),
            trigger_channel_id: ChannelId::new(parse_snowflake(
                "trigger_channel_id",
                &record.trigger_channel_id,
            )?),
            category_id: ChannelId::new(parse_snowflake("category_id", &record.category_id)?),
            enabled: record.enabled,
            delete_delay_seconds: non_negative("delete_delay_seconds", record.delete_delay_seconds)?,
            user_cooldown_seconds: non_negative(
                "user_cooldown_seconds",
                record.user_cooldown_seconds,
            )?,
            private_vc_role_id: match record.private_vc_role_id.as_deref() {
                Some(role) if !role.is_empty() => {
                    Some(RoleId::new(parse_snowflake("private_vc_role_id", role)?))
                }
                _ => None,
            },
            force_private: record.force_private,
            min_session_minutes: non_negative("min_session_minutes", record.min_session_minutes)?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parses a Discord snowflake; zero is not a valid id.
pub fn parse_snowflake(field: &str, value: &str) -> Result<u64, VoiceError> {
    match value.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(VoiceError::InvalidSettings(format!(
            "{field} is not a valid id: {value:?}"
        ))),
    }
}

fn non_negative(field: &str, value: i32) -> Result<u32, VoiceError> {
    u32::try_from(value)
        .map_err(|_| VoiceError::InvalidSettings(format!("{field} cannot be negative")))
}

struct CachedConfig {
    value: Option<GuildConfig>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<GuildId, CachedConfig>,
    /// Bumped by every invalidation. A read that started under an older
    /// generation may hold pre-write data and must not fill the cache.
    generation: u64,
}

/// Read-through cache over the persisted guild configuration. Absent and
/// disabled rows are cached as `None` so unconfigured guilds do not hit the
/// database on every voice event.
pub struct ConfigStore {
    store: Arc<dyn GuildConfigStore>,
    ttl: Duration,
    cache: Mutex<CacheState>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn GuildConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the enabled configuration of a guild, `None` when the feature
    /// is not configured there. A storage failure falls back to the last
    /// cached value, however old.
    pub async fn get_config(&self, guild_id: GuildId) -> Result<Option<GuildConfig>, VoiceError> {
        if let Some(value) = self.fresh(guild_id) {
            Metrics::config_cache_hit();
            return Ok(value);
        }
        Metrics::config_cache_miss();

        let generation = self.cache.lock().generation;
        match self.store.get_enabled_config(&guild_id.to_string()).await {
            Ok(record) => {
                let value = match record.map(GuildConfig::try_from).transpose() {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(guild_id = %guild_id, "ignoring invalid join-to-create config: {err}");
                        None
                    }
                };
                let mut cache = self.cache.lock();
                if cache.generation == generation {
                    cache.entries.insert(
                        guild_id,
                        CachedConfig {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                } else {
                    debug!(guild_id = %guild_id, "config changed during lookup, not caching");
                }
                Ok(value)
            }
            Err(err) => {
                let stale = self
                    .cache
                    .lock()
                    .entries
                    .get(&guild_id)
                    .map(|cached| cached.value.clone());
                match stale {
                    Some(value) => {
                        warn!(guild_id = %guild_id, "config lookup failed, serving cached value: {err}");
                        Ok(value)
                    }
                    None => {
                        warn!(guild_id = %guild_id, "config lookup failed with nothing cached: {err}");
                        Err(VoiceError::ConfigUnavailable(guild_id))
                    }
                }
            }
        }
    }

    pub fn invalidate(&self, guild_id: GuildId) {
        let mut cache = self.cache.lock();
        cache.generation += 1;
        if cache.entries.remove(&guild_id).is_some() {
            debug!(guild_id = %guild_id, "invalidated join-to-create config cache");
        }
    }

    pub async fn save(&self, config: &GuildConfig) -> Result<(), VoiceError> {
        config.validate()?;
        self.store.upsert_config(&config.to_record()).await?;
        self.invalidate(config.guild_id);
        Ok(())
    }

    /// Returns `false` when the guild was never configured.
    pub async fn disable(&self, guild_id: GuildId) -> Result<bool, VoiceError> {
        let existed = self.store.disable_config(&guild_id.to_string()).await?;
        self.invalidate(guild_id);
        Ok(existed)
    }

    pub async fn delete(&self, guild_id: GuildId) -> Result<bool, VoiceError> {
        let existed = self.store.delete_config(&guild_id.to_string()).await?;
        self.invalidate(guild_id);
        Ok(existed)
    }

    /// Answers from fresh cache entries first and asks the store otherwise.
    /// Storage failures answer `false`.
    pub async fn is_trigger_channel(&self, channel_id: ChannelId) -> bool {
        let cached = {
            let now = Instant::now();
            self.cache.lock().entries.values().any(|cached| {
                now.duration_since(cached.fetched_at) < self.ttl
                    && cached
                        .value
                        .as_ref()
                        .is_some_and(|config| config.trigger_channel_id == channel_id)
            })
        };
        if cached {
            return true;
        }

        match self.store.is_enabled_trigger(&channel_id.to_string()).await {
            Ok(is_trigger) => is_trigger,
            Err(err) => {
                warn!(channel_id = %channel_id, "trigger lookup failed: {err}");
                false
            }
        }
    }

    fn fresh(&self, guild_id: GuildId) -> Option<Option<GuildConfig>> {
        let cache = self.cache.lock();
        let cached = cache.entries.get(&guild_id)?;
        if Instant::now().duration_since(cached.fetched_at) < self.ttl {
            Some(cached.value.clone())
        } else {
            None
        }
    }
}
