use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted Join-to-Create settings for one guild. Discord snowflakes are
/// stored as text, exactly as the platform renders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfigRecord {
    pub guild_id: String,
    pub trigger_channel_id: String,
    pub category_id: String,
    pub enabled: bool,
    pub delete_delay_seconds: i32,
    pub user_cooldown_seconds: i32,
    pub private_vc_role_id: Option<String>,
    pub force_private: bool,
    pub min_session_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full life of one temporary voice channel. Live while `deleted_at` is
/// `None`; immutable history afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempChannelRecord {
    pub id: i64,
    pub guild_id: String,
    pub channel_id: String,
    pub trigger_channel_id: String,
    pub category_id: String,
    pub creator_user_id: String,
    pub creator_username: String,
    pub is_private: bool,
    pub owner_user_id: Option<String>,
    pub owner_username: Option<String>,
    pub max_concurrent_users: i32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub total_lifetime_seconds: Option<i64>,
}

impl TempChannelRecord {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempChannelStats {
    pub total_channels: i64,
    pub active_channels: i64,
    pub average_lifetime_seconds: Option<f64>,
}

impl TempChannelStats {
    pub(crate) fn from_rows(rows: &[(Option<i64>, bool)]) -> Self {
        let total_channels = rows.len() as i64;
        let active_channels = rows.iter().filter(|(_, live)| *live).count() as i64;
        let lifetimes: Vec<i64> = rows
            .iter()
            .filter(|(_, live)| !*live)
            .filter_map(|(lifetime, _)| *lifetime)
            .collect();
        let average_lifetime_seconds = if lifetimes.is_empty() {
            None
        } else {
            Some(lifetimes.iter().sum::<i64>() as f64 / lifetimes.len() as f64)
        };

        Self {
            total_channels,
            active_channels,
            average_lifetime_seconds,
        }
    }

    pub fn average_lifetime_minutes(&self) -> i64 {
        self.average_lifetime_seconds
            .map(|seconds| (seconds / 60.0) as i64)
            .unwrap_or(0)
    }
}
