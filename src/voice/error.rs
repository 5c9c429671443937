use serenity::all::GuildId;
use thiserror::Error;

use crate::db::DatabaseError;

use super::platform::PlatformError;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("invalid join-to-create settings: {0}")]
    InvalidSettings(String),

    #[error("{0} does not exist on the platform")]
    MissingChannel(String),

    #[error("join-to-create configuration for guild {0} is unavailable")]
    ConfigUnavailable(GuildId),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}
