use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::schema_sqlite::{join_to_create_config, voice_temp_channels};

use super::{
    DatabaseError,
    models::{GuildConfigRecord, TempChannelRecord, TempChannelStats},
};

// Helper function to convert DateTime to ISO string for SQLite
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Helper function to parse ISO string to DateTime
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = join_to_create_config)]
struct DbGuildConfig {
    #[allow(dead_code)]
    id: i32,
    guild_id: String,
    trigger_channel_id: String,
    category_id: String,
    enabled: bool,
    delete_delay_seconds: i32,
    user_cooldown_seconds: i32,
    private_vc_role_id: Option<String>,
    force_private: bool,
    min_session_minutes: i32,
    created_at: String,
    updated_at: String,
}

impl DbGuildConfig {
    fn to_guild_config(&self) -> Result<GuildConfigRecord, DatabaseError> {
        Ok(GuildConfigRecord {
            guild_id: self.guild_id.clone(),
            trigger_channel_id: self.trigger_channel_id.clone(),
            category_id: self.category_id.clone(),
            enabled: self.enabled,
            delete_delay_seconds: self.delete_delay_seconds,
            user_cooldown_seconds: self.user_cooldown_seconds,
            private_vc_role_id: self.private_vc_role_id.clone(),
            force_private: self.force_private,
            min_session_minutes: self.min_session_minutes,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = join_to_create_config)]
struct NewGuildConfig<'a> {
    guild_id: &'a str,
    trigger_channel_id: &'a str,
    category_id: &'a str,
    enabled: bool,
    delete_delay_seconds: i32,
    user_cooldown_seconds: i32,
    private_vc_role_id: Option<&'a str>,
    force_private: bool,
    min_session_minutes: i32,
    created_at: String,
    updated_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = join_to_create_config, treat_none_as_null = true)]
struct UpdateGuildConfig<'a> {
    trigger_channel_id: &'a str,
    category_id: &'a str,
    enabled: bool,
    delete_delay_seconds: i32,
    user_cooldown_seconds: i32,
    private_vc_role_id: Option<&'a str>,
    force_private: bool,
    min_session_minutes: i32,
    updated_at: String,
}

// SQLite uses i32 for INTEGER (primary keys), but we want to keep i64 in our API
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = voice_temp_channels)]
struct DbTempChannel {
    id: i32,
    guild_id: String,
    channel_id: String,
    trigger_channel_id: String,
    category_id: String,
    creator_user_id: String,
    creator_username: String,
    is_private: bool,
    owner_user_id: Option<String>,
    owner_username: Option<String>,
    max_concurrent_users: i32,
    created_at: String,
    deleted_at: Option<String>,
    total_lifetime_seconds: Option<i64>,
}

impl DbTempChannel {
    fn to_temp_channel(&self) -> Result<TempChannelRecord, DatabaseError> {
        Ok(TempChannelRecord {
            id: self.id as i64,
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            trigger_channel_id: self.trigger_channel_id.clone(),
            category_id: self.category_id.clone(),
            creator_user_id: self.creator_user_id.clone(),
            creator_username: self.creator_username.clone(),
            is_private: self.is_private,
            owner_user_id: self.owner_user_id.clone(),
            owner_username: self.owner_username.clone(),
            max_concurrent_users: self.max_concurrent_users,
            created_at: string_to_datetime(&self.created_at)?,
            deleted_at: self
                .deleted_at
                .as_deref()
                .map(string_to_datetime)
                .transpose()?,
            total_lifetime_seconds: self.total_lifetime_seconds,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = voice_temp_channels)]
struct NewTempChannel<'a> {
    guild_id: &'a str,
    channel_id: &'a str,
    trigger_channel_id: &'a str,
    category_id: &'a str,
    creator_user_id: &'a str,
    creator_username: &'a str,
    is_private: bool,
    owner_user_id: Option<&'a str>,
    owner_username: Option<&'a str>,
    max_concurrent_users: i32,
    created_at: String,
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

pub struct SqliteGuildConfigStore {
    db_path: Arc<String>,
}

impl SqliteGuildConfigStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::GuildConfigStore for SqliteGuildConfigStore {
    async fn get_enabled_config(
        &self,
        guild: &str,
    ) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(guild_id.eq(guild))
                .filter(enabled.eq(true))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|c| c.to_guild_config())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_config(&self, guild: &str) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(guild_id.eq(guild))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|c| c.to_guild_config())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_config(&self, config: &GuildConfigRecord) -> Result<(), DatabaseError> {
        let config = config.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let new_config = NewGuildConfig {
                guild_id: &config.guild_id,
                trigger_channel_id: &config.trigger_channel_id,
                category_id: &config.category_id,
                enabled: config.enabled,
                delete_delay_seconds: config.delete_delay_seconds,
                user_cooldown_seconds: config.user_cooldown_seconds,
                private_vc_role_id: config.private_vc_role_id.as_deref(),
                force_private: config.force_private,
                min_session_minutes: config.min_session_minutes,
                created_at: datetime_to_string(&config.created_at),
                updated_at: datetime_to_string(&config.updated_at),
            };
            let changes = UpdateGuildConfig {
                trigger_channel_id: &config.trigger_channel_id,
                category_id: &config.category_id,
                enabled: config.enabled,
                delete_delay_seconds: config.delete_delay_seconds,
                user_cooldown_seconds: config.user_cooldown_seconds,
                private_vc_role_id: config.private_vc_role_id.as_deref(),
                force_private: config.force_private,
                min_session_minutes: config.min_session_minutes,
                updated_at: datetime_to_string(&config.updated_at),
            };

            diesel::insert_into(join_to_create_config::table)
                .values(&new_config)
                .on_conflict(join_to_create_config::guild_id)
                .do_update()
                .set(&changes)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn disable_config(&self, guild: &str) -> Result<bool, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::join_to_create_config::dsl::*;
            diesel::update(join_to_create_config.filter(guild_id.eq(guild)))
                .set((
                    enabled.eq(false),
                    updated_at.eq(datetime_to_string(&Utc::now())),
                ))
                .execute(&mut conn)
                .map(|rows| rows > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn delete_config(&self, guild: &str) -> Result<bool, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            diesel::delete(
                join_to_create_config::table.filter(join_to_create_config::guild_id.eq(guild)),
            )
            .execute(&mut conn)
            .map(|rows| rows > 0)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn is_enabled_trigger(&self, channel: &str) -> Result<bool, DatabaseError> {
        let channel = channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(trigger_channel_id.eq(channel))
                .filter(enabled.eq(true))
                .count()
                .get_result::<i64>(&mut conn)
                .map(|count| count > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteTempChannelStore {
    db_path: Arc<String>,
}

impl SqliteTempChannelStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::TempChannelStore for SqliteTempChannelStore {
    async fn insert_temp_channel(&self, record: &TempChannelRecord) -> Result<(), DatabaseError> {
        let record = record.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let new_record = NewTempChannel {
                guild_id: &record.guild_id,
                channel_id: &record.channel_id,
                trigger_channel_id: &record.trigger_channel_id,
                category_id: &record.category_id,
                creator_user_id: &record.creator_user_id,
                creator_username: &record.creator_username,
                is_private: record.is_private,
                owner_user_id: record.owner_user_id.as_deref(),
                owner_username: record.owner_username.as_deref(),
                max_concurrent_users: record.max_concurrent_users,
                created_at: datetime_to_string(&record.created_at),
            };

            diesel::insert_into(voice_temp_channels::table)
                .values(&new_record)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn get_live_channel(
        &self,
        channel: &str,
    ) -> Result<Option<TempChannelRecord>, DatabaseError> {
        let channel = channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            voice_temp_channels
                .filter(channel_id.eq(channel))
                .filter(deleted_at.is_null())
                .select(DbTempChannel::as_select())
                .first::<DbTempChannel>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|r| r.to_temp_channel())
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_live_channels(&self) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            let results = voice_temp_channels
                .filter(deleted_at.is_null())
                .order(id.asc())
                .select(DbTempChannel::as_select())
                .load::<DbTempChannel>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            results.into_iter().map(|r| r.to_temp_channel()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_live_channels_in_guild(
        &self,
        guild: &str,
    ) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            let results = voice_temp_channels
                .filter(guild_id.eq(guild))
                .filter(deleted_at.is_null())
                .order(id.asc())
                .select(DbTempChannel::as_select())
                .load::<DbTempChannel>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            results.into_iter().map(|r| r.to_temp_channel()).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn finalize_channel(
        &self,
        channel: &str,
        finalized_at: DateTime<Utc>,
        lifetime_seconds: i64,
    ) -> Result<bool, DatabaseError> {
        let channel = channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            diesel::update(
                voice_temp_channels
                    .filter(channel_id.eq(channel))
                    .filter(deleted_at.is_null()),
            )
            .set((
                deleted_at.eq(Some(datetime_to_string(&finalized_at))),
                total_lifetime_seconds.eq(Some(lifetime_seconds)),
            ))
            .execute(&mut conn)
            .map(|rows| rows > 0)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn raise_peak_occupancy(
        &self,
        channel: &str,
        occupancy: i32,
    ) -> Result<(), DatabaseError> {
        let channel = channel.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            diesel::update(
                voice_temp_channels
                    .filter(channel_id.eq(channel))
                    .filter(deleted_at.is_null())
                    .filter(max_concurrent_users.lt(occupancy)),
            )
            .set(max_concurrent_users.eq(occupancy))
            .execute(&mut conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn guild_stats(&self, guild: &str) -> Result<TempChannelStats, DatabaseError> {
        let guild = guild.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema_sqlite::voice_temp_channels::dsl::*;
            let rows = voice_temp_channels
                .filter(guild_id.eq(guild))
                .select((total_lifetime_seconds, deleted_at.is_null()))
                .load::<(Option<i64>, bool)>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(TempChannelStats::from_rows(&rows))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
