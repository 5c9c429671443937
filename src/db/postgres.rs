use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{join_to_create_config, voice_temp_channels};

use super::{
    DatabaseError,
    models::{GuildConfigRecord, TempChannelRecord, TempChannelStats},
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = join_to_create_config)]
struct DbGuildConfig {
    #[allow(dead_code)]
    id: i64,
    guild_id: String,
    trigger_channel_id: String,
    category_id: String,
    enabled: bool,
    delete_delay_seconds: i32,
    user_cooldown_seconds: i32,
    private_vc_role_id: Option<String>,
    force_private: bool,
    min_session_minutes: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbGuildConfig> for GuildConfigRecord {
    fn from(value: DbGuildConfig) -> Self {
        Self {
            guild_id: value.guild_id,
            trigger_channel_id: value.trigger_channel_id,
            category_id: value.category_id,
            enabled: value.enabled,
            delete_delay_seconds: value.delete_delay_seconds,
            user_cooldown_seconds: value.user_cooldown_seconds,
            private_vc_role_id: value.private_vc_role_id,
            force_private: value.force_private,
            min_session_minutes: value.min_session_minutes,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
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
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
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
    updated_at: &'a DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = voice_temp_channels)]
struct DbTempChannel {
    id: i64,
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
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    total_lifetime_seconds: Option<i64>,
}

impl From<DbTempChannel> for TempChannelRecord {
    fn from(value: DbTempChannel) -> Self {
        Self {
            id: value.id,
            guild_id: value.guild_id,
            channel_id: value.channel_id,
            trigger_channel_id: value.trigger_channel_id,
            category_id: value.category_id,
            creator_user_id: value.creator_user_id,
            creator_username: value.creator_username,
            is_private: value.is_private,
            owner_user_id: value.owner_user_id,
            owner_username: value.owner_username,
            max_concurrent_users: value.max_concurrent_users,
            created_at: value.created_at,
            deleted_at: value.deleted_at,
            total_lifetime_seconds: value.total_lifetime_seconds,
        }
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
    created_at: &'a DateTime<Utc>,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresGuildConfigStore {
    pool: Pool,
}

impl PostgresGuildConfigStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::GuildConfigStore for PostgresGuildConfigStore {
    async fn get_enabled_config(
        &self,
        guild: &str,
    ) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(guild_id.eq(guild))
                .filter(enabled.eq(true))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn get_config(&self, guild: &str) -> Result<Option<GuildConfigRecord>, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(guild_id.eq(guild))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn upsert_config(&self, config: &GuildConfigRecord) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let config = config.clone();
        with_connection(pool, move |conn| {
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
                created_at: &config.created_at,
                updated_at: &config.updated_at,
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
                updated_at: &config.updated_at,
            };

            diesel::insert_into(join_to_create_config::table)
                .values(&new_config)
                .on_conflict(join_to_create_config::guild_id)
                .do_update()
                .set(&changes)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn disable_config(&self, guild: &str) -> Result<bool, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::join_to_create_config::dsl::*;
            diesel::update(join_to_create_config.filter(guild_id.eq(guild)))
                .set((enabled.eq(false), updated_at.eq(Utc::now())))
                .execute(conn)
                .map(|rows| rows > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_config(&self, guild: &str) -> Result<bool, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            diesel::delete(
                join_to_create_config::table.filter(join_to_create_config::guild_id.eq(guild)),
            )
            .execute(conn)
            .map(|rows| rows > 0)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn is_enabled_trigger(&self, channel: &str) -> Result<bool, DatabaseError> {
        let pool = self.pool.clone();
        let channel = channel.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::join_to_create_config::dsl::*;
            join_to_create_config
                .filter(trigger_channel_id.eq(channel))
                .filter(enabled.eq(true))
                .count()
                .get_result::<i64>(conn)
                .map(|count| count > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

pub struct PostgresTempChannelStore {
    pool: Pool,
}

impl PostgresTempChannelStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::TempChannelStore for PostgresTempChannelStore {
    async fn insert_temp_channel(&self, record: &TempChannelRecord) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let record = record.clone();
        with_connection(pool, move |conn| {
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
                created_at: &record.created_at,
            };

            diesel::insert_into(voice_temp_channels::table)
                .values(&new_record)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn get_live_channel(
        &self,
        channel: &str,
    ) -> Result<Option<TempChannelRecord>, DatabaseError> {
        let pool = self.pool.clone();
        let channel = channel.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            voice_temp_channels
                .filter(channel_id.eq(channel))
                .filter(deleted_at.is_null())
                .select(DbTempChannel::as_select())
                .first::<DbTempChannel>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_live_channels(&self) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            voice_temp_channels
                .filter(deleted_at.is_null())
                .order(id.asc())
                .select(DbTempChannel::as_select())
                .load::<DbTempChannel>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn list_live_channels_in_guild(
        &self,
        guild: &str,
    ) -> Result<Vec<TempChannelRecord>, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            voice_temp_channels
                .filter(guild_id.eq(guild))
                .filter(deleted_at.is_null())
                .order(id.asc())
                .select(DbTempChannel::as_select())
                .load::<DbTempChannel>(conn)
                .map(|rows| rows.into_iter().map(Into::into).collect())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn finalize_channel(
        &self,
        channel: &str,
        finalized_at: DateTime<Utc>,
        lifetime_seconds: i64,
    ) -> Result<bool, DatabaseError> {
        let pool = self.pool.clone();
        let channel = channel.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            diesel::update(
                voice_temp_channels
                    .filter(channel_id.eq(channel))
                    .filter(deleted_at.is_null()),
            )
            .set((
                deleted_at.eq(Some(finalized_at)),
                total_lifetime_seconds.eq(Some(lifetime_seconds)),
            ))
            .execute(conn)
            .map(|rows| rows > 0)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn raise_peak_occupancy(
        &self,
        channel: &str,
        occupancy: i32,
    ) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let channel = channel.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            diesel::update(
                voice_temp_channels
                    .filter(channel_id.eq(channel))
                    .filter(deleted_at.is_null())
                    .filter(max_concurrent_users.lt(occupancy)),
            )
            .set(max_concurrent_users.eq(occupancy))
            .execute(conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn guild_stats(&self, guild: &str) -> Result<TempChannelStats, DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.to_string();
        with_connection(pool, move |conn| {
            use crate::db::schema::voice_temp_channels::dsl::*;
            voice_temp_channels
                .filter(guild_id.eq(guild))
                .select((total_lifetime_seconds, deleted_at.is_null()))
                .load::<(Option<i64>, bool)>(conn)
                .map(|rows| TempChannelStats::from_rows(&rows))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
