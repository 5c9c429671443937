use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::{DatabaseError, GuildConfigStore, TempChannelStore};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::db::postgres::{PostgresGuildConfigStore, PostgresTempChannelStore};
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteGuildConfigStore, SqliteTempChannelStore};
#[cfg(feature = "sqlite")]
use diesel::Connection;
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    config_store: Arc<dyn GuildConfigStore>,
    temp_channel_store: Arc<dyn TempChannelStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();
                let max_connections = config.max_connections();
                let min_connections = config.min_connections();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);

                let builder = r2d2::Pool::builder()
                    .max_size(max_connections.unwrap_or(10))
                    .min_idle(Some(min_connections.unwrap_or(1)));

                let pool = tokio::task::spawn_blocking(move || builder.build(manager))
                    .await
                    .map_err(|e| DatabaseError::Connection(format!("pool task failed: {e}")))?
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let config_store = Arc::new(PostgresGuildConfigStore::new(pool.clone()));
                let temp_channel_store = Arc::new(PostgresTempChannelStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    config_store,
                    temp_channel_store,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("sqlite path is not configured".to_string())
                })?;
                let path_arc = Arc::new(path.clone());

                let config_store = Arc::new(SqliteGuildConfigStore::new(path_arc.clone()));
                let temp_channel_store = Arc::new(SqliteTempChannelStore::new(path_arc));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    config_store,
                    temp_channel_store,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool is not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path is not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS join_to_create_config (
                    id BIGSERIAL PRIMARY KEY,
                    guild_id TEXT NOT NULL UNIQUE,
                    trigger_channel_id TEXT NOT NULL,
                    category_id TEXT NOT NULL,
                    enabled BOOLEAN NOT NULL DEFAULT TRUE,
                    delete_delay_seconds INTEGER NOT NULL DEFAULT 20
                        CHECK (delete_delay_seconds BETWEEN 0 AND 300),
                    user_cooldown_seconds INTEGER NOT NULL DEFAULT 10
                        CHECK (user_cooldown_seconds BETWEEN 0 AND 60),
                    private_vc_role_id TEXT,
                    force_private BOOLEAN NOT NULL DEFAULT FALSE,
                    min_session_minutes INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS voice_temp_channels (
                    id BIGSERIAL PRIMARY KEY,
                    guild_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    trigger_channel_id TEXT NOT NULL,
                    category_id TEXT NOT NULL,
                    creator_user_id TEXT NOT NULL,
                    creator_username TEXT NOT NULL,
                    is_private BOOLEAN NOT NULL DEFAULT FALSE,
                    owner_user_id TEXT,
                    owner_username TEXT,
                    max_concurrent_users INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    deleted_at TIMESTAMP WITH TIME ZONE,
                    total_lifetime_seconds BIGINT
                )
                "#,
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_voice_temp_channels_live ON voice_temp_channels(channel_id) WHERE deleted_at IS NULL",
                "CREATE INDEX IF NOT EXISTS idx_voice_temp_channels_guild ON voice_temp_channels(guild_id)",
                "CREATE INDEX IF NOT EXISTS idx_join_to_create_config_trigger ON join_to_create_config(trigger_channel_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS join_to_create_config (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id TEXT NOT NULL UNIQUE,
                    trigger_channel_id TEXT NOT NULL,
                    category_id TEXT NOT NULL,
                    enabled BOOLEAN NOT NULL DEFAULT 1,
                    delete_delay_seconds INTEGER NOT NULL DEFAULT 20
                        CHECK (delete_delay_seconds BETWEEN 0 AND 300),
                    user_cooldown_seconds INTEGER NOT NULL DEFAULT 10
                        CHECK (user_cooldown_seconds BETWEEN 0 AND 60),
                    private_vc_role_id TEXT,
                    force_private BOOLEAN NOT NULL DEFAULT 0,
                    min_session_minutes INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS voice_temp_channels (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    trigger_channel_id TEXT NOT NULL,
                    category_id TEXT NOT NULL,
                    creator_user_id TEXT NOT NULL,
                    creator_username TEXT NOT NULL,
                    is_private BOOLEAN NOT NULL DEFAULT 0,
                    owner_user_id TEXT,
                    owner_username TEXT,
                    max_concurrent_users INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT,
                    total_lifetime_seconds BIGINT
                )
                "#,
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_voice_temp_channels_live ON voice_temp_channels(channel_id) WHERE deleted_at IS NULL",
                "CREATE INDEX IF NOT EXISTS idx_voice_temp_channels_guild ON voice_temp_channels(guild_id)",
                "CREATE INDEX IF NOT EXISTS idx_join_to_create_config_trigger ON join_to_create_config(trigger_channel_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn config_store(&self) -> Arc<dyn GuildConfigStore> {
        self.config_store.clone()
    }

    pub fn temp_channel_store(&self) -> Arc<dyn TempChannelStore> {
        self.temp_channel_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}
