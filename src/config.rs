pub use self::parser::{
    AuthConfig, Config, DatabaseConfig, DbType, LoggingConfig, VoiceDefaultsConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
