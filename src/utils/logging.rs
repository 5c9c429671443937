use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
