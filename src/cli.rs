use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "join-to-create")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Override the configured log level (e.g. `debug`)
    #[arg(long)]
    pub log_level: Option<String>,
}
