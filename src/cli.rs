use clap::Parser;

/// Discord soundboard bot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: String,

    /// Log level or filter directive (overrides the config file)
    #[arg(long, env = "SOUNDBOARD_LOG_LEVEL")]
    pub log_level: Option<String>,
}
