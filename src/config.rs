pub use self::parser::{
    Config, DatabaseConfig, DbType, DiscordConfig, LoggingConfig, PlaybackConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
