use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.bot_token cannot be empty".to_string(),
            ));
        }

        let prefix = &self.discord.command_prefix;
        if prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.command_prefix cannot be empty".to_string(),
            ));
        }
        if prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidConfig(
                "discord.command_prefix cannot contain whitespace".to_string(),
            ));
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.playback.join_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "playback.join_timeout_secs must be greater than zero".to_string(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "logging.format must be `pretty` or `json`, got `{other}`"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigError;
    use crate::config::Config;

    const MINIMAL: &str = r#"
discord:
  bot_token: "token"
database:
  filename: "soundboard.db"
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL);
        assert_eq!(config.discord.command_prefix, "!");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.playback.join_timeout_secs, 10);
        assert!(config.playback.reply_on_rejected);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_token_is_rejected() {
        let mut config = parse(MINIMAL);
        config.discord.bot_token = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(msg)) if msg.contains("bot_token")
        ));
    }

    #[test]
    fn prefix_with_whitespace_is_rejected() {
        let mut config = parse(MINIMAL);
        config.discord.command_prefix = "! ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut config = parse(MINIMAL);
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_database_is_rejected() {
        let config = parse(
            r#"
discord:
  bot_token: "token"
database: {}
"#,
        );
        assert!(config.validate().is_err());
    }
}
