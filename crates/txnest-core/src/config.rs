use anyhow::Result;
use config::Config;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Settings {
    /// ## Summary
    /// Loads configuration from environment variables and an optional `config.toml`.
    /// Environment variables take precedence over file values.
    ///
    /// ## Errors
    /// Returns an error if building, deserializing or validating the configuration fails.
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .set_default("database.max_connections", 4)?
            .set_default("logging.level", "debug")?
            .add_source(
                config::Environment::default()
                    .convert_case(config::Case::Snake)
                    .separator("_")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .add_source(config::File::with_name("config.toml").required(false))
            .build()?
            .try_deserialize::<Self>()?;

        settings.validate()?;
        Ok(settings)
    }

    /// ## Summary
    /// Rejects settings the database layer cannot work with.
    ///
    /// ## Errors
    /// Returns [`CoreError::ConfigError`] for an empty database URL or a zero-sized pool.
    pub fn validate(&self) -> CoreResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(CoreError::ConfigError("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(CoreError::ConfigError(
                "database.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// ## Summary
/// Loads configuration from environment variables and `.env` file.
///
/// ## Errors
/// Returns an error if loading or deserializing the configuration fails.
pub fn load_config() -> Result<Settings> {
    dotenvy::dotenv().ok();

    Settings::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str, max_connections: u8) -> Settings {
        Settings {
            database: DatabaseConfig {
                url: url.to_string(),
                max_connections,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_settings() {
        assert!(settings("postgresql://localhost/test", 4).validate().is_ok());
    }

    #[test]
    fn test_empty_url_rejected() {
        let result = settings("  ", 4).validate();
        assert!(matches!(result, Err(CoreError::ConfigError(msg)) if msg.contains("url")));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let result = settings("postgresql://localhost/test", 0).validate();
        assert!(matches!(result, Err(CoreError::ConfigError(msg)) if msg.contains("max_connections")));
    }

    #[test_log::test]
    fn test_deserialize_from_toml() {
        let parsed = Config::builder()
            .set_default("logging.level", "debug")
            .and_then(|builder| {
                builder
                    .add_source(config::File::from_str(
                        "[database]\nurl = \"postgresql://localhost/app\"\nmax_connections = 2\n",
                        config::FileFormat::Toml,
                    ))
                    .build()
            })
            .and_then(|config| config.try_deserialize::<Settings>());

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => panic!("settings should deserialize: {e}"),
        };
        assert_eq!(parsed.database.max_connections, 2);
        assert_eq!(parsed.logging.level, "debug");
    }
}
