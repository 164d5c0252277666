use anyhow::{Context, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;
use server::config::{EngineConfig, ManagementConfig};
use server::model::ConnectionDescriptor;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default, alias = "azure_ad")]
    management: ManagementConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    connections: Vec<SavedConnection>,
}

impl AppConfig {
    /// Loads `.env`, the user config file, `config.toml` (or `explicit`) and
    /// environment variables, later sources overriding earlier ones.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(user_file) = user_config_file() {
            builder = builder.add_source(File::from(user_file).required(false));
        }
        builder = match explicit {
            Some(path) => builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => builder.add_source(File::with_name(CONFIG_FILE).required(false)),
        };
        let config = builder
            .add_source(Environment::default().separator("__"))
            .build()
            .context("Configuration loading failed. Please check your config.toml file and environment variables")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize config")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Err(errors) = self.engine.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.user_message()).collect();
            return Err(anyhow!(
                "Configuration validation failed:\n{}",
                messages.join("\n\n")
            ));
        }
        Ok(())
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn management(&self) -> &ManagementConfig {
        &self.management
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn connections(&self) -> &[SavedConnection] {
        &self.connections
    }
}

fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sbexplorer").join(CONFIG_FILE))
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

/// A connection kept in the config file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SavedConnection {
    pub connection_string: String,
    #[serde(default)]
    pub use_managed_identity: bool,
}

impl SavedConnection {
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.connection_string.clone(), self.use_managed_identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_loads_engine_limits_and_connections() {
        let file = write_config(
            r#"
            [engine]
            topic_list_fetch_count = 25
            queue_message_fetch_count = 10

            [logging]
            level = "debug"

            [[connections]]
            connection_string = "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=k;SharedAccessKey=v"

            [[connections]]
            connection_string = "contoso.servicebus.windows.net"
            use_managed_identity = true
            "#,
        );

        let config = assert_ok!(AppConfig::load(Some(file.path())));

        assert_eq!(config.engine().topic_list_fetch_count(), 25);
        assert_eq!(config.engine().queue_message_fetch_count(), 10);
        assert_eq!(config.engine().queue_list_fetch_count(), 100);
        assert_eq!(config.logging().level(), "debug");
        assert_eq!(config.connections().len(), 2);
        assert!(!config.connections()[0].use_managed_identity);
        assert!(config.connections()[1].descriptor().use_managed_identity);
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let file = write_config(
            r#"
            [engine]
            topic_message_fetch_count = 0
            "#,
        );

        let error = assert_err!(AppConfig::load(Some(file.path())));
        assert!(error.to_string().contains("validation failed"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert_err!(AppConfig::load(Some(Path::new("/definitely/not/here.toml"))));
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level(), "info");
        assert_none!(logging.file());
    }
}
