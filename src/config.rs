use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub loadgen: LoadgenConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_payload_bytes() -> usize {
    65536
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("analytics_events.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    #[serde(default = "default_table_name")]
    pub name: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: default_table_name(),
        }
    }
}

fn default_table_name() -> String {
    "events".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadgenConfig {
    #[serde(default = "default_loadgen_url")]
    pub url: String,
    #[serde(default = "default_loadgen_count")]
    pub count: usize,
    #[serde(default = "default_loadgen_concurrency")]
    pub concurrency: usize,
}

impl Default for LoadgenConfig {
    fn default() -> Self {
        Self {
            url: default_loadgen_url(),
            count: default_loadgen_count(),
            concurrency: default_loadgen_concurrency(),
        }
    }
}

fn default_loadgen_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_loadgen_count() -> usize {
    1000
}
fn default_loadgen_concurrency() -> usize {
    16
}

impl AppConfig {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.path.as_os_str().is_empty() {
            return Err("database.path must not be empty. \
                 Set it in config.toml or via TALLY__DATABASE__PATH env var."
                .to_string());
        }
        if self.server.port == 0 {
            return Err("server.port must be non-zero".to_string());
        }
        crate::storage::table::validate_identifier(&self.table.name)
            .map_err(|e| format!("table.name is invalid: {e}"))?;
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (TALLY__SERVER__PORT=9000, etc.)
        builder = builder.add_source(
            Environment::with_prefix("TALLY")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
