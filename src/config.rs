use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct StoreConfig {
    pub backend: StoreKind,
    /// Required for the postgres backend.
    #[serde(default = "default_store_url")]
    pub url: String,
    #[validate(range(min = 1, max = 256))]
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

fn default_store_url() -> String {
    String::new()
}

fn validate_pool_bounds(cfg: &StoreConfig) -> std::result::Result<(), ValidationError> {
    if cfg.min_connections > cfg.max_connections {
        return Err(ValidationError::new("min_connections_above_max"));
    }
    Ok(())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Memory,
            url: default_store_url(),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("GVS__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration out of range")?;
        if cfg.store.backend == StoreKind::Postgres && cfg.store.url.is_empty() {
            anyhow::bail!("store.url must be set for the postgres backend");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080

        [store]
        backend = "memory"
        max_connections = 10
        min_connections = 2
        acquire_timeout_secs = 30
        idle_timeout_secs = 600
    "#;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreKind::Memory);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_url_default_matches_serde_default() {
        let cfg = Config::from_figment(Figment::new().merge(Toml::string(BASE))).unwrap();
        assert_eq!(cfg.store.url, StoreConfig::default().url);
    }

    #[test]
    fn test_load_from_toml() {
        let cfg = Config::from_figment(Figment::new().merge(Toml::string(BASE))).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert_eq!(cfg.store.backend, StoreKind::Memory);
        assert_eq!(cfg.server.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_postgres_requires_url() {
        let toml = BASE.replace("\"memory\"", "\"postgres\"");
        let result = Config::from_figment(Figment::new().merge(Toml::string(&toml)));
        assert!(result.is_err());
    }

    #[test]
    fn test_min_connections_cannot_exceed_max() {
        let toml = BASE.replace("min_connections = 2", "min_connections = 11");
        let result = Config::from_figment(Figment::new().merge(Toml::string(&toml)));
        assert!(result.is_err());

        let config = StoreConfig {
            min_connections: 11,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_size_validated() {
        let toml = BASE.replace("max_connections = 10", "max_connections = 0");
        let result = Config::from_figment(Figment::new().merge(Toml::string(&toml)));
        assert!(result.is_err());
    }
}
