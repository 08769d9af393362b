//! Configuration module for reconciliation-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

/// Default number of rows deleted per statement when rolling back an import.
pub const DEFAULT_ROLLBACK_CHUNK_SIZE: i64 = 500;
const MAX_ROLLBACK_CHUNK_SIZE: i64 = 5_000;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    pub reconciliation: EngineConfig,
}

/// Where ledger rows and checkpoints are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local state, lost on restart. Local development and tests.
    Memory,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown STORAGE_BACKEND '{}', expected 'postgres' or 'memory'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rollback_chunk_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollback_chunk_size: DEFAULT_ROLLBACK_CHUNK_SIZE,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage = match env::var("STORAGE_BACKEND") {
            Ok(value) => StorageBackend::parse(&value)?,
            Err(_) => StorageBackend::Postgres,
        };

        let database_url = match (storage, env::var("DATABASE_URL")) {
            (_, Ok(url)) => url,
            (StorageBackend::Memory, Err(_)) => String::new(),
            (StorageBackend::Postgres, Err(_)) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required"
                )))
            }
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "reconciliation-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            storage,
            database: DatabaseConfig {
                url: database_url,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                run_migrations: env::var("RUN_MIGRATIONS")
                    .ok()
                    .map(|s| parse_flag(&s))
                    .unwrap_or(true),
            },
            reconciliation: EngineConfig {
                rollback_chunk_size: clamp_chunk_size(
                    env::var("ROLLBACK_CHUNK_SIZE")
                        .ok()
                        .and_then(|s| s.parse().ok()),
                ),
            },
        })
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

fn clamp_chunk_size(value: Option<i64>) -> i64 {
    value
        .unwrap_or(DEFAULT_ROLLBACK_CHUNK_SIZE)
        .clamp(1, MAX_ROLLBACK_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parsing() {
        assert_eq!(StorageBackend::parse("Postgres").unwrap(), StorageBackend::Postgres);
        assert_eq!(StorageBackend::parse(" memory ").unwrap(), StorageBackend::Memory);
        assert!(StorageBackend::parse("sqlite").is_err());
    }

    #[test]
    fn chunk_size_is_clamped() {
        assert_eq!(clamp_chunk_size(None), DEFAULT_ROLLBACK_CHUNK_SIZE);
        assert_eq!(clamp_chunk_size(Some(0)), 1);
        assert_eq!(clamp_chunk_size(Some(250)), 250);
        assert_eq!(clamp_chunk_size(Some(1_000_000)), MAX_ROLLBACK_CHUNK_SIZE);
    }

    #[test]
    fn migration_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("OFF"));
    }
}
