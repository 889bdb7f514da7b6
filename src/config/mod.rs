//! Configuration management for the document store

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::env;

use crate::repository::DbPool;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log output format: "plain" or "json"
    pub log_format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            telemetry: TelemetryConfig {
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()),
            },
        })
    }
}

/// Build the connection pool from the database configuration.
pub async fn connect_pool(config: &DatabaseConfig) -> crate::error::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url)
        .await?;
    Ok(DbPool::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_reads_database_settings() {
        env::set_var("DATABASE_URL", "postgres://localhost/docstore_test");
        env::set_var("DATABASE_MAX_CONNECTIONS", "7");
        env::remove_var("DATABASE_MIN_CONNECTIONS");
        env::remove_var("LOG_FORMAT");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.url, "postgres://localhost/docstore_test");
        assert_eq!(config.database.max_connections, 7);
        assert_eq!(config.database.min_connections, 2);
        assert_eq!(config.telemetry.log_format, "plain");
    }
}
