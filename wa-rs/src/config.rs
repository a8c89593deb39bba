use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub quota: QuotaConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Token lifetime, in hours.
    pub token_expiry_hours: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Monthly API-call ceiling assigned to newly registered users.
    pub default_api_calls_limit: i64,
    /// Concurrent (active + inactive) session ceiling per user.
    pub max_sessions_per_user: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::ApiError::Internal(format!("Config read error: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::error::ApiError::Internal(format!("Config parse error: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:3000".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_expiry_hours: 24 * 30,
            },
            quota: QuotaConfig {
                default_api_calls_limit: 1000,
                max_sessions_per_user: 5,
            },
            storage: StorageConfig {
                database_url: "sqlite://wa.db?mode=rwc".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.quota.max_sessions_per_user, 5);
        assert_eq!(config.quota.default_api_calls_limit, 1000);
        assert_eq!(config.auth.token_expiry_hours, 720);
    }

    #[test]
    fn test_parse_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:8080"

            [auth]
            jwt_secret = "test-secret"
            token_expiry_hours = 1

            [quota]
            default_api_calls_limit = 50
            max_sessions_per_user = 2

            [storage]
            database_url = "sqlite::memory:"

            [logging]
            level = "debug"
            format = "pretty"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.quota.default_api_calls_limit, 50);
        assert_eq!(config.quota.max_sessions_per_user, 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            listen_addr = "127.0.0.1:9090"

            [auth]
            jwt_secret = "file-secret"
            token_expiry_hours = 2

            [quota]
            default_api_calls_limit = 10
            max_sessions_per_user = 1

            [storage]
            database_url = "sqlite::memory:"

            [logging]
            level = "warn"
            format = "json"
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9090");
        assert_eq!(config.auth.jwt_secret, "file-secret");
        assert_eq!(config.quota.max_sessions_per_user, 1);

        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }
}
