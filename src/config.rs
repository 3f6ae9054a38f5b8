use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_ttl_minutes: i64,
    pub reset_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub log_path: PathBuf,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub project_name: String,
    pub server_host: String,
    pub cors_origins: Vec<String>,
    pub open_registration: bool,
    pub jwt: JwtConfig,
    pub notifications: NotificationConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = match std::env::var("SECRET_KEY") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("SECRET_KEY not set; tokens will not survive a restart");
                random_secret()
            }
        };
        let jwt = JwtConfig {
            secret,
            access_ttl_minutes: env_parse("ACCESS_TOKEN_EXPIRE_MINUTES", 60 * 24 * 8)?,
            reset_ttl_hours: env_parse("EMAIL_RESET_TOKEN_EXPIRE_HOURS", 48)?,
        };
        let notifications = NotificationConfig {
            log_path: std::env::var("NOTIFICATION_LOG_PATH")
                .unwrap_or_else(|_| "log.txt".into())
                .into(),
            queue_capacity: env_parse("NOTIFICATION_QUEUE_CAPACITY", 64)?,
        };
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            project_name: std::env::var("PROJECT_NAME").unwrap_or_else(|_| "Userbase".into()),
            server_host: std::env::var("SERVER_HOST")
                .unwrap_or_else(|_| "http://localhost:8000".into())
                .trim_end_matches('/')
                .to_string(),
            cors_origins: parse_origins(&std::env::var("BACKEND_CORS_ORIGINS").unwrap_or_default())?,
            open_registration: env_parse("USERS_OPEN_REGISTRATION", true)?,
            jwt,
            notifications,
        })
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            database_url: None,
            project_name: "Userbase".into(),
            server_host: "http://localhost:8000".into(),
            cors_origins: Vec::new(),
            open_registration: true,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                access_ttl_minutes: 60,
                reset_ttl_hours: 48,
            },
            notifications: NotificationConfig {
                log_path: std::env::temp_dir().join("userbase-test-notifications.log"),
                queue_capacity: 8,
            },
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().to_ascii_lowercase().parse::<T>().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

/// Accepts either a JSON array or a comma-separated list.
fn parse_origins(raw: &str) -> anyhow::Result<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw).context("parse BACKEND_CORS_ORIGINS as JSON list");
    }
    Ok(raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn random_secret() -> String {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}
