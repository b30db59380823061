//! Pipeline configuration.
//!
//! Read once at startup from environment variables. Every value has a default
//! except the ones that switch a component on (`TILEWORKS_QUEUE_URL`,
//! `DATABASE_URL`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tileworks_media::{DEFAULT_QUALITY, PresetTable};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{key} must be set")]
    Missing { key: &'static str },
}

/// Queue connection and retry settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL; `None` disables the queue consumer.
    pub url: Option<String>,
    pub key: String,
    pub capacity: usize,
    pub put_timeout: Duration,
    pub max_retries: u32,
    pub poll_timeout: Duration,
    pub max_in_flight: usize,
}

/// Everything the media pipeline needs at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub image_root: PathBuf,
    pub workers: usize,
    pub quality: u8,
    pub presets: PresetTable,
    pub queue: QueueConfig,
    pub variant_service_url: String,
    pub variant_timeout: Duration,
    pub bind: SocketAddr,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

pub const DEFAULT_QUEUE_KEY: &str = "tileworks:variant-tasks";
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DATABASE_CONNECTIONS: u32 = 5;

impl PipelineConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let presets = match get("TILEWORKS_PRESETS") {
            Some(raw) => PresetTable::from_json(&raw).map_err(|e| ConfigError::Invalid {
                key: "TILEWORKS_PRESETS",
                reason: e.to_string(),
            })?,
            None => PresetTable::standard(),
        };

        let quality: u8 = parse_or(&get, "TILEWORKS_JPEG_QUALITY", DEFAULT_QUALITY)?;
        if !(1..=100).contains(&quality) {
            return Err(ConfigError::Invalid {
                key: "TILEWORKS_JPEG_QUALITY",
                reason: format!("{quality} is outside 1..=100"),
            });
        }

        let queue = QueueConfig {
            url: get("TILEWORKS_QUEUE_URL"),
            key: get("TILEWORKS_QUEUE_KEY").unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            capacity: positive(
                parse_or(&get, "TILEWORKS_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
                "TILEWORKS_QUEUE_CAPACITY",
            )?,
            put_timeout: millis(&get, "TILEWORKS_QUEUE_PUT_TIMEOUT_MS", 2_000)?,
            max_retries: parse_or(&get, "TILEWORKS_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            poll_timeout: millis(&get, "TILEWORKS_POLL_TIMEOUT_MS", 1_000)?,
            max_in_flight: positive(
                parse_or(&get, "TILEWORKS_MAX_IN_FLIGHT", 8usize)?,
                "TILEWORKS_MAX_IN_FLIGHT",
            )?,
        };

        Ok(Self {
            image_root: get("TILEWORKS_IMAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static/images")),
            workers: positive(
                parse_or(&get, "TILEWORKS_WORKERS", DEFAULT_WORKERS)?,
                "TILEWORKS_WORKERS",
            )?,
            quality,
            presets,
            queue,
            variant_service_url: get("TILEWORKS_VARIANT_SERVICE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8090/".to_string()),
            variant_timeout: millis(&get, "TILEWORKS_VARIANT_TIMEOUT_MS", 30_000)?,
            bind: parse_or(
                &get,
                "TILEWORKS_BIND",
                SocketAddr::from(([0, 0, 0, 0], 8090)),
            )?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                &get,
                "TILEWORKS_DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_CONNECTIONS,
            )?,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing { key: "DATABASE_URL" })
    }
}

fn parse_or<T>(
    get: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

fn millis(
    get: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_or(get, key, default_ms).map(Duration::from_millis)
}

fn positive(value: usize, key: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.quality, 82);
        assert_eq!(cfg.queue.capacity, 100);
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.queue.key, DEFAULT_QUEUE_KEY);
        assert_eq!(cfg.queue.put_timeout, Duration::from_millis(2_000));
        assert_eq!(cfg.variant_timeout, Duration::from_secs(30));
        assert_eq!(cfg.database_max_connections, DEFAULT_DATABASE_CONNECTIONS);
        assert!(cfg.queue.url.is_none());
        assert_eq!(cfg.image_root, PathBuf::from("static/images"));
        assert!(cfg.presets.contains("details"));
        assert!(cfg.require_database_url().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("TILEWORKS_WORKERS", "2"),
            ("TILEWORKS_MAX_RETRIES", "5"),
            ("TILEWORKS_POLL_TIMEOUT_MS", "250"),
            ("TILEWORKS_QUEUE_URL", "redis://localhost:6379"),
            (
                "TILEWORKS_PRESETS",
                r#"[{"name":"thumb","width":120,"height":120,"fit":"cover"}]"#,
            ),
        ])
        .unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.queue.max_retries, 5);
        assert_eq!(cfg.queue.poll_timeout, Duration::from_millis(250));
        assert_eq!(cfg.queue.url.as_deref(), Some("redis://localhost:6379"));
        assert!(cfg.presets.contains("thumb"));
        assert!(!cfg.presets.contains("products"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("TILEWORKS_WORKERS", "many")]).unwrap_err();
        assert!(err.to_string().contains("TILEWORKS_WORKERS"));

        assert!(config(&[("TILEWORKS_WORKERS", "0")]).is_err());
        assert!(config(&[("TILEWORKS_QUEUE_CAPACITY", "0")]).is_err());
        assert!(config(&[("TILEWORKS_JPEG_QUALITY", "0")]).is_err());
        assert!(config(&[("TILEWORKS_PRESETS", "[]x")]).is_err());
    }
}
