//! Startup configuration for the cache.
//!
//! Settings are read once, from the environment or a YAML document, and
//! handed to [`CacheManager::from_settings`](super::CacheManager::from_settings).
//! There is no hot reload.

use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
    #[serde(alias = "null")]
    None,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-process" | "inprocess" => Some(Self::Memory),
            "redis" | "shared-store" => Some(Self::Redis),
            "none" | "null" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Full connection URL; when set, host/port/db/password are ignored.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            connect_timeout_ms: 2_000,
        }
    }
}

impl RedisSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    /// Connection URL with the password percent-encoded.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(ref url) = self.url {
            return Ok(url.clone());
        }
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut url = Url::parse(&format!("redis://{}:{}/{}", host, self.port, self.db))
            .map_err(|e| {
                Error::configuration_with_context(
                    "invalid redis host",
                    ErrorContext::new()
                        .with_field_path("REDIS_HOST")
                        .with_details(e.to_string())
                        .with_source("settings"),
                )
            })?;
        if let Some(ref password) = self.password {
            url.set_password(Some(password)).map_err(|_| {
                Error::configuration_with_context(
                    "redis url cannot carry a password",
                    ErrorContext::new()
                        .with_field_path("REDIS_PASSWORD")
                        .with_source("settings"),
                )
            })?;
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub op_timeout_ms: u64,
    pub bulk_timeout_ms: u64,
    pub namespace: Option<String>,
    pub max_entries: usize,
    pub sweep_interval_secs: Option<u64>,
    pub redis: RedisSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            enabled: true,
            default_ttl_secs: 300,
            op_timeout_ms: 500,
            bulk_timeout_ms: 5_000,
            namespace: None,
            max_entries: 10_000,
            sweep_interval_secs: None,
            redis: RedisSettings::default(),
        }
    }
}

impl CacheSettings {
    /// Read settings from process environment variables.
    ///
    /// - `CACHE_TYPE` (`memory` | `redis` | `none`, default `memory`)
    /// - `CACHE_ENABLED`, `CACHE_DEFAULT_TTL_SECS`, `CACHE_OP_TIMEOUT_MS`,
    ///   `CACHE_BULK_TIMEOUT_MS`, `CACHE_NAMESPACE`, `CACHE_MAX_ENTRIES`,
    ///   `CACHE_SWEEP_INTERVAL_SECS`
    /// - `REDIS_URL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`, `REDIS_PASSWORD`,
    ///   `REDIS_CONNECT_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut s = Self::default();

        if let Some(raw) = get("CACHE_TYPE") {
            s.backend = BackendKind::parse(&raw).ok_or_else(|| {
                invalid("CACHE_TYPE", &raw, "one of memory, redis, none")
            })?;
        }
        if let Some(raw) = get("CACHE_ENABLED") {
            s.enabled = parse_bool(&raw).ok_or_else(|| invalid("CACHE_ENABLED", &raw, "a boolean"))?;
        }
        if let Some(v) = parse_num::<u64>(&get, "CACHE_DEFAULT_TTL_SECS")? {
            s.default_ttl_secs = v;
        }
        if let Some(v) = parse_num::<u64>(&get, "CACHE_OP_TIMEOUT_MS")? {
            s.op_timeout_ms = v;
        }
        if let Some(v) = parse_num::<u64>(&get, "CACHE_BULK_TIMEOUT_MS")? {
            s.bulk_timeout_ms = v;
        }
        s.namespace = get("CACHE_NAMESPACE");
        if let Some(v) = parse_num::<usize>(&get, "CACHE_MAX_ENTRIES")? {
            s.max_entries = v;
        }
        s.sweep_interval_secs = parse_num::<u64>(&get, "CACHE_SWEEP_INTERVAL_SECS")?.filter(|v| *v > 0);

        s.redis.url = get("REDIS_URL");
        if let Some(host) = get("REDIS_HOST") {
            s.redis.host = host;
        }
        if let Some(v) = parse_num::<u16>(&get, "REDIS_PORT")? {
            s.redis.port = v;
        }
        if let Some(v) = parse_num::<i64>(&get, "REDIS_DB")? {
            s.redis.db = v;
        }
        s.redis.password = get("REDIS_PASSWORD");
        if let Some(v) = parse_num::<u64>(&get, "REDIS_CONNECT_TIMEOUT_MS")? {
            s.redis.connect_timeout_ms = v;
        }
        Ok(s)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                "invalid cache settings document",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("settings"),
            )
        })
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms.max(1))
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

fn invalid(var: &str, raw: &str, expected: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", var),
        ErrorContext::new()
            .with_field_path(var)
            .with_details(format!("expected {}, got '{}'", expected, raw))
            .with_source("settings"),
    )
}

fn parse_num<T: std::str::FromStr>(
    get: &dyn Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>> {
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(var, &raw, "a number")),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
