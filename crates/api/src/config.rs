//! Application configuration

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tenantry_shared::TenantId;

use crate::routing::{CacheConfig, NormalizerConfig, ResolverConfig, DEFAULT_EVENTS_CHANNEL};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Tenant source: Postgres, or a JSON file for local development
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub tenants_file: Option<PathBuf>,

    // Event feed
    pub redis_url: Option<String>,
    pub tenant_events_channel: String,

    // Resolution cache
    pub cache_ttl_seconds: u64,
    pub notfound_ttl_seconds: u64,
    pub max_entries: usize,
    pub lookup_timeout_ms: u64,
    pub cache_purge_interval_secs: u64,

    // Normalization
    pub strip_www: bool,
    pub suffix_reduction: bool,
    pub wildcard_aliases: bool,
    pub extra_hosts: HashMap<String, String>,

    // Default tenant
    pub default_tenant_id: Option<TenantId>,
    pub default_tenant_domain: Option<String>,

    // Admin
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = optional_var("DATABASE_URL");
        let tenants_file = optional_var("TENANTS_FILE").map(PathBuf::from);
        if database_url.is_none() && tenants_file.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let max_entries: usize = parse_var("MAX_ENTRIES", 10_000)?;
        if max_entries == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_ENTRIES",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Tenant source
            database_url,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 20)?,
            tenants_file,

            // Event feed
            redis_url: optional_var("REDIS_URL"),
            tenant_events_channel: env::var("TENANT_EVENTS_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_EVENTS_CHANNEL.to_string()),

            // Resolution cache
            cache_ttl_seconds: parse_var("CACHE_TTL_SECONDS", 300)?,
            notfound_ttl_seconds: parse_var("NOTFOUND_TTL_SECONDS", 30)?,
            max_entries,
            lookup_timeout_ms: parse_var("LOOKUP_TIMEOUT_MS", 5000)?,
            cache_purge_interval_secs: parse_var("CACHE_PURGE_INTERVAL_SECS", 60)?,

            // Normalization
            strip_www: parse_var("STRIP_WWW", true)?,
            suffix_reduction: parse_var("SUFFIX_REDUCTION", true)?,
            wildcard_aliases: parse_var("WILDCARD_ALIASES", false)?,
            extra_hosts: match optional_var("EXTRA_HOSTS") {
                Some(raw) => parse_extra_hosts(&raw)?,
                None => HashMap::new(),
            },

            // Default tenant
            default_tenant_id: match optional_var("DEFAULT_TENANT_ID") {
                Some(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "DEFAULT_TENANT_ID",
                    value: raw,
                })?),
                None => None,
            },
            default_tenant_domain: optional_var("DEFAULT_TENANT_DOMAIN"),

            // Admin
            admin_token: optional_var("ADMIN_TOKEN"),
        })
    }

    /// Resolver settings derived from this configuration
    pub fn resolver_config(&self) -> ResolverConfig {
        let mut normalizer = NormalizerConfig::default()
            .with_strip_www(self.strip_www)
            .with_suffix_reduction(self.suffix_reduction)
            .with_wildcard_aliases(self.wildcard_aliases);
        for (alias, target) in &self.extra_hosts {
            normalizer = normalizer.with_extra_host(alias.clone(), target.clone());
        }

        let cache = CacheConfig::default()
            .with_ttl(Duration::from_secs(self.cache_ttl_seconds))
            .with_notfound_ttl(Duration::from_secs(self.notfound_ttl_seconds))
            .with_max_entries(self.max_entries)
            .with_load_timeout(Duration::from_millis(self.lookup_timeout_ms));

        ResolverConfig {
            normalizer,
            cache,
            default_tenant_id: self.default_tenant_id,
            default_tenant_domain: self.default_tenant_domain.clone(),
        }
    }

    /// Interval for the expired-entry purge task; `None` disables it
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.cache_purge_interval_secs > 0)
            .then(|| Duration::from_secs(self.cache_purge_interval_secs))
    }
}

/// Normalization settings alone, for tools that need no tenant source
pub fn normalizer_config_from_env() -> Result<NormalizerConfig, ConfigError> {
    let mut config = NormalizerConfig::default()
        .with_strip_www(parse_var("STRIP_WWW", true)?)
        .with_suffix_reduction(parse_var("SUFFIX_REDUCTION", true)?)
        .with_wildcard_aliases(parse_var("WILDCARD_ALIASES", false)?);
    if let Some(raw) = optional_var("EXTRA_HOSTS") {
        for (alias, target) in parse_extra_hosts(&raw)? {
            config = config.with_extra_host(alias, target);
        }
    }
    Ok(config)
}

/// Non-empty, trimmed variable
fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

/// Parse `alias=target,alias2=target2`
fn parse_extra_hosts(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((alias, target)) if !alias.trim().is_empty() && !target.trim().is_empty() => {
                Ok((alias.trim().to_string(), target.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                name: "EXTRA_HOSTS",
                value: pair.to_string(),
            }),
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
