//! API Configuration Module
//!
//! Configuration for the HTTP surface: bind address, CORS, logging format,
//! migrations, and the store limits injected into the service. Values are
//! loaded from environment variables with sensible defaults for development.

use std::net::SocketAddr;

use mosaic_core::{ApplicationId, ConfigError, StoreConfig};

// ============================================================================
// LOG FORMAT
// ============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    pub bind_host: String,
    pub port: u16,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Store
    // ========================================================================
    /// Raw default application id, parsed in [`ApiConfig::store_config`].
    pub default_application_id: Option<String>,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub default_search_limit: u32,

    // ========================================================================
    // Operations
    // ========================================================================
    /// Apply pending SQL migrations at start-up.
    pub run_migrations: bool,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            default_application_id: None,
            default_page_size: store.default_page_size,
            max_page_size: store.max_page_size,
            default_search_limit: store.default_search_limit,
            run_migrations: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MOSAIC_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` / `MOSAIC_API_PORT`: Listen port (default: 3000)
    /// - `MOSAIC_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `MOSAIC_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `MOSAIC_DEFAULT_APPLICATION_ID`: Tenant assumed when a request has none
    /// - `MOSAIC_DEFAULT_PAGE_SIZE` / `MOSAIC_MAX_PAGE_SIZE` / `MOSAIC_DEFAULT_SEARCH_LIMIT`
    /// - `MOSAIC_RUN_MIGRATIONS`: "true" to migrate on start-up (default: false)
    /// - `MOSAIC_LOG_FORMAT`: "json" for JSON logs (default: pretty)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults;
    /// set keys that fail to parse are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cors_origins = lookup("MOSAIC_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let port_key = if lookup("PORT").is_some() { "PORT" } else { "MOSAIC_API_PORT" };

        Ok(Self {
            bind_host: lookup("MOSAIC_API_BIND").unwrap_or(defaults.bind_host),
            port: parse_var(&lookup, port_key, defaults.port)?,
            cors_origins,
            cors_max_age_secs: parse_var(&lookup, "MOSAIC_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs)?,
            default_application_id: lookup("MOSAIC_DEFAULT_APPLICATION_ID")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            default_page_size: parse_var(&lookup, "MOSAIC_DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: parse_var(&lookup, "MOSAIC_MAX_PAGE_SIZE", defaults.max_page_size)?,
            default_search_limit: parse_var(
                &lookup,
                "MOSAIC_DEFAULT_SEARCH_LIMIT",
                defaults.default_search_limit,
            )?,
            run_migrations: lookup("MOSAIC_RUN_MIGRATIONS")
                .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(false),
            log_format: lookup("MOSAIC_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
        })
    }

    /// Socket address to listen on.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
            field: "MOSAIC_API_BIND".to_string(),
            value: addr.clone(),
            reason: e.to_string(),
        })
    }

    /// Store limits and the default application, validated.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let default_application = self
            .default_application_id
            .as_deref()
            .map(|raw| {
                raw.parse::<ApplicationId>().map_err(|e| ConfigError::InvalidValue {
                    field: "MOSAIC_DEFAULT_APPLICATION_ID".to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let config = StoreConfig {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            default_search_limit: self.default_search_limit,
            default_application,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern)) || origin_domain == pattern;
                }
            }
            false
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
