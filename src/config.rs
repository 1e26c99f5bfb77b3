//! Service configuration.
//!
//! Built once at startup and shared read-only for the lifetime of the process.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Earth Search v1 item-search endpoint.
pub const DEFAULT_STAC_API_URL: &str = "https://earth-search.aws.element84.com/v1/search";

/// Sentinel-2 level-2A surface reflectance, which carries the `visual` TCI asset.
pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";

pub const DEFAULT_CLOUD_COVER: u8 = 20;
pub const DEFAULT_WINDOW_DAYS: u32 = 15;
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Immutable service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind host for the HTTP server
    pub host: String,
    /// Bind port for the HTTP server
    pub port: u16,
    /// Full URL of the catalog's POST search endpoint
    pub stac_api_url: String,
    /// Catalog collection searched for scenes
    pub collection: String,
    /// Base URL embedded in generated tile URL templates
    pub public_base_url: String,
    /// Cloud-cover ceiling used when the request omits one
    pub default_cloud_cover: u8,
    /// Half-width of the date window in days
    pub window_radius_days: u32,
    /// Timeout for a single catalog request
    pub catalog_timeout: Duration,
    /// Timeout for a single raster range request
    pub raster_timeout: Duration,
    /// Accept filesystem paths as tile sources (development and tests only)
    pub allow_local_sources: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            stac_api_url: DEFAULT_STAC_API_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            default_cloud_cover: DEFAULT_CLOUD_COVER,
            window_radius_days: DEFAULT_WINDOW_DAYS,
            catalog_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            raster_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            allow_local_sources: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    /// - `HOST` (default: 0.0.0.0)
    /// - `PORT` (default: 8080)
    /// - `STAC_API_URL` (default: Earth Search v1 search endpoint)
    /// - `STAC_COLLECTION` (default: sentinel-2-l2a)
    /// - `PUBLIC_BASE_URL` (default: `http://localhost:<PORT>`)
    /// - `DEFAULT_CLOUD_COVER` (default: 20, must be 1..=100)
    /// - `DATE_WINDOW_DAYS` (default: 15)
    /// - `CATALOG_TIMEOUT_SECS` / `RASTER_TIMEOUT_SECS` (default: 8, must be > 0)
    /// - `ALLOW_LOCAL_SOURCES` (default: false)
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT", defaults.port, "must be a port number")?;
        let stac_api_url = lookup("STAC_API_URL").unwrap_or(defaults.stac_api_url);
        let collection = lookup("STAC_COLLECTION").unwrap_or(defaults.collection);
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let default_cloud_cover = parse_var(
            &lookup,
            "DEFAULT_CLOUD_COVER",
            defaults.default_cloud_cover,
            "must be an integer between 1 and 100",
        )?;
        if !(1..=100).contains(&default_cloud_cover) {
            return Err(ConfigError::InvalidValue {
                key: "DEFAULT_CLOUD_COVER",
                value: default_cloud_cover.to_string(),
                reason: "must be an integer between 1 and 100",
            });
        }

        let window_radius_days = parse_var(
            &lookup,
            "DATE_WINDOW_DAYS",
            defaults.window_radius_days,
            "must be a non-negative integer",
        )?;

        let catalog_timeout = parse_timeout(&lookup, "CATALOG_TIMEOUT_SECS")?;
        let raster_timeout = parse_timeout(&lookup, "RASTER_TIMEOUT_SECS")?;

        let allow_local_sources = parse_var(
            &lookup,
            "ALLOW_LOCAL_SOURCES",
            defaults.allow_local_sources,
            "must be true or false",
        )?;

        Ok(Self {
            host,
            port,
            stac_api_url,
            collection,
            public_base_url,
            default_cloud_cover,
            window_radius_days,
            catalog_timeout,
            raster_timeout,
            allow_local_sources,
        })
    }

    /// Socket address string the server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T, reason: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
            reason,
        }),
    }
}

fn parse_timeout<F>(lookup: &F, key: &'static str) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_var(lookup, key, DEFAULT_TIMEOUT_SECS, "must be a positive number of seconds")?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: secs.to_string(),
            reason: "must be a positive number of seconds",
        });
    }
    Ok(Duration::from_secs(secs))
}
