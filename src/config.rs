use std::str::FromStr;
use std::time::Duration;

use crate::authz::AuthzMode;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub mode: AuthzMode,
    /// Permission sets with at least this many grants are indexed through the scope trie.
    pub trie_threshold: usize,
    pub resolver_cache_ttl: Duration,
    pub permission_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            mode: AuthzMode::Strict,
            trie_threshold: 1000,
            resolver_cache_ttl: Duration::from_secs(30),
            permission_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let mode = match std::env::var("AUTHZ_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.mode,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            mode,
            trie_threshold: parse_env("AUTHZ_TRIE_THRESHOLD", defaults.trie_threshold)?,
            resolver_cache_ttl: Duration::from_secs(parse_env(
                "AUTHZ_RESOLVER_CACHE_TTL_SECS",
                defaults.resolver_cache_ttl.as_secs(),
            )?),
            permission_cache_ttl: Duration::from_secs(parse_env(
                "AUTHZ_PERMISSION_CACHE_TTL_SECS",
                defaults.permission_cache_ttl.as_secs(),
            )?),
        })
    }

    pub fn database_url(&self) -> Result<&str, AppError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| AppError::configuration("DATABASE_URL not set"))
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}
