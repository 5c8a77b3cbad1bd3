use std::env;
use std::path::PathBuf;

use chrono::Duration;

use crate::core::error::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_TMDB_URL: &str = "https://api.themoviedb.org/3";

#[derive(Clone, Debug)]
pub struct TmdbConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind: String,
    pub pool_size: u32,
    pub tmdb: Option<TmdbConfig>,
    pub tracked_lists_dir: PathBuf,
    pub watchlist_csv: PathBuf,
    pub reconcile_every: Duration,
}

impl Config {
    /// Reads the process environment. Call after `dotenv` so `.env` values are visible.
    pub fn from_env() -> Result<Config, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| Error::Config("DATABASE_URL must be set".to_string()))?;

        let pool_size = match var("DB_POOL_SIZE") {
            Some(raw) => raw.parse::<u32>()
                .map_err(|_| Error::Config(format!("DB_POOL_SIZE is not a number: {}", raw)))?,
            None => 10,
        };

        let reconcile_secs = match var("RECONCILE_INTERVAL_SECS") {
            Some(raw) => raw.parse::<i64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| Error::Config(format!("RECONCILE_INTERVAL_SECS is invalid: {}", raw)))?,
            None => 300,
        };

        let tmdb = var("TMDB_API_KEY").map(|api_key| TmdbConfig {
            api_key,
            base_url: var("TMDB_BASE_URL").unwrap_or_else(|| DEFAULT_TMDB_URL.to_string()),
        });

        Ok(Config {
            database_url,
            bind: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            pool_size,
            tmdb,
            tracked_lists_dir: var("TRACKED_LISTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tracked-lists")),
            watchlist_csv: var("WATCHLIST_CSV")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("watchlist.csv")),
            reconcile_every: Duration::seconds(reconcile_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = pairs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn requires_database_url() {
        assert!(matches!(config_from(&[]), Err(Error::Config(_))));
        assert!(matches!(config_from(&[("DATABASE_URL", "  ")]), Err(Error::Config(_))));
    }

    #[test]
    fn applies_defaults() {
        let cfg = config_from(&[("DATABASE_URL", "postgres://localhost/watchlist")]).unwrap();
        assert_eq!(cfg.bind, DEFAULT_BIND);
        assert_eq!(cfg.pool_size, 10);
        assert!(cfg.tmdb.is_none());
        assert_eq!(cfg.tracked_lists_dir, PathBuf::from("tracked-lists"));
        assert_eq!(cfg.reconcile_every, Duration::seconds(300));
    }

    #[test]
    fn tmdb_enabled_by_key() {
        let cfg = config_from(&[
            ("DATABASE_URL", "postgres://localhost/watchlist"),
            ("TMDB_API_KEY", "abc"),
        ]).unwrap();
        let tmdb = cfg.tmdb.unwrap();
        assert_eq!(tmdb.api_key, "abc");
        assert_eq!(tmdb.base_url, DEFAULT_TMDB_URL);
    }

    #[test]
    fn rejects_bad_numbers() {
        let res = config_from(&[
            ("DATABASE_URL", "postgres://localhost/watchlist"),
            ("DB_POOL_SIZE", "lots"),
        ]);
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
