use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{OverlapRule, Strategy};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("both VACANCY_TLS_CERT and VACANCY_TLS_KEY must be set, or neither")]
    PartialTls,
}

/// Server settings, read once from `VACANCY_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub strategy: Strategy,
    pub overlap: OverlapRule,
    pub query_timeout: Duration,
    pub seed_file: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "vacancy".into(),
            max_connections: 256,
            compact_threshold: 1000,
            strategy: Strategy::default(),
            overlap: OverlapRule::default(),
            query_timeout: Duration::from_millis(5000),
            seed_file: None,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let path = |var: &str| lookup(var).filter(|s| !s.is_empty()).map(PathBuf::from);

        let config = Self {
            port: parsed(&lookup, "VACANCY_PORT")?.unwrap_or(defaults.port),
            bind: lookup("VACANCY_BIND").unwrap_or(defaults.bind),
            data_dir: path("VACANCY_DATA_DIR").unwrap_or(defaults.data_dir),
            password: lookup("VACANCY_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "VACANCY_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "VACANCY_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            strategy: parsed(&lookup, "VACANCY_STRATEGY")?.unwrap_or(defaults.strategy),
            overlap: parsed(&lookup, "VACANCY_OVERLAP_RULE")?.unwrap_or(defaults.overlap),
            query_timeout: parsed(&lookup, "VACANCY_QUERY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            seed_file: path("VACANCY_SEED_FILE"),
            tls_cert: path("VACANCY_TLS_CERT"),
            tls_key: path("VACANCY_TLS_KEY"),
            metrics_port: parsed(&lookup, "VACANCY_METRICS_PORT")?,
        };

        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("catalog.wal")
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
