use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

use crate::cache::{budget::format_bytes, parse_size};

/// Configuración del jukebox, leída de variables de entorno (y `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    // Caché
    pub cache_dir: PathBuf,
    pub metadata_file: String,
    pub limit_file: String,
    pub default_cache_limit: u64,

    // Reproducción
    pub inactivity_timeout: Duration,
    pub default_volume: f32,

    // Worker de descarga
    pub fetch_worker: Vec<String>,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            // Caché
            cache_dir: var("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            metadata_file: var("CACHE_METADATA_FILE").unwrap_or(defaults.metadata_file),
            limit_file: var("CACHE_LIMIT_FILE").unwrap_or(defaults.limit_file),
            default_cache_limit: match var("DEFAULT_CACHE_LIMIT") {
                Some(value) => parse_size(&value).context("DEFAULT_CACHE_LIMIT")?,
                None => defaults.default_cache_limit,
            },

            // Reproducción
            inactivity_timeout: match var("INACTIVITY_TIMEOUT") {
                Some(value) => parse_duration(&value).context("INACTIVITY_TIMEOUT")?,
                None => defaults.inactivity_timeout,
            },
            default_volume: match var("DEFAULT_VOLUME") {
                Some(value) => value.trim().parse().context("DEFAULT_VOLUME")?,
                None => defaults.default_volume,
            },

            // Worker
            fetch_worker: var("FETCH_WORKER")
                .map(|value| value.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.fetch_worker),
            fetch_timeout: match var("FETCH_TIMEOUT") {
                Some(value) => parse_duration(&value).context("FETCH_TIMEOUT")?,
                None => defaults.fetch_timeout,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - The inactivity and fetch timeouts must be non-zero
    /// - The worker command must name a program
    /// - Metadata and limit files must be distinct plain file names
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.inactivity_timeout.is_zero() {
            anyhow::bail!("Inactivity timeout must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            anyhow::bail!("Fetch timeout must be greater than 0");
        }

        if self.fetch_worker.is_empty() {
            anyhow::bail!("FETCH_WORKER must name the worker program");
        }

        for name in [&self.metadata_file, &self.limit_file] {
            if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
                anyhow::bail!("Cache bookkeeping files must be plain names, got: {}", name);
            }
        }
        if self.metadata_file == self.limit_file {
            anyhow::bail!("Metadata and limit files must differ");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache: {} ({}, {}), default limit {}\n  \
            Playback: {}% vol, inactivity {}\n  \
            Worker: `{}` (timeout {})",
            self.cache_dir.display(),
            self.metadata_file,
            self.limit_file,
            format_bytes(self.default_cache_limit),
            (self.default_volume * 100.0) as u32,
            humantime::format_duration(self.inactivity_timeout),
            self.fetch_worker.join(" "),
            humantime::format_duration(self.fetch_timeout),
        )
    }
}

/// Acepta `300` (segundos) o formatos de humantime como `5m` o `1h 30m`.
fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    Ok(humantime::parse_duration(value)?)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: "cache".into(),
            metadata_file: "metadata.json".to_string(),
            limit_file: "cache_limit.txt".to_string(),
            default_cache_limit: 5 * 1024 * 1024 * 1024, // 5GB

            inactivity_timeout: Duration::from_secs(300), // 5 minutos
            default_volume: 0.5,

            fetch_worker: vec!["python".to_string(), "worker.py".to_string()],
            fetch_timeout: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.default_cache_limit, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.inactivity_timeout, Duration::from_secs(300));
        assert_eq!(config.metadata_file, "metadata.json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = config_from(&[
            ("CACHE_DIR", "/tmp/jukebox"),
            ("DEFAULT_CACHE_LIMIT", "500MB"),
            ("INACTIVITY_TIMEOUT", "2m"),
            ("FETCH_TIMEOUT", "45"),
            ("FETCH_WORKER", "python3 scripts/worker.py --quiet"),
            ("DEFAULT_VOLUME", "1.2"),
        ])
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/jukebox"));
        assert_eq!(config.default_cache_limit, 500 * 1024 * 1024);
        assert_eq!(config.inactivity_timeout, Duration::from_secs(120));
        assert_eq!(config.fetch_timeout, Duration::from_secs(45));
        assert_eq!(config.fetch_worker, vec!["python3", "scripts/worker.py", "--quiet"]);
        assert_eq!(config.default_volume, 1.2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(config_from(&[("DEFAULT_CACHE_LIMIT", "lots")]).is_err());
        assert!(config_from(&[("INACTIVITY_TIMEOUT", "soon")]).is_err());

        let loud = config_from(&[("DEFAULT_VOLUME", "3.0")]).unwrap();
        assert!(loud.validate().is_err());

        let same = config_from(&[("CACHE_LIMIT_FILE", "metadata.json")]).unwrap();
        assert!(same.validate().is_err());
    }
}
