use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Environment-driven configuration shared by every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub data_dir: PathBuf,
    pub lease_duration: Duration,
    pub soft_grace: Duration,
    pub reaper_interval: Duration,
    pub hostname: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "data/taskhub.db".to_string(),
            data_dir: PathBuf::from("data"),
            lease_duration: Duration::from_secs(60),
            soft_grace: Duration::from_secs(10),
            reaper_interval: Duration::from_secs(60),
            hostname: "localhost".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_path: env::var("TASKHUB_DB_PATH").unwrap_or(defaults.db_path),
            data_dir: env::var("TASKHUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lease_duration: seconds_var("TASKHUB_LEASE_SECONDS", defaults.lease_duration)?,
            soft_grace: seconds_var("TASKHUB_SOFT_GRACE_SECONDS", defaults.soft_grace)?,
            reaper_interval: seconds_var(
                "TASKHUB_REAPER_INTERVAL_SECONDS",
                defaults.reaper_interval,
            )?,
            hostname: env::var("HOSTNAME").unwrap_or(defaults.hostname),
        })
    }
}

fn seconds_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{name} must be a number of seconds, got {raw:?}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, "data/taskhub.db");
        assert_eq!(config.lease_duration, Duration::from_secs(60));
        assert_eq!(config.soft_grace, Duration::from_secs(10));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
    }
}
