//! Client configuration.
//!
//! Layers, highest priority first:
//! 1. CLI flags (applied by the binary)
//! 2. Environment: `TASKSYNC_API_URL`, `TASKSYNC_TIMEOUT_SECS`, `TASKSYNC_DATA_DIR`
//! 3. YAML file, `<config dir>/tasksync/config.yaml` unless `--config` is given
//! 4. Compiled defaults
//!
//! A missing default file is fine. A missing explicit file is an error.

use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_URL: &str = "TASKSYNC_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "TASKSYNC_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "TASKSYNC_DATA_DIR";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub timeout: Duration,
    pub data_dir: PathBuf,
}

/// On-disk shape; every field optional so a file can override just one
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("tasksync"))
            .unwrap_or_else(|| PathBuf::from(".tasksync"));

        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            data_dir,
        }
    }
}

impl ClientConfig {
    /// Defaults, then the config file, then the process environment
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(eyre!("Config file not found: {}", path.display()));
                }
                config.apply_file(path)?;
            }
            None => {
                if let Some(path) = default_config_path() {
                    if path.exists() {
                        config.apply_file(&path)?;
                    }
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        debug!(file = ?path, "Reading config file");
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(url) = file.api_base_url {
            self.api_base_url = url;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        Ok(())
    }

    /// Apply overrides from `lookup`, normally the process environment
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", ENV_TIMEOUT_SECS))?;
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join("students.db")
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tasksync").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.roster_path().ends_with("students.db"));
        assert!(config.prefs_path().ends_with("preferences.json"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let result = ClientConfig::load(Some(&temp.path().join("nope.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "api_base_url: https://tasks.example.com/v1/\ntimeout_secs: 5\n").unwrap();

        let mut config = ClientConfig::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.api_base_url, "https://tasks.example.com/v1/");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.data_dir, ClientConfig::default().data_dir);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "api_url: typo\n").unwrap();

        let mut config = ClientConfig::default();
        assert!(config.apply_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://10.0.0.2:8080/"),
            (ENV_TIMEOUT_SECS, " 12 "),
            (ENV_DATA_DIR, "/tmp/tasksync-test"),
        ]);

        let mut config = ClientConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.2:8080/");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tasksync-test"));
    }

    #[test]
    fn test_env_bad_timeout() {
        let mut config = ClientConfig::default();
        let result = config.apply_env(|k| (k == ENV_TIMEOUT_SECS).then(|| "soon".to_string()));
        assert!(result.is_err());
    }
}
