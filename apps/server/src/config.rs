use std::collections::HashSet;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use regionwatch::{CycleSettings, MAX_BATCH_SIZE, MONITORING_CYCLE_LOCK, Target};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub cycle: Cycle,
    pub maintenance: Maintenance,
    pub logging: Logging,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared SQLite file; what replicas on one host coordinate through
    Libsql,
    /// Process-local, for development only
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Libsql => f.write_str("libsql"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub backend: StoreBackend,
    pub path: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cycle {
    pub lock_name: String,
    pub lease_ttl_secs: u64,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub probe_timeout_secs: u64,
    pub summary_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Maintenance {
    pub sweep_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/regionwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("regionwatch/config.toml"))
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self { backend: StoreBackend::Libsql, path: "regionwatch.db".into(), pool_size: 4 }
    }
}

impl Default for Cycle {
    fn default() -> Self {
        Self {
            lock_name: MONITORING_CYCLE_LOCK.into(),
            lease_ttl_secs: regionwatch::DEFAULT_LEASE_TTL_SECS,
            interval_secs: 60 * 60,
            initial_delay_secs: 5,
            probe_timeout_secs: regionwatch::DEFAULT_PROBE_TIMEOUT_SECS,
            summary_window_secs: 60 * 60,
        }
    }
}

impl Default for Maintenance {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5 * 60,
            purge_interval_secs: 24 * 60 * 60,
            retention_days: regionwatch::DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Server::default(),
            store: Store::default(),
            cycle: Cycle::default(),
            maintenance: Maintenance::default(),
            logging: Logging::default(),
            targets: Target::default_regions(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_title_1(f, "Store")?;
        write_1(f, "Backend", &self.store.backend)?;
        write_1(f, "Path", &self.store.path)?;
        write_1(f, "Pool Size", &self.store.pool_size)?;
        write_title_1(f, "Cycle")?;
        write_1(f, "Lock Name", &self.cycle.lock_name)?;
        write_1(f, "Lease TTL (s)", &self.cycle.lease_ttl_secs)?;
        write_1(f, "Interval (s)", &self.cycle.interval_secs)?;
        write_1(f, "Initial Delay (s)", &self.cycle.initial_delay_secs)?;
        write_1(f, "Probe Timeout (s)", &self.cycle.probe_timeout_secs)?;
        write_1(f, "Summary Window (s)", &self.cycle.summary_window_secs)?;
        write_title_1(f, "Maintenance")?;
        write_1(f, "Sweep Interval (s)", &self.maintenance.sweep_interval_secs)?;
        write_1(f, "Purge Interval (s)", &self.maintenance.purge_interval_secs)?;
        write_1(f, "Retention (days)", &self.maintenance.retention_days)?;
        write_title_1(f, "Targets")?;
        for target in &self.targets {
            write_1(f, &target.name, &target.address)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/regionwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str).map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Reject configurations the coordination loop cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.targets.is_empty() {
            return Err(Error::Invalid("at least one target is required".into()));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(Error::Invalid("target names must not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(Error::Invalid(format!("duplicate target `{}`", target.name)));
            }
            if !matches!(target.address.scheme(), "http" | "https") {
                return Err(Error::Invalid(format!("target `{}` must use http or https", target.name)));
            }
        }

        let durations = [
            ("cycle.lease_ttl_secs", self.cycle.lease_ttl_secs),
            ("cycle.interval_secs", self.cycle.interval_secs),
            ("cycle.probe_timeout_secs", self.cycle.probe_timeout_secs),
            ("cycle.summary_window_secs", self.cycle.summary_window_secs),
            ("maintenance.sweep_interval_secs", self.maintenance.sweep_interval_secs),
            ("maintenance.purge_interval_secs", self.maintenance.purge_interval_secs),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::Invalid(format!("{key} must be greater than zero")));
        }

        if self.maintenance.retention_days <= 0 {
            return Err(Error::Invalid("maintenance.retention_days must be greater than zero".into()));
        }
        if self.cycle.lock_name.trim().is_empty() {
            return Err(Error::Invalid("cycle.lock_name must not be empty".into()));
        }
        if self.store.pool_size == 0 {
            return Err(Error::Invalid("store.pool_size must be greater than zero".into()));
        }

        Ok(())
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            lock_name: self.cycle.lock_name.clone(),
            lease_ttl: Duration::from_secs(self.cycle.lease_ttl_secs),
            probe_timeout: Duration::from_secs(self.cycle.probe_timeout_secs),
            targets: self.targets.clone().into(),
            summary_window: Duration::from_secs(self.cycle.summary_window_secs),
            batch_limit: MAX_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::from_config(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config.targets.len(), 6);
        assert_eq!(config.cycle.lock_name, "monitoring-cycle");

        // The written file reads back to the same values
        let again = Config::from_config(Some(&path)).unwrap();
        assert_eq!(again.targets, config.targets);
        assert_eq!(again.server.port, 8080);
    }

    #[test]
    fn test_path_gets_toml_extension() {
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/regionwatch")), path::PathBuf::from("/tmp/regionwatch.toml"));
        assert_eq!(normalize_toml_path(path::Path::new("/tmp/a.toml")), path::PathBuf::from("/tmp/a.toml"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let raw = r#"
            [server]
            port = 9000

            [store]
            backend = "memory"

            [[targets]]
            name = "local"
            address = "http://127.0.0.1:3000/status"
        "#;

        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.cycle.lease_ttl_secs, 600);
        assert_eq!(config.targets.len(), 1);
        assert!(config.validate().is_ok());

        let settings = config.cycle_settings();
        assert_eq!(settings.lease_ttl, Duration::from_secs(600));
        assert_eq!(settings.targets[0].name, "local");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.targets.push(config.targets[0].clone());
        assert!(matches!(config.validate(), Err(Error::Invalid(msg)) if msg.contains("duplicate")));

        let mut config = Config::default();
        config.targets[0].address = url::Url::parse("ftp://example.com/").unwrap();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.targets.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cycle.interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Invalid(msg)) if msg.contains("cycle.interval_secs")));

        assert!(Config::default().validate().is_ok());
    }
}
