//! Daemon Configuration
//!
//! Settings stored as JSON, by default in /etc/thermbind/daemon.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tb_error::{Result, ThermalError};

use crate::constants::{ipc, paths};
use crate::loader::{JsonZoneLoader, NoopZoneLoader, ZoneLoader};
use crate::topology::TopologyLimits;

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// tracing filter, e.g. "info" or "tb_core=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON backing store consulted on every profile start
    #[serde(default)]
    pub zone_store: Option<PathBuf>,

    #[serde(default)]
    pub limits: TopologyLimits,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_socket_path() -> String {
    paths::DEFAULT_SOCKET_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> usize {
    ipc::MAX_CONNECTIONS
}

fn default_read_timeout_ms() -> u64 {
    ipc::READ_TIMEOUT_MS
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
            zone_store: None,
            limits: TopologyLimits::default(),
            max_connections: default_max_connections(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if !Path::new(&self.socket_path).is_absolute() {
            return Err(ThermalError::config(format!(
                "socket_path must be absolute: {}",
                self.socket_path
            )));
        }
        self.limits.validate()?;
        if self.max_connections == 0 {
            return Err(ThermalError::config("max_connections must be at least 1"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ThermalError::config("read_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Loader matching the configured backing store
    pub fn zone_loader(&self) -> Box<dyn ZoneLoader> {
        match &self.zone_store {
            Some(path) => Box::new(JsonZoneLoader::new(path)),
            None => Box::new(NoopZoneLoader),
        }
    }
}

/// Where the config is read from: $THERMBIND_CONFIG, then the system file,
/// then the user's config directory
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(paths::CONFIG_ENV) {
        return PathBuf::from(path);
    }

    let system = Path::new(paths::CONFIG_DIR).join(paths::CONFIG_FILE);
    if system.exists() {
        return system;
    }

    dirs::config_dir()
        .map(|d| d.join("thermbind").join(paths::CONFIG_FILE))
        .filter(|p| p.exists())
        .unwrap_or(system)
}

pub fn load_config() -> Result<DaemonConfig> {
    load_config_from(&get_config_path())
}

/// Load and validate; a missing file yields the defaults
pub fn load_config_from(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ThermalError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let config: DaemonConfig = serde_json::from_str(&content).map_err(|e| {
        ThermalError::config(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    config.validate()?;
    Ok(config)
}

/// Write atomically: temp file then rename
pub fn save_config_to(config: &DaemonConfig, path: &Path) -> Result<()> {
    use std::io::Write;

    config.validate()?;
    let json = serde_json::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("daemon.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_partial_file_is_filled_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");
        fs::write(
            &path,
            r#"{"socket_path":"/tmp/tb.sock","limits":{"max_sensors_per_zone":4}}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.socket_path, "/tmp/tb.sock");
        assert_eq!(config.limits.max_sensors_per_zone, 4);
        assert_eq!(config.limits.max_cdevs_per_zone, TopologyLimits::default().max_cdevs_per_zone);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");
        fs::write(&path, r#"{"socket_path":"relative.sock"}"#).unwrap();
        assert!(matches!(load_config_from(&path), Err(ThermalError::Config(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(ThermalError::Config(_))));
    }

    #[test]
    fn test_limits_above_ceiling_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.json");

        fs::write(&path, r#"{"limits":{"max_sensors_per_zone":18446744073709551615}}"#).unwrap();
        assert!(matches!(load_config_from(&path), Err(ThermalError::Config(_))));

        fs::write(&path, r#"{"limits":{"max_cdevs_per_zone":10000000}}"#).unwrap();
        assert!(matches!(load_config_from(&path), Err(ThermalError::Config(_))));

        fs::write(&path, r#"{"limits":{"max_zones":0}}"#).unwrap();
        assert!(matches!(load_config_from(&path), Err(ThermalError::Config(_))));

        fs::write(&path, r#"{"limits":{"max_zones":1024,"max_sensors_per_zone":256}}"#).unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.limits.max_zones, 1024);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("daemon.json");
        let config = DaemonConfig {
            zone_store: Some(dir.path().join("zones.json")),
            max_connections: 2,
            ..DaemonConfig::default()
        };

        save_config_to(&config, &path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn test_zone_loader_selection() {
        assert_eq!(DaemonConfig::default().zone_loader().name(), "none");
        let config = DaemonConfig {
            zone_store: Some(PathBuf::from("/etc/thermbind/zones.json")),
            ..DaemonConfig::default()
        };
        assert_eq!(config.zone_loader().name(), "json");
    }
}
