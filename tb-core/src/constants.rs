//! Constants and configuration values for thermbind
//!
//! Centralizes paths, capacities and timeouts shared by the library and the daemon.

use std::time::Duration;

/// Filesystem locations and environment variable names
pub mod paths {
    /// System configuration directory
    pub const CONFIG_DIR: &str = "/etc/thermbind";

    /// Daemon configuration file inside the config directory
    pub const CONFIG_FILE: &str = "daemon.json";

    /// Backing store read by the JSON zone loader
    pub const ZONE_STORE_FILE: &str = "zones.json";

    /// Default socket the daemon listens on
    pub const DEFAULT_SOCKET_PATH: &str = "/run/thermbind.sock";

    /// Overrides the config file location
    pub const CONFIG_ENV: &str = "THERMBIND_CONFIG";

    /// Overrides the log filter
    pub const LOG_ENV: &str = "THERMBIND_LOG";
}

/// Topology capacities
pub mod limits {
    pub const MAX_ZONES: usize = 64;

    pub const MAX_SENSORS_PER_ZONE: usize = 10;

    pub const MAX_CDEVS_PER_ZONE: usize = 10;

    /// Largest values a config may set; every zone reserves its slots up front
    pub const ZONES_CEILING: usize = 1024;

    pub const SENSORS_PER_ZONE_CEILING: usize = 256;

    pub const CDEVS_PER_ZONE_CEILING: usize = 256;

    /// Largest zone store file the loader will read (1 MiB)
    pub const MAX_ZONE_STORE_SIZE: u64 = 1024 * 1024;
}

/// IPC timing and connection limits
pub mod ipc {
    use super::Duration;

    pub const MAX_CONNECTIONS: usize = 16;

    pub const READ_TIMEOUT_MS: u64 = 30_000;

    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Client side socket timeout
    pub const CLIENT_TIMEOUT: Duration = Duration::from_millis(5000);
}
