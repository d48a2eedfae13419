//! thermbind Core Library
//!
//! Assembles a thermal topology (zones, sensors, cooling devices) from the
//! ordered stream of calls a platform client makes over IPC.
//!
//! # Module Structure
//!
//! - `topology` - the in-memory model and the session cursors
//! - `assembly` - the ZONE/SENSOR/CDEV/THROTTLE state machine
//! - `session` - PROFILE_START handling and the zone loader hook
//! - `dispatch` - the per-transaction entry point for the host runtime
//! - `loader` - external zone sources
//! - `config` - daemon settings
//! - `client` - the client proxy
//!
//! # Example
//!
//! ```
//! use tb_core::{CallerIdentity, Session, ThermalApiService};
//! use tb_protocol::{ProfileStartMessage, Request, ZoneMessage};
//!
//! let service = ThermalApiService::new(Session::default());
//! let caller = CallerIdentity::current();
//! assert_eq!(service.call(&Request::ProfileStart(ProfileStartMessage::new(1)), caller), 0);
//! assert_eq!(service.call(&Request::Zone(ZoneMessage::new("CPU0", 80, 95)), caller), 0);
//! assert_eq!(service.snapshot().zones.len(), 1);
//! ```

pub mod assembly;
pub mod client;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod loader;
pub mod session;
pub mod topology;

pub use assembly::{Assembler, AssemblyState};
pub use client::ThermalApiClient;
pub use config::{get_config_path, load_config, load_config_from, save_config_to, DaemonConfig};
pub use dispatch::{CallerIdentity, ThermalApiService, TopologySnapshot};
pub use loader::{
    CdevSpec, JsonZoneLoader, NoopZoneLoader, SensorSpec, ZoneLoader, ZoneSpec, ZoneStoreFile,
};
pub use session::{fetch_external_zones, Session, SharedZoneLoader};
pub use topology::{
    CoolingDevice, Sensor, SessionCursors, TopologyLimits, TopologyStore, Zone,
};

// Re-export error types
pub use tb_error::{Result, ThermalError};
