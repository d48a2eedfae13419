//! Zone loaders
//!
//! On every profile start the session asks a loader for zones that come from
//! somewhere other than the client, such as a file written by the platform
//! integrator. Loaders only hand back zone descriptions; the session appends them
//! after whatever is already present and never lets a loader touch existing zones.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tb_error::{Result, ThermalError};

use crate::constants::limits::MAX_ZONE_STORE_SIZE;
use crate::topology::{CoolingDevice, Sensor, TopologyLimits, Zone};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdevSpec {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub nval: i32,
    #[serde(default)]
    pub critval: i32,
    #[serde(default)]
    pub step: i32,
}

/// A zone described outside the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    #[serde(default)]
    pub psv: i32,
    #[serde(default)]
    pub max: i32,
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
    #[serde(default)]
    pub cdevs: Vec<CdevSpec>,
}

impl ZoneSpec {
    /// Build the zone with all of its sensors and cdevs, or nothing
    pub fn build(&self, limits: &TopologyLimits) -> Result<Zone> {
        let mut zone = Zone::try_new(&self.name, self.psv, self.max, limits)?;
        for s in &self.sensors {
            zone.try_push_sensor(Sensor::try_new(&s.name, &s.path)?, limits.max_sensors_per_zone)?;
        }
        for c in &self.cdevs {
            let cdev = CoolingDevice::try_new(&c.name, &c.path, c.nval, c.critval, c.step)?;
            zone.try_push_cdev(cdev, limits.max_cdevs_per_zone)?;
        }
        Ok(zone)
    }
}

/// External source of zones consulted on profile start
pub trait ZoneLoader: Send {
    /// Zones to append starting at `start_index`
    fn load_zones(&mut self, start_index: usize) -> Result<Vec<ZoneSpec>>;

    fn name(&self) -> &str;
}

/// Loader for deployments where the client describes every zone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopZoneLoader;

impl ZoneLoader for NoopZoneLoader {
    fn load_zones(&mut self, _start_index: usize) -> Result<Vec<ZoneSpec>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// On-disk layout read by [`JsonZoneLoader`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStoreFile {
    #[serde(default)]
    pub zones: Vec<ZoneSpec>,
}

/// Loads zones from a JSON backing store; a missing file yields no zones
#[derive(Debug, Clone)]
pub struct JsonZoneLoader {
    path: PathBuf,
}

impl JsonZoneLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_store(&self) -> Result<ZoneStoreFile> {
        let metadata = fs::metadata(&self.path).map_err(|source| ThermalError::FileRead {
            path: self.path.clone(),
            source,
        })?;
        if metadata.len() > MAX_ZONE_STORE_SIZE {
            return Err(ThermalError::ZoneLoader(format!(
                "{} is {} bytes (max {})",
                self.path.display(),
                metadata.len(),
                MAX_ZONE_STORE_SIZE
            )));
        }

        let content = fs::read_to_string(&self.path).map_err(|source| ThermalError::FileRead {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ZoneLoader for JsonZoneLoader {
    fn load_zones(&mut self, start_index: usize) -> Result<Vec<ZoneSpec>> {
        if !self.path.exists() {
            debug!("Zone store {} not present, nothing to load", self.path.display());
            return Ok(Vec::new());
        }

        let store = self.read_store()?;
        info!(
            "Loaded {} zones from {} (first index {})",
            store.zones.len(),
            self.path.display(),
            start_index
        );
        Ok(store.zones)
    }

    fn name(&self) -> &str {
        "json"
    }
}
