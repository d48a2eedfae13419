//! Topology Store
//!
//! The in-memory model the thermal daemon consumes: an ordered list of zones,
//! each with bounded lists of sensors and cooling devices. Every record is built
//! into a temporary with fallible reservations and only moved into the store once
//! all of its fields are owned, so a failed append never leaves a half-filled record.

use serde::{Deserialize, Serialize};

use tb_error::{RecordKind, Result, ThermalError};

use crate::constants::limits;

/// Capacities of the bounded sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyLimits {
    pub max_zones: usize,
    pub max_sensors_per_zone: usize,
    pub max_cdevs_per_zone: usize,
}

impl Default for TopologyLimits {
    fn default() -> Self {
        Self {
            max_zones: limits::MAX_ZONES,
            max_sensors_per_zone: limits::MAX_SENSORS_PER_ZONE,
            max_cdevs_per_zone: limits::MAX_CDEVS_PER_ZONE,
        }
    }
}

impl TopologyLimits {
    /// Reject limits a config file must not set: no zones at all, or capacities
    /// whose up-front slot reservation would be unreasonably large
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("max_zones", self.max_zones, 1, limits::ZONES_CEILING),
            ("max_sensors_per_zone", self.max_sensors_per_zone, 0, limits::SENSORS_PER_ZONE_CEILING),
            ("max_cdevs_per_zone", self.max_cdevs_per_zone, 0, limits::CDEVS_PER_ZONE_CEILING),
        ];
        for (field, value, min, max) in checks {
            if value < min || value > max {
                return Err(ThermalError::config(format!(
                    "limits.{} must be within {}..={}, got {}",
                    field, min, max, value
                )));
            }
        }
        Ok(())
    }
}

/// Copy a borrowed field into storage owned by the record
fn owned_copy(value: &str) -> Result<String> {
    let mut out = String::new();
    out.try_reserve_exact(value.len())?;
    out.push_str(value);
    Ok(out)
}

/// Named temperature source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub path: String,
}

impl Sensor {
    pub fn try_new(name: &str, path: &str) -> Result<Self> {
        Ok(Self {
            name: owned_copy(name)?,
            path: owned_copy(path)?,
        })
    }
}

/// Named actuator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoolingDevice {
    pub name: String,
    pub path: String,
    pub nval: i32,
    pub critval: i32,
    pub step: i32,
}

impl CoolingDevice {
    pub fn try_new(name: &str, path: &str, nval: i32, critval: i32, step: i32) -> Result<Self> {
        Ok(Self {
            name: owned_copy(name)?,
            path: owned_copy(path)?,
            nval,
            critval,
            step,
        })
    }
}

/// Thermal zone with its sensors and cooling devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub psv: i32,
    pub max: i32,
    sensors: Vec<Sensor>,
    cdevs: Vec<CoolingDevice>,
}

impl Zone {
    /// Build an empty zone with its sensor and cdev slots reserved up front.
    /// Fails with `AllocError` when the slots cannot be reserved.
    pub fn try_new(name: &str, psv: i32, max: i32, limits: &TopologyLimits) -> Result<Self> {
        let mut sensors = Vec::new();
        sensors.try_reserve_exact(limits.max_sensors_per_zone)?;
        let mut cdevs = Vec::new();
        cdevs.try_reserve_exact(limits.max_cdevs_per_zone)?;

        Ok(Self {
            name: owned_copy(name)?,
            psv,
            max,
            sensors,
            cdevs,
        })
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn cdevs(&self) -> &[CoolingDevice] {
        &self.cdevs
    }

    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    pub fn num_cdevs(&self) -> usize {
        self.cdevs.len()
    }

    pub(crate) fn try_push_sensor(&mut self, sensor: Sensor, limit: usize) -> Result<usize> {
        if self.sensors.len() >= limit {
            return Err(ThermalError::CapacityExceeded { kind: RecordKind::Sensor, limit });
        }
        self.sensors.try_reserve(1)?;
        self.sensors.push(sensor);
        Ok(self.sensors.len() - 1)
    }

    pub(crate) fn try_push_cdev(&mut self, cdev: CoolingDevice, limit: usize) -> Result<usize> {
        if self.cdevs.len() >= limit {
            return Err(ThermalError::CapacityExceeded { kind: RecordKind::CoolingDevice, limit });
        }
        self.cdevs.try_reserve(1)?;
        self.cdevs.push(cdev);
        Ok(self.cdevs.len() - 1)
    }
}

/// Ordered zones accumulated within one construction session
#[derive(Debug, Clone, Default)]
pub struct TopologyStore {
    zones: Vec<Zone>,
    limits: TopologyLimits,
}

impl TopologyStore {
    pub fn new(limits: TopologyLimits) -> Self {
        Self { zones: Vec::new(), limits }
    }

    pub fn limits(&self) -> &TopologyLimits {
        &self.limits
    }

    /// Drop every zone and the strings they own
    pub fn reset(&mut self) {
        while self.pop_zone().is_some() {}
    }

    pub fn append_zone(&mut self, name: &str, psv: i32, max: i32) -> Result<usize> {
        let zone = Zone::try_new(name, psv, max, &self.limits)?;
        self.push_zone(zone)
    }

    /// Move a fully built zone into the store
    pub fn push_zone(&mut self, zone: Zone) -> Result<usize> {
        if self.zones.len() >= self.limits.max_zones {
            return Err(ThermalError::CapacityExceeded {
                kind: RecordKind::Zone,
                limit: self.limits.max_zones,
            });
        }
        self.zones.try_reserve(1)?;
        self.zones.push(zone);
        Ok(self.zones.len() - 1)
    }

    pub fn append_sensor(&mut self, zone_idx: usize, name: &str, path: &str) -> Result<usize> {
        let limit = self.limits.max_sensors_per_zone;
        let zone = self.zones.get_mut(zone_idx).ok_or(ThermalError::NoSuchZone(zone_idx))?;
        if zone.num_sensors() >= limit {
            return Err(ThermalError::CapacityExceeded { kind: RecordKind::Sensor, limit });
        }
        let sensor = Sensor::try_new(name, path)?;
        zone.try_push_sensor(sensor, limit)
    }

    pub fn append_cdev(
        &mut self,
        zone_idx: usize,
        name: &str,
        path: &str,
        nval: i32,
        critval: i32,
        step: i32,
    ) -> Result<usize> {
        let limit = self.limits.max_cdevs_per_zone;
        let zone = self.zones.get_mut(zone_idx).ok_or(ThermalError::NoSuchZone(zone_idx))?;
        if zone.num_cdevs() >= limit {
            return Err(ThermalError::CapacityExceeded { kind: RecordKind::CoolingDevice, limit });
        }
        let cdev = CoolingDevice::try_new(name, path, nval, critval, step)?;
        zone.try_push_cdev(cdev, limit)
    }

    pub fn pop_zone(&mut self) -> Option<Zone> {
        self.zones.pop()
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, idx: usize) -> Option<&Zone> {
        self.zones.get(idx)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Which zone and which slots of it the next message attaches to.
/// `None` is the "none yet" sentinel, reported as -1 on the wire and in logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursors {
    pub zone: Option<usize>,
    pub sensor: Option<usize>,
    pub cdev: Option<usize>,
}

/// Index a cursor advances to
pub fn next_slot(cursor: Option<usize>) -> usize {
    cursor.map_or(0, |c| c + 1)
}

fn raw(cursor: Option<usize>) -> i64 {
    cursor.map_or(-1, |c| c as i64)
}

impl SessionCursors {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Point every cursor at the last record present in `store`
    pub fn sync_to(&mut self, store: &TopologyStore) {
        self.zone = store.len().checked_sub(1);
        let current = self.zone.and_then(|z| store.zone(z));
        self.sensor = current.and_then(|z| z.num_sensors().checked_sub(1));
        self.cdev = current.and_then(|z| z.num_cdevs().checked_sub(1));
    }

    /// Check the cursor/count invariants against `store`
    pub fn is_consistent_with(&self, store: &TopologyStore) -> bool {
        let mut expected = SessionCursors::default();
        expected.sync_to(store);
        *self == expected
    }

    /// (zone, sensor, cdev) with -1 for the sentinel
    pub fn as_raw(&self) -> (i64, i64, i64) {
        (raw(self.zone), raw(self.sensor), raw(self.cdev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> TopologyLimits {
        TopologyLimits { max_zones: 2, max_sensors_per_zone: 2, max_cdevs_per_zone: 1 }
    }

    #[test]
    fn test_append_and_read_back() {
        let mut store = TopologyStore::default();
        assert_eq!(store.append_zone("CPU0", 80, 95).unwrap(), 0);
        assert_eq!(store.append_sensor(0, "TC0", "/s0").unwrap(), 0);
        assert_eq!(store.append_cdev(0, "FN0", "/c0", 0, 1, 1).unwrap(), 0);

        let zone = store.zone(0).unwrap();
        assert_eq!(zone.name, "CPU0");
        assert_eq!((zone.psv, zone.max), (80, 95));
        assert_eq!(zone.sensors()[0], Sensor { name: "TC0".into(), path: "/s0".into() });
        assert_eq!(zone.cdevs()[0].critval, 1);
        assert_eq!(zone.num_sensors(), 1);
        assert_eq!(zone.num_cdevs(), 1);
    }

    #[test]
    fn test_append_to_missing_zone() {
        let mut store = TopologyStore::default();
        assert!(matches!(
            store.append_sensor(0, "s", "/p"),
            Err(ThermalError::NoSuchZone(0))
        ));
        assert!(matches!(
            store.append_cdev(3, "c", "/p", 0, 0, 0),
            Err(ThermalError::NoSuchZone(3))
        ));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut store = TopologyStore::new(small_limits());
        store.append_zone("A", 0, 0).unwrap();
        store.append_zone("B", 0, 0).unwrap();
        assert!(matches!(
            store.append_zone("C", 0, 0),
            Err(ThermalError::CapacityExceeded { kind: RecordKind::Zone, limit: 2 })
        ));

        store.append_sensor(1, "s0", "/p0").unwrap();
        store.append_sensor(1, "s1", "/p1").unwrap();
        assert!(matches!(
            store.append_sensor(1, "s2", "/p2"),
            Err(ThermalError::CapacityExceeded { kind: RecordKind::Sensor, .. })
        ));
        assert_eq!(store.zone(1).unwrap().num_sensors(), 2);

        store.append_cdev(1, "c0", "/c0", 1, 2, 3).unwrap();
        assert!(store.append_cdev(1, "c1", "/c1", 1, 2, 3).is_err());
        assert_eq!(store.zone(1).unwrap().num_cdevs(), 1);
    }

    #[test]
    fn test_reset_empties_store() {
        let mut store = TopologyStore::default();
        store.append_zone("A", 10, 20).unwrap();
        store.append_zone("B", 30, 40).unwrap();
        store.reset();
        assert!(store.is_empty());
        assert!(store.pop_zone().is_none());
    }

    #[test]
    fn test_strings_are_owned_at_exact_length() {
        let mut store = TopologyStore::default();
        let name = String::from("CPU0");
        store.append_zone(&name[..3], 0, 0).unwrap();
        drop(name);
        assert_eq!(store.zone(0).unwrap().name, "CPU");
        assert_eq!(store.zone(0).unwrap().name.len(), 3);
    }

    #[test]
    fn test_cursor_sync() {
        let mut store = TopologyStore::default();
        let mut cursors = SessionCursors::default();
        assert_eq!(cursors.as_raw(), (-1, -1, -1));
        assert!(cursors.is_consistent_with(&store));

        store.append_zone("A", 0, 0).unwrap();
        store.append_zone("B", 0, 0).unwrap();
        store.append_sensor(1, "s", "/p").unwrap();
        cursors.sync_to(&store);
        assert_eq!(cursors, SessionCursors { zone: Some(1), sensor: Some(0), cdev: None });
        assert!(cursors.is_consistent_with(&store));

        cursors.reset();
        assert!(!cursors.is_consistent_with(&store));
    }

    #[test]
    fn test_next_slot() {
        assert_eq!(next_slot(None), 0);
        assert_eq!(next_slot(Some(4)), 5);
    }
    #[test]
    fn test_limits_validate_ceilings() {
        assert!(TopologyLimits::default().validate().is_ok());
        assert!(small_limits().validate().is_ok());

        let huge = TopologyLimits { max_sensors_per_zone: usize::MAX, ..TopologyLimits::default() };
        assert!(matches!(huge.validate(), Err(ThermalError::Config(_))));

        let over = TopologyLimits {
            max_cdevs_per_zone: limits::CDEVS_PER_ZONE_CEILING + 1,
            ..TopologyLimits::default()
        };
        assert!(over.validate().is_err());

        let none = TopologyLimits { max_zones: 0, ..TopologyLimits::default() };
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_unreservable_slots_are_alloc_error() {
        let limits = TopologyLimits { max_sensors_per_zone: usize::MAX, ..TopologyLimits::default() };
        let mut store = TopologyStore::new(limits);
        assert!(matches!(store.append_zone("CPU0", 1, 2), Err(ThermalError::AllocError(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_zone_deserializes_from_snapshot_json() {
        let mut store = TopologyStore::default();
        store.append_zone("CPU0", 80, 95).unwrap();
        store.append_sensor(0, "TC0", "/s0").unwrap();

        let json = serde_json::to_string(store.zone(0).unwrap()).unwrap();
        let zone: Zone = serde_json::from_str(&json).unwrap();
        assert_eq!(&zone, store.zone(0).unwrap());
        assert_eq!(zone.num_sensors(), 1);
    }
}
