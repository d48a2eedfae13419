//! Session Control
//!
//! PROFILE_START(non-zero) tears down whatever was assembled, opens a fresh
//! session and appends the zones the loader supplies. PROFILE_START(0) tears down
//! and leaves the session idle. A second start without a halt behaves like
//! halt-then-start.
//!
//! Fetching zones from the loader may touch the filesystem, so it is split from
//! appending them: [`fetch_external_zones`] runs without the session lock and
//! [`Session::restart`] applies the result.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use tb_error::Result;
use tb_protocol::Request;

use crate::assembly::{Assembler, AssemblyState};
use crate::loader::{NoopZoneLoader, ZoneLoader, ZoneSpec};
use crate::topology::{SessionCursors, TopologyLimits, TopologyStore};

/// Loader handle shared between the session and whoever fetches on its behalf
pub type SharedZoneLoader = Arc<Mutex<Box<dyn ZoneLoader>>>;

/// Ask the loader for the zones of a fresh session. A restart always halts
/// first, so the loaded zones start at index 0. Errors are logged and yield
/// no zones.
pub fn fetch_external_zones(loader: &SharedZoneLoader) -> Vec<ZoneSpec> {
    let mut loader = loader.lock();
    match loader.load_zones(0) {
        Ok(specs) => specs,
        Err(e) => {
            warn!("Zone loader '{}' failed: {}", loader.name(), e);
            Vec::new()
        }
    }
}

/// The single assembly session owned by the service
pub struct Session {
    assembler: Assembler,
    loader: SharedZoneLoader,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(TopologyLimits::default(), Box::new(NoopZoneLoader))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("assembler", &self.assembler)
            .field("loader", &self.loader.lock().name())
            .finish()
    }
}

impl Session {
    pub fn new(limits: TopologyLimits, loader: Box<dyn ZoneLoader>) -> Self {
        Self { assembler: Assembler::new(limits), loader: Arc::new(Mutex::new(loader)) }
    }

    pub fn state(&self) -> AssemblyState {
        self.assembler.state()
    }

    pub fn topology(&self) -> &TopologyStore {
        self.assembler.store()
    }

    pub fn cursors(&self) -> SessionCursors {
        self.assembler.cursors()
    }

    pub fn loader(&self) -> SharedZoneLoader {
        self.loader.clone()
    }

    #[cfg(test)]
    pub(crate) fn assembler_mut(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    /// Halt, or restart with freshly fetched zones
    pub fn profile_start(&mut self, profile: i32) -> Result<()> {
        if profile == 0 {
            info!("thermal profile shift halted");
            self.assembler.halt();
            return Ok(());
        }
        let zones = fetch_external_zones(&self.loader);
        self.restart(profile, zones)
    }

    /// Open a new session seeded with `zones`; `profile` 0 halts instead
    pub fn restart(&mut self, profile: i32, zones: Vec<ZoneSpec>) -> Result<()> {
        if profile == 0 {
            return self.profile_start(0);
        }

        info!("thermal profile shift to profile {}", profile);
        if self.assembler.state() == AssemblyState::Building {
            info!(
                "Restarting active session, dropping {} zones",
                self.assembler.store().len()
            );
        }
        self.assembler.halt();
        self.assembler.begin();
        self.append_external_zones(&zones);
        Ok(())
    }

    /// Append loaded zones in order; on failure keep whatever made it in
    fn append_external_zones(&mut self, specs: &[ZoneSpec]) {
        let store = self.assembler.store_mut();
        let mut appended = 0;
        for spec in specs {
            let pushed = spec.build(store.limits()).and_then(|zone| store.push_zone(zone));
            if let Err(e) = pushed {
                warn!("Could not add loaded zone {}: {}", spec.name, e);
                break;
            }
            appended += 1;
        }
        self.assembler.sync_cursors();

        if appended > 0 {
            info!("Added {} of {} loaded zones", appended, specs.len());
        }
    }

    /// Apply one decoded request
    pub fn apply(&mut self, request: &Request) -> Result<()> {
        match request {
            Request::ProfileStart(m) => self.profile_start(m.profile),
            Request::Zone(m) => self.assembler.apply_zone(m).map(|_| ()),
            Request::Sensor(m) => self.assembler.apply_sensor(m).map(|_| ()),
            Request::Cdev(m) => self.assembler.apply_cdev(m).map(|_| ()),
            Request::Throttle(m) => self.assembler.apply_throttle(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{SensorSpec, ZoneSpec};
    use tb_error::ThermalError;
    use tb_protocol::{CdevMessage, ProfileStartMessage, SensorMessage, ZoneMessage};

    struct FixedLoader {
        zones: Vec<ZoneSpec>,
    }

    impl ZoneLoader for FixedLoader {
        fn load_zones(&mut self, _start_index: usize) -> Result<Vec<ZoneSpec>> {
            Ok(self.zones.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingLoader;

    impl ZoneLoader for FailingLoader {
        fn load_zones(&mut self, _start_index: usize) -> Result<Vec<ZoneSpec>> {
            Err(ThermalError::ZoneLoader("backing store offline".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn spec(name: &str, sensors: usize) -> ZoneSpec {
        ZoneSpec {
            name: name.into(),
            psv: 1,
            max: 2,
            sensors: (0..sensors)
                .map(|i| SensorSpec { name: format!("s{}", i), path: format!("/s{}", i) })
                .collect(),
            cdevs: vec![],
        }
    }

    #[test]
    fn test_halt_is_idempotent() {
        let mut s = Session::default();
        s.profile_start(0).unwrap();
        s.profile_start(0).unwrap();
        assert_eq!(s.state(), AssemblyState::Idle);
        assert!(s.topology().is_empty());
        assert_eq!(s.cursors(), SessionCursors::default());
    }

    #[test]
    fn test_full_session_then_halt() {
        let mut s = Session::default();
        s.apply(&Request::ProfileStart(ProfileStartMessage::new(1))).unwrap();
        s.apply(&Request::Zone(ZoneMessage::new("z", 1, 2))).unwrap();
        s.apply(&Request::Sensor(SensorMessage::new("s", "/s"))).unwrap();
        s.apply(&Request::Cdev(CdevMessage::new("c", "/c", 1, 2, 3))).unwrap();
        assert_eq!(s.topology().len(), 1);

        s.apply(&Request::ProfileStart(ProfileStartMessage::new(0))).unwrap();
        assert!(s.topology().is_empty());
        assert_eq!(s.state(), AssemblyState::Idle);
    }

    #[test]
    fn test_double_start_drops_and_reloads() {
        let loader = FixedLoader { zones: vec![spec("EXT", 1)] };
        let mut s = Session::new(TopologyLimits::default(), Box::new(loader));

        s.profile_start(1).unwrap();
        s.apply(&Request::Zone(ZoneMessage::new("CPU0", 80, 95))).unwrap();
        assert_eq!(s.topology().len(), 2);

        s.profile_start(2).unwrap();
        assert_eq!(s.topology().len(), 1);
        assert_eq!(s.topology().zone(0).unwrap().name, "EXT");
        assert_eq!(s.cursors(), SessionCursors { zone: Some(0), sensor: Some(0), cdev: None });
    }

    #[test]
    fn test_loaded_zones_precede_client_zones() {
        let loader = FixedLoader { zones: vec![spec("EXT0", 0), spec("EXT1", 2)] };
        let mut s = Session::new(TopologyLimits::default(), Box::new(loader));
        s.profile_start(1).unwrap();

        // Cursors point at the last loaded zone
        assert_eq!(s.cursors().zone, Some(1));
        assert_eq!(s.cursors().sensor, Some(1));

        s.apply(&Request::Zone(ZoneMessage::new("CPU0", 80, 95))).unwrap();
        s.apply(&Request::Sensor(SensorMessage::new("TC0", "/s0"))).unwrap();
        let cpu = s.topology().zone(2).unwrap();
        assert_eq!(cpu.name, "CPU0");
        assert_eq!(cpu.num_sensors(), 1);
        assert!(s.cursors().is_consistent_with(s.topology()));
    }

    #[test]
    fn test_loader_failure_keeps_session_active() {
        let mut s = Session::new(TopologyLimits::default(), Box::new(FailingLoader));
        assert!(s.profile_start(1).is_ok());
        assert_eq!(s.state(), AssemblyState::Building);
        assert!(s.topology().is_empty());
        s.apply(&Request::Zone(ZoneMessage::new("CPU0", 80, 95))).unwrap();
        assert_eq!(s.topology().len(), 1);
    }

    #[test]
    fn test_loader_partial_subset_kept() {
        let limits = TopologyLimits { max_sensors_per_zone: 1, ..TopologyLimits::default() };
        let loader = FixedLoader {
            zones: vec![spec("OK", 1), spec("TOO_BIG", 2), spec("NEVER", 0)],
        };
        let mut s = Session::new(limits, Box::new(loader));
        s.profile_start(1).unwrap();

        assert_eq!(s.topology().len(), 1);
        assert_eq!(s.topology().zone(0).unwrap().name, "OK");
        assert!(s.cursors().is_consistent_with(s.topology()));
    }

    #[test]
    fn test_restart_with_prefetched_zones() {
        let loader = FixedLoader { zones: vec![spec("EXT", 2)] };
        let mut s = Session::new(TopologyLimits::default(), Box::new(loader));
        s.profile_start(1).unwrap();
        s.apply(&Request::Zone(ZoneMessage::new("CPU0", 80, 95))).unwrap();

        let zones = fetch_external_zones(&s.loader());
        s.restart(3, zones).unwrap();
        assert_eq!(s.state(), AssemblyState::Building);
        assert_eq!(s.topology().len(), 1);
        assert_eq!(s.topology().zone(0).unwrap().num_sensors(), 2);

        s.restart(0, Vec::new()).unwrap();
        assert_eq!(s.state(), AssemblyState::Idle);
        assert!(s.topology().is_empty());
    }

    #[test]
    fn test_failed_fetch_yields_no_zones() {
        let s = Session::new(TopologyLimits::default(), Box::new(FailingLoader));
        assert!(fetch_external_zones(&s.loader()).is_empty());
    }
}
