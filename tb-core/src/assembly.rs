//! Assembly State Machine
//!
//! Applies ZONE, SENSOR, CDEV and THROTTLE messages to the topology store in wire
//! order. Sensors and cdevs always attach to the zone added last. Every handler
//! saves the cursors before advancing them and puts them back on failure, so a
//! rejected message leaves no trace.

use serde::Serialize;
use tracing::{info, warn};

use tb_error::{Result, ThermalError};
use tb_protocol::{CdevMessage, SensorMessage, ThrottleMessage, ZoneMessage};

use crate::topology::{next_slot, SessionCursors, TopologyLimits, TopologyStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyState {
    /// No session; only PROFILE_START is meaningful
    Idle,
    /// Session open; cursors are valid
    Building,
}

fn log_failure(what: &str, err: &ThermalError) {
    match err {
        ThermalError::AllocError(_) => warn!("Unable to allocate memory for {}: {}", what, err),
        ThermalError::CapacityExceeded { .. } => warn!("Rejected {}: {}", what, err),
        _ => info!("Rejected {}: {}", what, err),
    }
}

#[derive(Debug, Clone)]
pub struct Assembler {
    state: AssemblyState,
    store: TopologyStore,
    cursors: SessionCursors,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(TopologyLimits::default())
    }
}

impl Assembler {
    pub fn new(limits: TopologyLimits) -> Self {
        Self {
            state: AssemblyState::Idle,
            store: TopologyStore::new(limits),
            cursors: SessionCursors::default(),
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub fn cursors(&self) -> SessionCursors {
        self.cursors
    }

    pub(crate) fn store_mut(&mut self) -> &mut TopologyStore {
        &mut self.store
    }

    /// Open a session on an empty store
    pub(crate) fn begin(&mut self) {
        self.state = AssemblyState::Building;
    }

    /// Pop every zone, release its strings, reset all cursors
    pub(crate) fn halt(&mut self) {
        self.store.reset();
        self.cursors.reset();
        self.state = AssemblyState::Idle;
    }

    /// Re-derive the cursors after records were added outside the handlers
    pub(crate) fn sync_cursors(&mut self) {
        self.cursors.sync_to(&self.store);
    }

    pub fn apply_zone(&mut self, msg: &ZoneMessage) -> Result<usize> {
        info!(
            "zonemsg: len={}, name={}, psv={}, max={}",
            msg.len, msg.name, msg.psv, msg.max
        );
        if self.state != AssemblyState::Building {
            let err = ThermalError::NoActiveSession;
            log_failure("zone", &err);
            return Err(err);
        }

        let saved = self.cursors;
        self.cursors = SessionCursors {
            zone: Some(next_slot(saved.zone)),
            sensor: None,
            cdev: None,
        };

        match self.store.append_zone(&msg.name, msg.psv, msg.max) {
            Ok(idx) => {
                debug_assert_eq!(Some(idx), self.cursors.zone);
                Ok(idx)
            }
            Err(e) => {
                self.cursors = saved;
                log_failure("zone", &e);
                Err(e)
            }
        }
    }

    pub fn apply_sensor(&mut self, msg: &SensorMessage) -> Result<usize> {
        info!(
            "sensormsg: name_len={}, name={}, path_len={}, path={}",
            msg.name_len, msg.name, msg.path_len, msg.path
        );
        let Some(zone) = self.cursors.zone else {
            let err = ThermalError::NoActiveZone;
            log_failure("sensor", &err);
            return Err(err);
        };

        let saved = self.cursors.sensor;
        self.cursors.sensor = Some(next_slot(saved));

        match self.store.append_sensor(zone, &msg.name, &msg.path) {
            Ok(idx) => {
                debug_assert_eq!(Some(idx), self.cursors.sensor);
                Ok(idx)
            }
            Err(e) => {
                self.cursors.sensor = saved;
                log_failure("sensor", &e);
                Err(e)
            }
        }
    }

    pub fn apply_cdev(&mut self, msg: &CdevMessage) -> Result<usize> {
        info!(
            "cdevinfomsg: len={}, name={}, normal val={}, crit val={}, step size={}",
            msg.name_len, msg.name, msg.nval, msg.critval, msg.step
        );
        let Some(zone) = self.cursors.zone else {
            let err = ThermalError::NoActiveZone;
            log_failure("cooling device", &err);
            return Err(err);
        };

        let saved = self.cursors.cdev;
        self.cursors.cdev = Some(next_slot(saved));

        match self
            .store
            .append_cdev(zone, &msg.name, &msg.path, msg.nval, msg.critval, msg.step)
        {
            Ok(idx) => {
                debug_assert_eq!(Some(idx), self.cursors.cdev);
                Ok(idx)
            }
            Err(e) => {
                self.cursors.cdev = saved;
                log_failure("cooling device", &e);
                Err(e)
            }
        }
    }

    /// Acknowledged only; the actuation target lives outside this component
    pub fn apply_throttle(&mut self, msg: &ThrottleMessage) -> Result<()> {
        info!("throttlemsg: len={}, name={}, val={}", msg.len, msg.name, msg.val);
        Ok(())
    }
}
