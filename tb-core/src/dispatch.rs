//! Transaction Dispatcher
//!
//! The entry point the host IPC runtime calls once per incoming transaction.
//! Every state change happens under the session lock, so concurrent callers are
//! served strictly one after another and wire order is preserved. Nothing that
//! can block runs while the lock is held: the request is decoded from its own
//! buffer and loader zones are fetched before the lock is taken.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use tb_error::Result;
use tb_protocol::{
    Opcode, Parcel, Request, TransportStatus, INTERFACE_DESCRIPTOR, STATUS_FAILED, STATUS_OK,
    STATUS_UNKNOWN_OPCODE,
};

use crate::assembly::AssemblyState;
use crate::session::{fetch_external_zones, Session};
use crate::topology::{SessionCursors, TopologyStore, Zone};

/// Who sent a transaction, as reported by the IPC runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub pid: i32,
    pub uid: u32,
}

impl CallerIdentity {
    /// The current process, for in-process callers and tests
    pub fn current() -> Self {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        Self { pid: std::process::id() as i32, uid }
    }
}

/// Point-in-time copy of the topology for downstream readers
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub state: AssemblyState,
    pub cursors: SessionCursors,
    pub zones: Vec<Zone>,
}

/// Server side of the thermal API
#[derive(Clone)]
pub struct ThermalApiService {
    session: Arc<Mutex<Session>>,
}

impl ThermalApiService {
    pub fn new(session: Session) -> Self {
        Self { session: Arc::new(Mutex::new(session)) }
    }

    /// Handle one transaction. Writes the status reply into `reply` and returns
    /// the transport-level result for the runtime.
    pub fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        caller: CallerIdentity,
    ) -> TransportStatus {
        info!(
            "onTransact: PID={}, UID={}, code={}",
            caller.pid, caller.uid, code
        );

        let Some(opcode) = Opcode::from_code(code) else {
            warn!("Unknown transaction code {} from pid={}", code, caller.pid);
            reply.write_i32(STATUS_UNKNOWN_OPCODE);
            return TransportStatus::UnknownTransaction;
        };

        if let Err(e) = data.enforce_interface(INTERFACE_DESCRIPTOR) {
            warn!("{} from pid={}, uid={}: {}", opcode.name(), caller.pid, caller.uid, e);
            return TransportStatus::PermissionDenied;
        }

        let status = match Request::read_body(opcode, data) {
            Ok(request) => match self.apply(&request) {
                Ok(()) => STATUS_OK,
                Err(e) if e.is_request_failure() => {
                    debug!("{} failed: {}", opcode.name(), e);
                    STATUS_FAILED
                }
                Err(e) => {
                    warn!("{} failed: {}", opcode.name(), e);
                    STATUS_FAILED
                }
            },
            Err(e) => {
                warn!("Malformed {} from pid={}: {}", opcode.name(), caller.pid, e);
                STATUS_FAILED
            }
        };

        reply.write_i32(status);
        TransportStatus::Ok
    }

    /// Apply a decoded request. A PROFILE_START that opens a session fetches
    /// its loader zones before taking the session lock.
    fn apply(&self, request: &Request) -> Result<()> {
        if let Request::ProfileStart(m) = request {
            if m.profile != 0 {
                let loader = self.session.lock().loader();
                let zones = fetch_external_zones(&loader);
                return self.session.lock().restart(m.profile, zones);
            }
        }
        self.session.lock().apply(request)
    }

    /// Encode `request`, dispatch it in-process and return the reply status
    pub fn call(&self, request: &Request, caller: CallerIdentity) -> i32 {
        let mut data = Parcel::from_bytes(request.to_parcel().into_bytes());
        let mut reply = Parcel::new();
        self.on_transact(request.opcode().code(), &mut data, &mut reply, caller);
        let mut reply = Parcel::from_bytes(reply.into_bytes());
        reply.read_i32().unwrap_or(STATUS_FAILED)
    }

    /// Run `f` against the topology while holding the session lock
    pub fn with_topology<R>(&self, f: impl FnOnce(&TopologyStore) -> R) -> R {
        let session = self.session.lock();
        f(session.topology())
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let session = self.session.lock();
        TopologySnapshot {
            state: session.state(),
            cursors: session.cursors(),
            zones: session.topology().zones().to_vec(),
        }
    }
}
