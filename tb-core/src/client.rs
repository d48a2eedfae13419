//! Thermal API Client
//!
//! Client proxy for the daemon's Unix socket. Each call sends one transaction
//! and returns the 32-bit status from the reply.

use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::debug;

use tb_error::{Result, ThermalError};
use tb_protocol::{
    read_reply, write_transaction, CdevMessage, Parcel, ProfileStartMessage, Request,
    SensorMessage, ThrottleMessage, TransportStatus, ZoneMessage, FLAG_ONEWAY,
    INTERFACE_DESCRIPTOR, STATUS_UNKNOWN_OPCODE,
};

use crate::constants::ipc::CLIENT_TIMEOUT;

pub struct ThermalApiClient {
    stream: UnixStream,
}

impl ThermalApiClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())?;
        stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
        stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Raw transaction. Returns `None` for one-way calls.
    pub fn transact(&mut self, code: u32, flags: u32, data: &Parcel) -> Result<Option<(i32, Parcel)>> {
        write_transaction(&mut self.stream, code, flags, data)?;
        if flags & FLAG_ONEWAY != 0 {
            return Ok(None);
        }
        read_reply(&mut self.stream).map(Some)
    }

    /// Send a request and wait for its status
    pub fn send(&mut self, request: &Request) -> Result<i32> {
        request.validate().map_err(ThermalError::MalformedFrame)?;
        debug!("Sending {}", request.type_name());

        let (transport, mut reply) = self
            .transact(request.opcode().code(), 0, &request.to_parcel())?
            .ok_or_else(|| ThermalError::malformed("no reply"))?;

        match TransportStatus::from_raw(transport) {
            Some(TransportStatus::Ok) => reply.read_i32(),
            Some(TransportStatus::UnknownTransaction) => {
                Ok(reply.read_i32().unwrap_or(STATUS_UNKNOWN_OPCODE))
            }
            Some(TransportStatus::PermissionDenied) => Err(ThermalError::InterfaceMismatch {
                expected: INTERFACE_DESCRIPTOR.to_string(),
                found: "rejected by server".to_string(),
            }),
            _ => Err(ThermalError::malformed(format!("transport status {}", transport))),
        }
    }

    /// Fire-and-forget; the daemon applies the request without replying
    pub fn send_oneway(&mut self, request: &Request) -> Result<()> {
        request.validate().map_err(ThermalError::MalformedFrame)?;
        self.transact(request.opcode().code(), FLAG_ONEWAY, &request.to_parcel())?;
        Ok(())
    }

    pub fn send_profile_start(&mut self, profile: i32) -> Result<i32> {
        self.send(&Request::ProfileStart(ProfileStartMessage::new(profile)))
    }

    pub fn send_zone(&mut self, name: &str, psv: i32, max: i32) -> Result<i32> {
        self.send(&Request::Zone(ZoneMessage::new(name, psv, max)))
    }

    pub fn send_sensor(&mut self, name: &str, path: &str) -> Result<i32> {
        self.send(&Request::Sensor(SensorMessage::new(name, path)))
    }

    pub fn send_cdev(&mut self, name: &str, path: &str, nval: i32, critval: i32, step: i32) -> Result<i32> {
        self.send(&Request::Cdev(CdevMessage::new(name, path, nval, critval, step)))
    }

    pub fn send_throttle(&mut self, name: &str, val: i32) -> Result<i32> {
        self.send(&Request::Throttle(ThrottleMessage::new(name, val)))
    }
}
