//! Shared IPC wire contract for thermbind
//!
//! Five opcoded calls describe a thermal topology one record at a time. Every call
//! carries an interface token, an opaque leading integer and the per-opcode fields.
//! Every reply carries a single 32-bit status.

pub mod parcel;
pub mod transport;

pub use parcel::Parcel;
pub use transport::{
    read_reply, read_transaction, write_reply, write_transaction, ReplyHeader,
    TransactionHeader, FLAG_ONEWAY, MAX_PARCEL_SIZE, REPLY_HEADER_SIZE,
    TRANSACTION_HEADER_SIZE,
};

use tb_error::{Result, ThermalError};

/// Name the service registers under
pub const SERVICE_NAME: &str = "thermal_api";

/// Interface descriptor replayed in every request token
pub const INTERFACE_DESCRIPTOR: &str = "thermal_api.IThermalAPI";

/// Maximum meaningful bytes of any name or path field
pub const MAX_STRING_LEN: usize = 256;

/// Reply status: request applied
pub const STATUS_OK: i32 = 0;

/// Reply status: request rejected, session unchanged
pub const STATUS_FAILED: i32 = -1;

/// Reply status: opcode not part of the interface
pub const STATUS_UNKNOWN_OPCODE: i32 = -74;

/// Value of the reserved leading integer written by this crate's encoders
pub const RESERVED_LEADING_INT: i32 = 0;

const FIRST_CALL_TRANSACTION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    ProfileStart = FIRST_CALL_TRANSACTION,
    Sensor = FIRST_CALL_TRANSACTION + 1,
    Zone = FIRST_CALL_TRANSACTION + 2,
    Throttle = FIRST_CALL_TRANSACTION + 3,
    Cdev = FIRST_CALL_TRANSACTION + 4,
}

impl Opcode {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            c if c == Opcode::ProfileStart as u32 => Some(Opcode::ProfileStart),
            c if c == Opcode::Sensor as u32 => Some(Opcode::Sensor),
            c if c == Opcode::Zone as u32 => Some(Opcode::Zone),
            c if c == Opcode::Throttle as u32 => Some(Opcode::Throttle),
            c if c == Opcode::Cdev as u32 => Some(Opcode::Cdev),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::ProfileStart => "PROFILE_START",
            Opcode::Sensor => "SENSOR",
            Opcode::Zone => "ZONE",
            Opcode::Throttle => "THROTTLE",
            Opcode::Cdev => "CDEV",
        }
    }
}

/// Transport-level result handed back to the host IPC runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransportStatus {
    Ok = 0,
    PermissionDenied = -1,
    BadValue = -22,
    UnknownTransaction = -74,
}

impl TransportStatus {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(TransportStatus::Ok),
            -1 => Some(TransportStatus::PermissionDenied),
            -22 => Some(TransportStatus::BadValue),
            -74 => Some(TransportStatus::UnknownTransaction),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// Message Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStartMessage {
    pub reserved: i32,
    /// 0 halts the session, anything else starts a new one
    pub profile: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMessage {
    pub reserved: i32,
    pub len: i32,
    pub name: String,
    pub psv: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorMessage {
    pub reserved: i32,
    pub name_len: i32,
    pub name: String,
    pub path_len: i32,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdevMessage {
    pub reserved: i32,
    pub name_len: i32,
    pub name: String,
    pub path_len: i32,
    pub path: String,
    pub nval: i32,
    pub critval: i32,
    pub step: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleMessage {
    pub reserved: i32,
    pub len: i32,
    pub name: String,
    pub val: i32,
}

fn byte_len(s: &str) -> i32 {
    s.len() as i32
}

impl ProfileStartMessage {
    pub fn new(profile: i32) -> Self {
        Self { reserved: RESERVED_LEADING_INT, profile }
    }
}

impl ZoneMessage {
    pub fn new(name: impl Into<String>, psv: i32, max: i32) -> Self {
        let name = name.into();
        Self { reserved: RESERVED_LEADING_INT, len: byte_len(&name), name, psv, max }
    }
}

impl SensorMessage {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let (name, path) = (name.into(), path.into());
        Self {
            reserved: RESERVED_LEADING_INT,
            name_len: byte_len(&name),
            name,
            path_len: byte_len(&path),
            path,
        }
    }
}

impl CdevMessage {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        nval: i32,
        critval: i32,
        step: i32,
    ) -> Self {
        let (name, path) = (name.into(), path.into());
        Self {
            reserved: RESERVED_LEADING_INT,
            name_len: byte_len(&name),
            name,
            path_len: byte_len(&path),
            path,
            nval,
            critval,
            step,
        }
    }
}

impl ThrottleMessage {
    pub fn new(name: impl Into<String>, val: i32) -> Self {
        let name = name.into();
        Self { reserved: RESERVED_LEADING_INT, len: byte_len(&name), name, val }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ProfileStart(ProfileStartMessage),
    Sensor(SensorMessage),
    Zone(ZoneMessage),
    Throttle(ThrottleMessage),
    Cdev(CdevMessage),
}

/// Read a (length, string) pair and cut the string at exactly `length` bytes
fn read_counted_string(parcel: &mut Parcel, field: &'static str) -> Result<(i32, String)> {
    let declared = parcel.read_i32()?;
    let transported = parcel
        .read_string16()?
        .ok_or_else(|| ThermalError::malformed(format!("{}: null string", field)))?;

    if declared < 0 {
        return Err(ThermalError::malformed(format!("{}: negative length {}", field, declared)));
    }
    let len = declared as usize;
    if len > MAX_STRING_LEN {
        return Err(ThermalError::malformed(format!(
            "{}: length {} exceeds {}",
            field, len, MAX_STRING_LEN
        )));
    }
    if len > transported.len() {
        return Err(ThermalError::malformed(format!(
            "{}: length {} but only {} bytes transported",
            field,
            len,
            transported.len()
        )));
    }
    if !transported.is_char_boundary(len) {
        return Err(ThermalError::malformed(format!(
            "{}: length {} splits a character",
            field, len
        )));
    }

    let mut value = transported;
    value.truncate(len);
    Ok((declared, value))
}

fn write_counted_string(parcel: &mut Parcel, declared: i32, value: &str) {
    parcel.write_i32(declared);
    parcel.write_string16(Some(value));
}

impl Request {
    /// Decode the body that follows the interface token
    pub fn read_body(opcode: Opcode, parcel: &mut Parcel) -> Result<Self> {
        let reserved = parcel.read_i32()?;

        let request = match opcode {
            Opcode::ProfileStart => Request::ProfileStart(ProfileStartMessage {
                reserved,
                profile: parcel.read_i32()?,
            }),
            Opcode::Zone => {
                let (len, name) = read_counted_string(parcel, "zone name")?;
                Request::Zone(ZoneMessage {
                    reserved,
                    len,
                    name,
                    psv: parcel.read_i32()?,
                    max: parcel.read_i32()?,
                })
            }
            Opcode::Sensor => {
                let (name_len, name) = read_counted_string(parcel, "sensor name")?;
                let (path_len, path) = read_counted_string(parcel, "sensor path")?;
                Request::Sensor(SensorMessage { reserved, name_len, name, path_len, path })
            }
            Opcode::Cdev => {
                let (name_len, name) = read_counted_string(parcel, "cdev name")?;
                let (path_len, path) = read_counted_string(parcel, "cdev path")?;
                Request::Cdev(CdevMessage {
                    reserved,
                    name_len,
                    name,
                    path_len,
                    path,
                    nval: parcel.read_i32()?,
                    critval: parcel.read_i32()?,
                    step: parcel.read_i32()?,
                })
            }
            Opcode::Throttle => {
                let (len, name) = read_counted_string(parcel, "throttle name")?;
                Request::Throttle(ThrottleMessage { reserved, len, name, val: parcel.read_i32()? })
            }
        };

        Ok(request)
    }

    /// Decode a full request, interface token included
    pub fn read_from(code: u32, parcel: &mut Parcel) -> Result<Self> {
        let opcode = Opcode::from_code(code).ok_or(ThermalError::UnknownOpcode(code))?;
        parcel.enforce_interface(INTERFACE_DESCRIPTOR)?;
        Self::read_body(opcode, parcel)
    }

    /// Encode token and body the way a client proxy sends them
    pub fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_interface_token(INTERFACE_DESCRIPTOR);
        match self {
            Request::ProfileStart(m) => {
                parcel.write_i32(m.reserved);
                parcel.write_i32(m.profile);
            }
            Request::Zone(m) => {
                parcel.write_i32(m.reserved);
                write_counted_string(parcel, m.len, &m.name);
                parcel.write_i32(m.psv);
                parcel.write_i32(m.max);
            }
            Request::Sensor(m) => {
                parcel.write_i32(m.reserved);
                write_counted_string(parcel, m.name_len, &m.name);
                write_counted_string(parcel, m.path_len, &m.path);
            }
            Request::Cdev(m) => {
                parcel.write_i32(m.reserved);
                write_counted_string(parcel, m.name_len, &m.name);
                write_counted_string(parcel, m.path_len, &m.path);
                parcel.write_i32(m.nval);
                parcel.write_i32(m.critval);
                parcel.write_i32(m.step);
            }
            Request::Throttle(m) => {
                parcel.write_i32(m.reserved);
                write_counted_string(parcel, m.len, &m.name);
                parcel.write_i32(m.val);
            }
        }
    }

    pub fn to_parcel(&self) -> Parcel {
        let mut parcel = Parcel::new();
        self.write_to(&mut parcel);
        parcel
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Request::ProfileStart(_) => Opcode::ProfileStart,
            Request::Sensor(_) => Opcode::Sensor,
            Request::Zone(_) => Opcode::Zone,
            Request::Throttle(_) => Opcode::Throttle,
            Request::Cdev(_) => Opcode::Cdev,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.opcode().name()
    }

    /// Validate field lengths before sending to the daemon
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Request::ProfileStart(_) => Ok(()),
            Request::Zone(m) => validate_counted("zone name", m.len, &m.name),
            Request::Sensor(m) => {
                validate_counted("sensor name", m.name_len, &m.name)?;
                validate_counted("sensor path", m.path_len, &m.path)
            }
            Request::Cdev(m) => {
                validate_counted("cdev name", m.name_len, &m.name)?;
                validate_counted("cdev path", m.path_len, &m.path)
            }
            Request::Throttle(m) => validate_counted("throttle name", m.len, &m.name),
        }
    }
}

fn validate_counted(field: &str, declared: i32, value: &str) -> std::result::Result<(), String> {
    if declared < 0 {
        return Err(format!("{}: negative length", field));
    }
    let len = declared as usize;
    if len > MAX_STRING_LEN {
        return Err(format!("{}: too long ({} > {} bytes)", field, len, MAX_STRING_LEN));
    }
    if len > value.len() || !value.is_char_boundary(len) {
        return Err(format!("{}: length {} does not fit {:?}", field, len, value));
    }
    Ok(())
}

/// Reply parcel carrying a single status
pub fn status_reply(status: i32) -> Parcel {
    let mut reply = Parcel::new();
    reply.write_i32(status);
    reply
}
