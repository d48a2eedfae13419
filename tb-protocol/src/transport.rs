//! Transaction framing for the Unix socket host runtime
//!
//! Request frame: `code: u32`, `flags: u32`, `len: u32`, then `len` parcel bytes.
//! Reply frame: `status: i32`, `len: u32`, then `len` parcel bytes.
//! All header fields are little-endian. One-way transactions get no reply frame.

use std::io::{self, Read, Write};

use tb_error::{Result, ThermalError};

use crate::Parcel;

/// Caller does not wait for a reply
pub const FLAG_ONEWAY: u32 = 0x01;

/// Maximum parcel size accepted in either direction (8KB)
pub const MAX_PARCEL_SIZE: usize = 8 * 1024;

pub const TRANSACTION_HEADER_SIZE: usize = 12;

pub const REPLY_HEADER_SIZE: usize = 8;

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn check_size(len: usize) -> Result<()> {
    if len > MAX_PARCEL_SIZE {
        return Err(ThermalError::MessageTooLarge { size: len, max_size: MAX_PARCEL_SIZE });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    pub code: u32,
    pub flags: u32,
    pub len: u32,
}

impl TransactionHeader {
    pub fn encode(&self) -> [u8; TRANSACTION_HEADER_SIZE] {
        let mut out = [0u8; TRANSACTION_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.code.to_le_bytes());
        out[4..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    /// Decode and bound-check a header
    pub fn decode(bytes: &[u8; TRANSACTION_HEADER_SIZE]) -> Result<Self> {
        let header = Self {
            code: u32_at(bytes, 0),
            flags: u32_at(bytes, 4),
            len: u32_at(bytes, 8),
        };
        check_size(header.len as usize)?;
        Ok(header)
    }

    pub fn is_oneway(&self) -> bool {
        self.flags & FLAG_ONEWAY != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Raw transport status, see [`crate::TransportStatus`]
    pub status: i32,
    pub len: u32,
}

impl ReplyHeader {
    pub fn encode(&self) -> [u8; REPLY_HEADER_SIZE] {
        let mut out = [0u8; REPLY_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.status.to_le_bytes());
        out[4..8].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; REPLY_HEADER_SIZE]) -> Result<Self> {
        let header = Self {
            status: u32_at(bytes, 0) as i32,
            len: u32_at(bytes, 4),
        };
        check_size(header.len as usize)?;
        Ok(header)
    }
}

/// Send one transaction
pub fn write_transaction<W: Write>(writer: &mut W, code: u32, flags: u32, data: &Parcel) -> Result<()> {
    check_size(data.len())?;
    let header = TransactionHeader { code, flags, len: data.len() as u32 };
    writer.write_all(&header.encode())?;
    writer.write_all(data.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Receive one transaction; `None` on a clean disconnect between frames
pub fn read_transaction<R: Read>(reader: &mut R) -> Result<Option<(TransactionHeader, Parcel)>> {
    let mut raw = [0u8; TRANSACTION_HEADER_SIZE];
    let mut filled = 0;
    while filled < raw.len() {
        match reader.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ThermalError::malformed("truncated transaction header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let header = TransactionHeader::decode(&raw)?;
    let mut body = vec![0u8; header.len as usize];
    reader.read_exact(&mut body)?;
    Ok(Some((header, Parcel::from_bytes(body))))
}

pub fn write_reply<W: Write>(writer: &mut W, status: i32, reply: &Parcel) -> Result<()> {
    check_size(reply.len())?;
    let header = ReplyHeader { status, len: reply.len() as u32 };
    writer.write_all(&header.encode())?;
    writer.write_all(reply.as_bytes())?;
    writer.flush()?;
    Ok(())
}

pub fn read_reply<R: Read>(reader: &mut R) -> Result<(i32, Parcel)> {
    let mut raw = [0u8; REPLY_HEADER_SIZE];
    reader.read_exact(&mut raw)?;
    let header = ReplyHeader::decode(&raw)?;
    let mut body = vec![0u8; header.len as usize];
    reader.read_exact(&mut body)?;
    Ok((header.status, Parcel::from_bytes(body)))
}
