//! Binder-style parcel
//!
//! A flat little-endian buffer of 32-bit aligned primitives. Strings travel as
//! UTF-16 with an explicit unit count, a NUL terminator and padding to the next
//! 4-byte boundary.

use tb_error::{Result, ThermalError};

/// Written in front of every interface descriptor
pub const STRICT_MODE_PENALTY_GATHER: i32 = i32::MIN;

/// Upper bound on a single String16 so a hostile length cannot force a huge read
const MAX_STRING16_UNITS: usize = 4096;

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// Serialisation container carrying typed primitives and length-prefixed strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parcel {
    data: Vec<u8>,
    pos: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap received bytes for reading from the start
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read
    pub fn data_avail(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ThermalError::malformed(format!(
                    "short read: need {} bytes at offset {}, {} available",
                    n,
                    start,
                    self.data.len() - start
                ))
            })?;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a UTF-16 string; `None` encodes the null string
    pub fn write_string16(&mut self, value: Option<&str>) {
        let Some(s) = value else {
            self.write_i32(-1);
            return;
        };

        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        let start = self.data.len();
        for unit in units.iter().chain(std::iter::once(&0u16)) {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        let written = self.data.len() - start;
        self.data.resize(start + pad4(written), 0);
    }

    /// Read a UTF-16 string; the null string decodes to `None`
    pub fn read_string16(&mut self) -> Result<Option<String>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ThermalError::malformed(format!("negative string length {}", len)));
        }

        let units = len as usize;
        if units > MAX_STRING16_UNITS {
            return Err(ThermalError::malformed(format!(
                "string length {} exceeds {} units",
                units, MAX_STRING16_UNITS
            )));
        }

        let byte_len = (units + 1) * 2;
        let bytes = self.take(pad4(byte_len))?;

        if bytes[units * 2] != 0 || bytes[units * 2 + 1] != 0 {
            return Err(ThermalError::malformed("string is not NUL terminated"));
        }

        let decoded: Vec<u16> = bytes[..units * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        String::from_utf16(&decoded)
            .map(Some)
            .map_err(|e| ThermalError::malformed(format!("invalid UTF-16 string: {}", e)))
    }

    /// Write the header every incoming call is checked against
    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.write_i32(STRICT_MODE_PENALTY_GATHER);
        self.write_string16(Some(descriptor));
    }

    /// Consume the interface token and compare it with `descriptor`
    pub fn enforce_interface(&mut self, descriptor: &str) -> Result<()> {
        let mismatch = |found: String| ThermalError::InterfaceMismatch {
            expected: descriptor.to_string(),
            found,
        };

        // Strict-mode policy is carried for compatibility only
        self.read_i32().map_err(|_| mismatch(String::new()))?;

        match self.read_string16() {
            Ok(Some(found)) if found == descriptor => Ok(()),
            Ok(Some(found)) => Err(mismatch(found)),
            Ok(None) | Err(_) => Err(mismatch(String::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i32_layout_is_little_endian() {
        let mut p = Parcel::new();
        p.write_i32(0x0102_0304);
        p.write_i32(-1);
        assert_eq!(p.as_bytes(), &[4, 3, 2, 1, 0xff, 0xff, 0xff, 0xff]);

        let mut r = Parcel::from_bytes(p.into_bytes());
        assert_eq!(r.read_i32().unwrap(), 0x0102_0304);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert_eq!(r.data_avail(), 0);
    }

    #[test]
    fn test_string16_is_padded() {
        let mut p = Parcel::new();
        // 3 units + terminator = 8 bytes, already aligned
        p.write_string16(Some("TC0"));
        assert_eq!(p.len(), 4 + 8);

        // 4 units + terminator = 10 bytes, padded to 12
        let mut p = Parcel::new();
        p.write_string16(Some("CPU0"));
        assert_eq!(p.len(), 4 + 12);

        let mut r = Parcel::from_bytes(p.into_bytes());
        assert_eq!(r.read_string16().unwrap().as_deref(), Some("CPU0"));
        assert_eq!(r.data_avail(), 0);
    }

    #[test]
    fn test_null_string16() {
        let mut p = Parcel::new();
        p.write_string16(None);
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert_eq!(r.read_string16().unwrap(), None);
    }

    #[test]
    fn test_non_ascii_string16() {
        let mut p = Parcel::new();
        p.write_string16(Some("Zone°C"));
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert_eq!(r.read_string16().unwrap().as_deref(), Some("Zone°C"));
    }

    #[test]
    fn test_short_read_is_malformed() {
        let mut r = Parcel::from_bytes(vec![1, 2]);
        assert!(matches!(r.read_i32(), Err(ThermalError::MalformedFrame(_))));
    }

    #[test]
    fn test_truncated_string_is_malformed() {
        let mut p = Parcel::new();
        p.write_i32(10);
        p.write_i32(0);
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert!(matches!(r.read_string16(), Err(ThermalError::MalformedFrame(_))));
    }

    #[test]
    fn test_negative_string_length_is_malformed() {
        let mut p = Parcel::new();
        p.write_i32(-7);
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert!(matches!(r.read_string16(), Err(ThermalError::MalformedFrame(_))));
    }

    #[test]
    fn test_missing_terminator_is_malformed() {
        let mut p = Parcel::new();
        p.write_i32(1);
        p.write_i32(0x0041_0041); // 'A' followed by 'A' where NUL is expected
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert!(matches!(r.read_string16(), Err(ThermalError::MalformedFrame(_))));
    }

    #[test]
    fn test_enforce_interface() {
        let mut p = Parcel::new();
        p.write_interface_token("thermal_api.IThermalAPI");
        let mut r = Parcel::from_bytes(p.into_bytes());
        assert!(r.enforce_interface("thermal_api.IThermalAPI").is_ok());

        let mut p = Parcel::new();
        p.write_interface_token("other.IFace");
        let mut r = Parcel::from_bytes(p.into_bytes());
        match r.enforce_interface("thermal_api.IThermalAPI") {
            Err(ThermalError::InterfaceMismatch { found, .. }) => assert_eq!(found, "other.IFace"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_enforce_interface_on_empty_parcel() {
        let mut r = Parcel::new();
        assert!(matches!(
            r.enforce_interface("thermal_api.IThermalAPI"),
            Err(ThermalError::InterfaceMismatch { .. })
        ));
    }
}
