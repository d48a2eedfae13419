//! Unified error handling for thermbind
//!
//! This crate provides a single error type used across all thermbind components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using ThermalError
pub type Result<T> = std::result::Result<T, ThermalError>;

/// Which bounded per-zone sequence overflowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Zone,
    Sensor,
    CoolingDevice,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Zone => f.write_str("zone"),
            RecordKind::Sensor => f.write_str("sensor"),
            RecordKind::CoolingDevice => f.write_str("cooling device"),
        }
    }
}

/// Unified error type for all thermbind operations
#[derive(thiserror::Error, Debug)]
pub enum ThermalError {
    // ============================================================================
    // Wire Errors
    // ============================================================================
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Interface mismatch: expected {expected:?}, found {found:?}")]
    InterfaceMismatch {
        expected: String,
        found: String,
    },

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u32),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Assembly Errors
    // ============================================================================
    #[error("No active zone: sensor or cooling device sent before any zone")]
    NoActiveZone,

    #[error("No active session: zone sent before profile start")]
    NoActiveSession,

    #[error("No such zone: {0}")]
    NoSuchZone(usize),

    #[error("Allocation failed: {0}")]
    AllocError(String),

    #[error("Capacity exceeded: at most {limit} {kind} entries")]
    CapacityExceeded {
        kind: RecordKind,
        limit: usize,
    },

    #[error("Zone loader failed: {0}")]
    ZoneLoader(String),

    // ============================================================================
    // Configuration and I/O Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ThermalError {
    /// Create a malformed frame error from a string
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an allocation error from a string
    pub fn alloc(msg: impl Into<String>) -> Self {
        Self::AllocError(msg.into())
    }

    /// True for failures that leave the session untouched and are reported to the
    /// client as a plain failure status rather than a transport error.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_)
                | Self::NoActiveZone
                | Self::NoActiveSession
                | Self::NoSuchZone(_)
                | Self::AllocError(_)
                | Self::CapacityExceeded { .. }
        )
    }
}

impl From<std::collections::TryReserveError> for ThermalError {
    fn from(e: std::collections::TryReserveError) -> Self {
        Self::AllocError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_display() {
        let err = ThermalError::CapacityExceeded {
            kind: RecordKind::Sensor,
            limit: 10,
        };
        assert_eq!(err.to_string(), "Capacity exceeded: at most 10 sensor entries");
    }

    #[test]
    fn test_request_failure_classification() {
        assert!(ThermalError::NoActiveZone.is_request_failure());
        assert!(ThermalError::malformed("short read").is_request_failure());
        assert!(!ThermalError::UnknownOpcode(99).is_request_failure());
        assert!(!ThermalError::InterfaceMismatch {
            expected: "a".into(),
            found: "b".into(),
        }
        .is_request_failure());
    }

    #[test]
    fn test_try_reserve_converts_to_alloc_error() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve_exact(usize::MAX).unwrap_err();
        assert!(matches!(ThermalError::from(err), ThermalError::AllocError(_)));
    }
}
