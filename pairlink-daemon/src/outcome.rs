/*!
 * Pairing Outcomes
 * The closed set of results a request can end with
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::AddressError;

/// Native call used to establish the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Pair,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Pair => f.write_str("pairing"),
            Operation::Connect => f.write_str("connection"),
        }
    }
}

/// Why the radio cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unavailable {
    RadioOff,
    Unauthorized,
    Unknown,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::RadioOff => f.write_str("radio is off"),
            Unavailable::Unauthorized => f.write_str("access is unauthorized"),
            Unavailable::Unknown => f.write_str("state unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    #[error("invalid device address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("device not found")]
    DeviceNotFound,

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(Unavailable),

    #[error("{operation} failed: {}", .detail.as_deref().unwrap_or("no diagnostic"))]
    OperationFailed {
        operation: Operation,
        detail: Option<String>,
    },
}

impl PairingError {
    /// Wire code reported to the host application.
    pub fn code(&self) -> &'static str {
        match self {
            PairingError::InvalidAddress(_) => "INVALID_ADDRESS",
            PairingError::DeviceNotFound => "DEVICE_NOT_FOUND",
            PairingError::AdapterUnavailable(Unavailable::RadioOff) => "BLUETOOTH_OFF",
            PairingError::AdapterUnavailable(Unavailable::Unauthorized) => "UNAUTHORIZED",
            PairingError::AdapterUnavailable(Unavailable::Unknown) => "BLUETOOTH_ERROR",
            PairingError::OperationFailed { operation: Operation::Pair, .. } => "PAIRING_FAILED",
            PairingError::OperationFailed { operation: Operation::Connect, .. } => {
                "CONNECTION_FAILED"
            }
        }
    }

    /// Human-readable message for display by the host.
    pub fn message(&self) -> &'static str {
        match self {
            PairingError::InvalidAddress(AddressError::Missing) => "Device address is null",
            PairingError::InvalidAddress(_) => "Invalid device address",
            PairingError::DeviceNotFound => "Device not found",
            PairingError::AdapterUnavailable(Unavailable::RadioOff) => "Bluetooth is turned off",
            PairingError::AdapterUnavailable(Unavailable::Unauthorized) => {
                "Bluetooth access is unauthorized"
            }
            PairingError::AdapterUnavailable(Unavailable::Unknown) => "Bluetooth is not available",
            PairingError::OperationFailed { operation: Operation::Pair, .. } => {
                "Failed to initiate pairing"
            }
            PairingError::OperationFailed { operation: Operation::Connect, .. } => {
                "Failed to connect to device"
            }
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            PairingError::InvalidAddress(reason) => Some(reason.to_string()),
            PairingError::OperationFailed { detail, .. } => detail.clone(),
            PairingError::DeviceNotFound | PairingError::AdapterUnavailable(_) => None,
        }
    }
}

/// Terminal result of one pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired,
    Connected,
    Failed(PairingError),
}

impl PairingOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, PairingOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&PairingError> {
        match self {
            PairingOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<PairingError> for PairingOutcome {
    fn from(error: PairingError) -> Self {
        PairingOutcome::Failed(error)
    }
}

impl fmt::Display for PairingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingOutcome::Paired => f.write_str("paired"),
            PairingOutcome::Connected => f.write_str("connected"),
            PairingOutcome::Failed(error) => write!(f, "failed ({}): {}", error.code(), error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_cover_the_closed_set() {
        let cases = [
            (PairingError::InvalidAddress(AddressError::Empty), "INVALID_ADDRESS"),
            (PairingError::DeviceNotFound, "DEVICE_NOT_FOUND"),
            (PairingError::AdapterUnavailable(Unavailable::RadioOff), "BLUETOOTH_OFF"),
            (PairingError::AdapterUnavailable(Unavailable::Unauthorized), "UNAUTHORIZED"),
            (PairingError::AdapterUnavailable(Unavailable::Unknown), "BLUETOOTH_ERROR"),
            (
                PairingError::OperationFailed { operation: Operation::Pair, detail: None },
                "PAIRING_FAILED",
            ),
            (
                PairingError::OperationFailed { operation: Operation::Connect, detail: None },
                "CONNECTION_FAILED",
            ),
        ];

        for (error, code) in cases {
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn test_missing_address_keeps_the_null_message() {
        let missing = PairingError::InvalidAddress(AddressError::Missing);
        assert_eq!(missing.message(), "Device address is null");

        let malformed = PairingError::InvalidAddress(AddressError::BadMac("x".into()));
        assert_eq!(malformed.message(), "Invalid device address");
    }

    #[test]
    fn test_native_diagnostic_is_carried_verbatim() {
        let error = PairingError::OperationFailed {
            operation: Operation::Connect,
            detail: Some("timeout".into()),
        };
        assert_eq!(error.details().as_deref(), Some("timeout"));
        assert_eq!(error.to_string(), "connection failed: timeout");
    }

    #[test]
    fn test_availability_errors_have_no_details() {
        assert_eq!(PairingError::DeviceNotFound.details(), None);
        assert_eq!(PairingError::AdapterUnavailable(Unavailable::RadioOff).details(), None);
    }
}
