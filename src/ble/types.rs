//! BLE value types and their textual forms.
//!
//! Address            "AA:BB:CC:DD:EE:FF" (most significant byte first)
//! PeerAddressType    PUBLIC | RANDOM | PUBLIC_IDENTITY | RANDOM_STATIC_IDENTITY
//! DisconnectionReason / ConnectionRole / BleError
//!
//! Every enum follows the same shape: `variants()`, `as_str()`,
//! case-insensitive `from_str_ci()` and a `Display` using `as_str()`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/* ---- Address ---- */

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 6]);

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(format!("invalid address '{s}': expected 6 ':' separated bytes"));
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(format!("invalid address '{s}': byte '{part}' is not 2 hex digits"));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid address '{s}': byte '{part}' is not hex"))?;
        }
        Ok(Address(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/* ---- Enumerations ---- */

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PeerAddressType {
    #[default]
    Public,
    Random,
    PublicIdentity,
    RandomStaticIdentity,
}

impl PeerAddressType {
    pub const fn variants() -> &'static [PeerAddressType] {
        &[
            PeerAddressType::Public,
            PeerAddressType::Random,
            PeerAddressType::PublicIdentity,
            PeerAddressType::RandomStaticIdentity,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerAddressType::Public => "PUBLIC",
            PeerAddressType::Random => "RANDOM",
            PeerAddressType::PublicIdentity => "PUBLIC_IDENTITY",
            PeerAddressType::RandomStaticIdentity => "RANDOM_STATIC_IDENTITY",
        }
    }

    pub fn from_str_ci(s: &str) -> Option<Self> {
        let norm = s.trim();
        Self::variants()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(norm))
    }
}

impl fmt::Display for PeerAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a local host may give when terminating a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisconnectionReason {
    AuthenticationFailure,
    RemoteUserTerminatedConnection,
    RemoteDevTerminationDueToLowResources,
    RemoteDevTerminationDueToPowerOff,
    UnsupportedRemoteFeature,
    PairingWithUnitKeyNotSupported,
    UnacceptableConnectionParameters,
    LocalHostTerminatedConnection,
}

impl DisconnectionReason {
    pub const fn variants() -> &'static [DisconnectionReason] {
        &[
            DisconnectionReason::AuthenticationFailure,
            DisconnectionReason::RemoteUserTerminatedConnection,
            DisconnectionReason::RemoteDevTerminationDueToLowResources,
            DisconnectionReason::RemoteDevTerminationDueToPowerOff,
            DisconnectionReason::UnsupportedRemoteFeature,
            DisconnectionReason::PairingWithUnitKeyNotSupported,
            DisconnectionReason::UnacceptableConnectionParameters,
            DisconnectionReason::LocalHostTerminatedConnection,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectionReason::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            DisconnectionReason::RemoteUserTerminatedConnection => {
                "REMOTE_USER_TERMINATED_CONNECTION"
            }
            DisconnectionReason::RemoteDevTerminationDueToLowResources => {
                "REMOTE_DEV_TERMINATION_DUE_TO_LOW_RESOURCES"
            }
            DisconnectionReason::RemoteDevTerminationDueToPowerOff => {
                "REMOTE_DEV_TERMINATION_DUE_TO_POWER_OFF"
            }
            DisconnectionReason::UnsupportedRemoteFeature => "UNSUPPORTED_REMOTE_FEATURE",
            DisconnectionReason::PairingWithUnitKeyNotSupported => {
                "PAIRING_WITH_UNIT_KEY_NOT_SUPPORTED"
            }
            DisconnectionReason::UnacceptableConnectionParameters => {
                "UNACCEPTABLE_CONNECTION_PARAMETERS"
            }
            DisconnectionReason::LocalHostTerminatedConnection => {
                "LOCAL_HOST_TERMINATED_CONNECTION"
            }
        }
    }

    pub fn from_str_ci(s: &str) -> Option<Self> {
        let norm = s.trim();
        Self::variants()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(norm))
    }

    /// Reasons a local `disconnect` may use.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            DisconnectionReason::AuthenticationFailure
                | DisconnectionReason::RemoteUserTerminatedConnection
                | DisconnectionReason::RemoteDevTerminationDueToLowResources
                | DisconnectionReason::RemoteDevTerminationDueToPowerOff
                | DisconnectionReason::UnsupportedRemoteFeature
                | DisconnectionReason::PairingWithUnitKeyNotSupported
                | DisconnectionReason::UnacceptableConnectionParameters
        )
    }
}

impl fmt::Display for DisconnectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Central,
    Peripheral,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Central => "CENTRAL",
            ConnectionRole::Peripheral => "PERIPHERAL",
        }
    }
}

/* ---- Errors ---- */

/// Errors reported by the stack, rendered the way the controller names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BleError {
    InitializationIncomplete,
    AlreadyInitialized,
    InvalidState,
    InvalidParam,
    OperationNotPermitted,
    Cancelled,
    NoMem,
}

impl BleError {
    pub fn as_str(&self) -> &'static str {
        match self {
            BleError::InitializationIncomplete => "BLE_ERROR_INITIALIZATION_INCOMPLETE",
            BleError::AlreadyInitialized => "BLE_ERROR_ALREADY_INITIALIZED",
            BleError::InvalidState => "BLE_ERROR_INVALID_STATE",
            BleError::InvalidParam => "BLE_ERROR_INVALID_PARAM",
            BleError::OperationNotPermitted => "BLE_ERROR_OPERATION_NOT_PERMITTED",
            BleError::Cancelled => "BLE_ERROR_CANCELLED",
            BleError::NoMem => "BLE_ERROR_NO_MEM",
        }
    }
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BleError {}

/* --------------------------------- Tests ---------------------------------- */
