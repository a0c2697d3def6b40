/*!
 * Native Adapter Interface
 * One capability trait, one implementation per Bluetooth stack
 */

#[cfg(target_os = "linux")]
pub mod bluez;
#[cfg(target_os = "macos")]
pub mod corebluetooth;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::address::{AddressError, AddressScheme, DeviceAddress};
use crate::config::{Backend, BluetoothConfig};
use crate::outcome::{Operation, PairingError, Unavailable};

pub use crate::session::SignalSink;
pub use simulated::SimulatedAdapter;

/// Local radio state as reported by the native stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    /// States that rule out a request before any native call is made.
    /// `Unknown` and `Resetting` are not among them: CoreBluetooth reports
    /// `Unknown` until its first state callback.
    pub fn blocks_requests(self) -> bool {
        matches!(
            self,
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported
        )
    }
}

/// Asynchronous notification from the native stack about an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSignal {
    RadioStateChanged(RadioState),
    Paired,
    Connected,
    /// The native call failed; carries the stack's diagnostic if it gave one.
    Failed(Option<String>),
}

/// A device the adapter knows how to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("address {0} cannot be resolved by this adapter")]
    Unresolvable(String),
    #[error("bluetooth radio is powered off")]
    RadioOff,
    #[error("bluetooth access is unauthorized")]
    Unauthorized,
    #[error("bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Native(String),
}

impl AdapterError {
    /// Maps a failure raised before any native call was issued.
    pub fn before_call(self) -> PairingError {
        match self {
            AdapterError::Unresolvable(address) => {
                PairingError::InvalidAddress(AddressError::Unresolvable(address))
            }
            AdapterError::RadioOff => PairingError::AdapterUnavailable(Unavailable::RadioOff),
            AdapterError::Unauthorized => {
                PairingError::AdapterUnavailable(Unavailable::Unauthorized)
            }
            AdapterError::Unavailable(_) | AdapterError::Native(_) => {
                PairingError::AdapterUnavailable(Unavailable::Unknown)
            }
        }
    }

    /// Maps a failure raised while issuing the native call.
    pub fn during_call(self, operation: Operation) -> PairingError {
        match self {
            AdapterError::Native(message) => PairingError::OperationFailed {
                operation,
                detail: Some(message),
            },
            other => other.before_call(),
        }
    }
}

#[async_trait]
pub trait NativeAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn addressing(&self) -> AddressScheme;

    /// Whether this stack establishes the link by pairing or by connecting.
    fn operation(&self) -> Operation;

    async fn radio_state(&self) -> Result<RadioState, AdapterError>;

    /// Looks the address up. `Ok(None)` means the stack has no such device.
    async fn resolve(&self, address: &DeviceAddress)
        -> Result<Option<ResolvedDevice>, AdapterError>;

    /// Issues the native call. Results arrive later through `sink`, from
    /// whatever task or thread the stack calls back on.
    async fn begin(
        &self,
        device: &ResolvedDevice,
        operation: Operation,
        sink: SignalSink,
    ) -> Result<(), AdapterError>;

    /// Best-effort abort of an in-flight call.
    async fn cancel(&self, _device: &ResolvedDevice, _operation: Operation) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Builds the backend selected in the configuration.
pub async fn from_config(config: &BluetoothConfig) -> anyhow::Result<Arc<dyn NativeAdapter>> {
    match config.backend {
        Backend::Simulated => Ok(Arc::new(SimulatedAdapter::from_config(
            &config.simulated,
            config.operation,
        )?)),
        #[cfg(target_os = "linux")]
        Backend::Bluez => Ok(Arc::new(
            bluez::BluezAdapter::connect(&config.adapter, config.operation).await?,
        )),
        #[cfg(target_os = "macos")]
        Backend::CoreBluetooth => Ok(Arc::new(corebluetooth::CoreBluetoothAdapter::new()?)),
        other => anyhow::bail!("{:?} backend is not available on this platform", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_errors_depend_on_call_phase() {
        let error = AdapterError::Native("org.bluez.Error.Failed".into());
        assert_eq!(
            error.clone().before_call(),
            PairingError::AdapterUnavailable(Unavailable::Unknown)
        );
        assert_eq!(
            error.during_call(Operation::Pair),
            PairingError::OperationFailed {
                operation: Operation::Pair,
                detail: Some("org.bluez.Error.Failed".into()),
            }
        );
    }

    #[test]
    fn test_unresolvable_is_an_address_problem() {
        let error = AdapterError::Unresolvable("AA:BB:CC:DD:EE:FF".into()).before_call();
        assert_eq!(error.code(), "INVALID_ADDRESS");
    }

    #[test]
    fn test_only_unusable_radios_block_requests() {
        assert!(RadioState::PoweredOff.blocks_requests());
        assert!(RadioState::Unauthorized.blocks_requests());
        assert!(RadioState::Unsupported.blocks_requests());
        assert!(!RadioState::PoweredOn.blocks_requests());
        assert!(!RadioState::Unknown.blocks_requests());
        assert!(!RadioState::Resetting.blocks_requests());
    }

    #[test]
    fn test_resolved_device_shows_its_alias() {
        let address = DeviceAddress::Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let named = ResolvedDevice {
            address,
            name: Some("Headphones".into()),
        };
        assert_eq!(named.to_string(), "Headphones (AA:BB:CC:DD:EE:FF)");

        let bare = ResolvedDevice { address, name: None };
        assert_eq!(bare.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_radio_errors_keep_their_subtype_during_call() {
        assert_eq!(
            AdapterError::RadioOff.during_call(Operation::Connect),
            PairingError::AdapterUnavailable(Unavailable::RadioOff)
        );
        assert_eq!(
            AdapterError::Unauthorized.during_call(Operation::Connect),
            PairingError::AdapterUnavailable(Unavailable::Unauthorized)
        );
    }
}
