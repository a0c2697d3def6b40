/*!
 * pairlink
 * Bluetooth pairing broker behind a single method channel
 */

pub mod adapter;
pub mod address;
pub mod broker;
pub mod channel;
pub mod config;
pub mod ipc;
pub mod outcome;
pub mod session;

pub use adapter::NativeAdapter;
pub use address::{AddressScheme, DeviceAddress};
pub use broker::{BrokerSettings, PairingBroker};
pub use channel::{MethodCall, MethodChannel, Response};
pub use config::DaemonConfig;
pub use outcome::{Operation, PairingError, PairingOutcome};
