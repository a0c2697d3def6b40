use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::adapter::RadioState;
use crate::address::AddressScheme;
use crate::outcome::Operation;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub channel: ChannelConfig,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Bluez,
    CoreBluetooth,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub backend: Backend,
    /// BlueZ controller name, e.g. `hci0`.
    pub adapter: String,
    pub operation: Operation,
    /// Zero disables the limit.
    pub request_timeout_secs: u64,
    pub simulated: SimulatedConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub addressing: AddressScheme,
    pub radio: RadioState,
    pub known_devices: Vec<String>,
    pub response_delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/pairlink/pairlink.sock".to_string(),
            channel: ChannelConfig::default(),
            bluetooth: BluetoothConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "pairlink/bluetooth".to_string(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            adapter: "hci0".to_string(),
            operation: Operation::Pair,
            request_timeout_secs: 60,
            simulated: SimulatedConfig::default(),
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            addressing: AddressScheme::Mac,
            radio: RadioState::PoweredOn,
            known_devices: Vec::new(),
            response_delay_ms: 50,
            failure: None,
        }
    }
}

fn default_backend() -> Backend {
    if cfg!(target_os = "linux") {
        Backend::Bluez
    } else if cfg!(target_os = "macos") {
        Backend::CoreBluetooth
    } else {
        Backend::Simulated
    }
}

impl BluetoothConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(_) => {
                // Create default config if not found
                let config = Self::default();
                if let Err(e) = fs::write(path, toml::to_string_pretty(&config)?) {
                    tracing::warn!("Could not write default config to {}: {}", path.display(), e);
                }
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairlinkd.toml");

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(path.exists());

        // And reading it back gives the same thing.
        assert_eq!(DaemonConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairlinkd.toml");
        fs::write(
            &path,
            r#"
socket_path = "/tmp/pairlink.sock"

[bluetooth]
backend = "simulated"
operation = "connect"
request_timeout_secs = 0

[bluetooth.simulated]
radio = "powered_off"
known_devices = ["AA:BB:CC:DD:EE:FF"]
failure = "timeout"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.socket_path, "/tmp/pairlink.sock");
        assert_eq!(config.channel, ChannelConfig::default());
        assert_eq!(config.bluetooth.backend, Backend::Simulated);
        assert_eq!(config.bluetooth.operation, Operation::Connect);
        assert_eq!(config.bluetooth.adapter, "hci0");
        assert_eq!(config.bluetooth.request_timeout(), None);
        assert_eq!(config.bluetooth.simulated.radio, RadioState::PoweredOff);
        assert_eq!(config.bluetooth.simulated.failure.as_deref(), Some("timeout"));
        assert_eq!(config.bluetooth.simulated.response_delay_ms, 50);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairlinkd.toml");
        fs::write(&path, "socket_path = [").unwrap();
        assert!(DaemonConfig::load(&path).is_err());
    }
}
