/*!
 * Simulated Adapter
 * Scripted radio for development machines and end-to-end tests
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use super::{AdapterError, AdapterSignal, NativeAdapter, RadioState, ResolvedDevice, SignalSink};
use crate::address::{AddressScheme, DeviceAddress};
use crate::config::SimulatedConfig;
use crate::outcome::Operation;

pub struct SimulatedAdapter {
    addressing: AddressScheme,
    operation: Operation,
    radio: RadioState,
    known_devices: HashSet<DeviceAddress>,
    response_delay: Duration,
    failure: Option<String>,
}

impl SimulatedAdapter {
    pub fn from_config(config: &SimulatedConfig, operation: Operation) -> Result<Self> {
        let known_devices = config
            .known_devices
            .iter()
            .map(|address| {
                DeviceAddress::parse(address, config.addressing)
                    .with_context(|| format!("invalid simulated device address {address:?}"))
            })
            .collect::<Result<HashSet<_>>>()?;

        tracing::info!(
            "Simulated adapter with {} known device(s), radio {:?}",
            known_devices.len(),
            config.radio
        );

        Ok(Self {
            addressing: config.addressing,
            operation,
            radio: config.radio,
            known_devices,
            response_delay: Duration::from_millis(config.response_delay_ms),
            failure: config.failure.clone(),
        })
    }
}

#[async_trait]
impl NativeAdapter for SimulatedAdapter {
    fn name(&self) -> &str {
        "simulated"
    }

    fn addressing(&self) -> AddressScheme {
        self.addressing
    }

    fn operation(&self) -> Operation {
        self.operation
    }

    async fn radio_state(&self) -> Result<RadioState, AdapterError> {
        Ok(self.radio)
    }

    async fn resolve(&self, address: &DeviceAddress) -> Result<Option<ResolvedDevice>, AdapterError> {
        Ok(self
            .known_devices
            .get(address)
            .map(|address| ResolvedDevice {
                address: *address,
                name: Some(format!("Simulated {address}")),
            }))
    }

    async fn begin(
        &self,
        device: &ResolvedDevice,
        operation: Operation,
        sink: SignalSink,
    ) -> Result<(), AdapterError> {
        let delay = self.response_delay;
        let radio = self.radio;
        let failure = self.failure.clone();
        tracing::debug!("Simulating {} with {}", operation, device.address);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Mirrors a real stack: the state callback comes before the result.
            sink.signal(AdapterSignal::RadioStateChanged(radio));
            let signal = match (failure, operation) {
                (Some(diagnostic), _) => AdapterSignal::Failed(Some(diagnostic)),
                (None, Operation::Pair) => AdapterSignal::Paired,
                (None, Operation::Connect) => AdapterSignal::Connected,
            };
            sink.signal(signal);
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(known: &[&str]) -> SimulatedConfig {
        SimulatedConfig {
            known_devices: known.iter().map(|s| s.to_string()).collect(),
            response_delay_ms: 0,
            ..SimulatedConfig::default()
        }
    }

    #[test]
    fn test_rejects_bad_known_devices() {
        assert!(SimulatedAdapter::from_config(&config(&["not-a-mac"]), Operation::Pair).is_err());
    }

    #[tokio::test]
    async fn test_resolves_only_known_devices() {
        let adapter =
            SimulatedAdapter::from_config(&config(&["AA:BB:CC:DD:EE:FF"]), Operation::Pair).unwrap();

        let known = DeviceAddress::parse("aa:bb:cc:dd:ee:ff", AddressScheme::Mac).unwrap();
        let unknown = DeviceAddress::parse("00:11:22:33:44:55", AddressScheme::Mac).unwrap();

        assert!(adapter.resolve(&known).await.unwrap().is_some());
        assert!(adapter.resolve(&unknown).await.unwrap().is_none());
    }
}
