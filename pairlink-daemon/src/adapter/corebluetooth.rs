/*!
 * CoreBluetooth Adapter
 * Peripheral retrieval and connection through the central manager
 */

use async_trait::async_trait;
use core_bluetooth::central::peripheral::Peripheral;
use core_bluetooth::central::{CentralEvent, CentralManager};
use core_bluetooth::uuid::Uuid as CbUuid;
use core_bluetooth::ManagerState;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{AdapterError, AdapterSignal, NativeAdapter, RadioState, ResolvedDevice, SignalSink};
use crate::address::{AddressScheme, DeviceAddress};
use crate::outcome::Operation;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the async side and the delegate event thread.
#[derive(Default)]
struct Routing {
    state: Option<RadioState>,
    lookup: Option<oneshot::Sender<Vec<Peripheral>>>,
    active: Option<(Peripheral, SignalSink)>,
}

pub struct CoreBluetoothAdapter {
    central: CentralManager,
    routing: Arc<Mutex<Routing>>,
    peripherals: Mutex<HashMap<Uuid, Peripheral>>,
}

impl CoreBluetoothAdapter {
    pub fn new() -> Result<Self, AdapterError> {
        let (central, events) = CentralManager::new();
        let routing = Arc::new(Mutex::new(Routing::default()));

        let pump_routing = routing.clone();
        std::thread::Builder::new()
            .name("corebluetooth-events".to_string())
            .spawn(move || pump(events, pump_routing))
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;

        Ok(Self {
            central,
            routing,
            peripherals: Mutex::new(HashMap::new()),
        })
    }

    fn routing(&self) -> MutexGuard<'_, Routing> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, uuid: &Uuid) -> Option<Peripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .cloned()
    }
}

fn radio_state(state: ManagerState) -> RadioState {
    match state {
        ManagerState::PoweredOn => RadioState::PoweredOn,
        ManagerState::PoweredOff => RadioState::PoweredOff,
        ManagerState::Unauthorized => RadioState::Unauthorized,
        ManagerState::Unsupported => RadioState::Unsupported,
        ManagerState::Resetting => RadioState::Resetting,
        _ => RadioState::Unknown,
    }
}

/// Takes the active sink if `peripheral` is the one being connected.
fn take_active(routing: &mut Routing, peripheral: &Peripheral) -> Option<SignalSink> {
    match &routing.active {
        Some((target, _)) if target == peripheral => routing.active.take().map(|(_, sink)| sink),
        _ => None,
    }
}

fn pump(events: Receiver<CentralEvent>, routing: Arc<Mutex<Routing>>) {
    for event in events.iter() {
        let mut routing = routing.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            CentralEvent::ManagerStateChanged { new_state } => {
                let state = radio_state(new_state);
                tracing::debug!("CoreBluetooth manager state is {:?}", state);
                routing.state = Some(state);
                if let Some((_, sink)) = &routing.active {
                    sink.signal(AdapterSignal::RadioStateChanged(state));
                }
            }
            CentralEvent::GetPeripheralsResult { peripherals, .. } => {
                if let Some(lookup) = routing.lookup.take() {
                    let _ = lookup.send(peripherals);
                }
            }
            CentralEvent::PeripheralConnected { peripheral } => {
                if let Some(sink) = take_active(&mut routing, &peripheral) {
                    sink.signal(AdapterSignal::Connected);
                }
            }
            CentralEvent::PeripheralConnectFailed { peripheral, error } => {
                if let Some(sink) = take_active(&mut routing, &peripheral) {
                    sink.signal(AdapterSignal::Failed(error.map(|e| e.to_string())));
                }
            }
            _ => {}
        }
    }
    tracing::warn!("CoreBluetooth event stream closed");
}

#[async_trait]
impl NativeAdapter for CoreBluetoothAdapter {
    fn name(&self) -> &str {
        "corebluetooth"
    }

    fn addressing(&self) -> AddressScheme {
        AddressScheme::Uuid
    }

    fn operation(&self) -> Operation {
        // No direct pairing API; the system pairs on connect when needed.
        Operation::Connect
    }

    async fn radio_state(&self) -> Result<RadioState, AdapterError> {
        Ok(self.routing().state.unwrap_or(RadioState::Unknown))
    }

    async fn resolve(&self, address: &DeviceAddress) -> Result<Option<ResolvedDevice>, AdapterError> {
        let DeviceAddress::Uuid(uuid) = address else {
            return Err(AdapterError::Unresolvable(address.to_string()));
        };

        let (lookup, answer) = oneshot::channel();
        self.routing().lookup = Some(lookup);
        self.central.get_peripherals(&[CbUuid::from_bytes(*uuid.as_bytes())]);

        let peripherals = tokio::time::timeout(LOOKUP_TIMEOUT, answer)
            .await
            .map_err(|_| {
                AdapterError::Unavailable("no answer to peripheral lookup".to_string())
            })?
            .map_err(|_| AdapterError::Unavailable("event stream closed".to_string()))?;

        Ok(peripherals.into_iter().next().map(|peripheral| {
            self.peripherals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(*uuid, peripheral);
            ResolvedDevice {
                address: *address,
                name: None,
            }
        }))
    }

    async fn begin(
        &self,
        device: &ResolvedDevice,
        _operation: Operation,
        sink: SignalSink,
    ) -> Result<(), AdapterError> {
        let DeviceAddress::Uuid(uuid) = &device.address else {
            return Err(AdapterError::Unresolvable(device.address.to_string()));
        };
        let peripheral = self
            .peripheral(uuid)
            .ok_or_else(|| AdapterError::Unresolvable(device.address.to_string()))?;

        {
            let mut routing = self.routing();
            // The delegate may already have told us the radio is unusable.
            if let Some(state) = routing.state.filter(|s| s.blocks_requests()) {
                sink.signal(AdapterSignal::RadioStateChanged(state));
            }
            routing.active = Some((peripheral.clone(), sink));
        }

        self.central.connect(&peripheral);
        Ok(())
    }

    async fn cancel(&self, device: &ResolvedDevice, _operation: Operation) -> Result<(), AdapterError> {
        if let DeviceAddress::Uuid(uuid) = &device.address {
            if let Some(peripheral) = self.peripheral(uuid) {
                self.central.cancel_connect(&peripheral);
            }
        }
        self.routing().active = None;
        Ok(())
    }
}
