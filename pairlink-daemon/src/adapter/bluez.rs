/*!
 * BlueZ Adapter
 * Device pairing and connection via BlueZ D-Bus
 */

use async_trait::async_trait;
use dbus::nonblock::stdintf::org_freedesktop_dbus::Properties;
use dbus::nonblock::{Proxy, SyncConnection};
use dbus_tokio::connection;
use std::sync::Arc;
use std::time::Duration;

use super::{AdapterError, AdapterSignal, NativeAdapter, RadioState, ResolvedDevice, SignalSink};
use crate::address::{AddressScheme, DeviceAddress};
use crate::outcome::Operation;

const BLUEZ: &str = "org.bluez";
const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
const DEVICE_INTERFACE: &str = "org.bluez.Device1";

// Pair can block on the remote side confirming
const CALL_TIMEOUT: Duration = Duration::from_secs(90);

pub struct BluezAdapter {
    connection: Arc<SyncConnection>,
    controller: String,
    operation: Operation,
}

impl BluezAdapter {
    pub async fn connect(controller: &str, operation: Operation) -> Result<Self, AdapterError> {
        if controller.is_empty()
            || !controller.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AdapterError::Unavailable(format!(
                "invalid controller name {controller:?}"
            )));
        }

        let (resource, connection) =
            connection::new_system_sync().map_err(|e| classify(&e))?;
        tokio::spawn(async move {
            let err = resource.await;
            tracing::error!("Lost connection to the system bus: {}", err);
        });

        let adapter = Self {
            connection,
            controller: controller.to_string(),
            operation,
        };

        match adapter.radio_state().await {
            Ok(state) => tracing::info!("BlueZ controller {} is {:?}", controller, state),
            Err(e) => tracing::warn!("BlueZ controller {} not usable yet: {}", controller, e),
        }

        Ok(adapter)
    }

    fn proxy(&self, path: String) -> Proxy<'static, Arc<SyncConnection>> {
        Proxy::new(BLUEZ, path, CALL_TIMEOUT, self.connection.clone())
    }
}

fn controller_path(controller: &str) -> String {
    format!("/org/bluez/{}", controller)
}

fn device_path(controller: &str, address: &DeviceAddress) -> String {
    format!(
        "/org/bluez/{}/dev_{}",
        controller,
        address.to_string().replace(':', "_")
    )
}

fn is_missing_object(e: &dbus::Error) -> bool {
    matches!(
        e.name(),
        Some("org.freedesktop.DBus.Error.UnknownObject")
            | Some("org.freedesktop.DBus.Error.UnknownInterface")
            | Some("org.freedesktop.DBus.Error.UnknownMethod")
            | Some("org.freedesktop.DBus.Error.InvalidArgs")
    )
}

fn classify(e: &dbus::Error) -> AdapterError {
    let message = e
        .message()
        .or(e.name())
        .unwrap_or("unknown D-Bus error")
        .to_string();

    match e.name() {
        Some("org.bluez.Error.NotReady") => AdapterError::RadioOff,
        Some("org.freedesktop.DBus.Error.AccessDenied") | Some("org.bluez.Error.NotAuthorized") => {
            AdapterError::Unauthorized
        }
        Some("org.freedesktop.DBus.Error.ServiceUnknown")
        | Some("org.freedesktop.DBus.Error.NameHasNoOwner")
        | Some("org.freedesktop.DBus.Error.NoServer")
        | Some("org.freedesktop.DBus.Error.FileNotFound") => AdapterError::Unavailable(message),
        _ => AdapterError::Native(message),
    }
}

/// Turns the reply to `Pair`/`Connect` into the signal the session sees.
fn reply_signal(operation: Operation, reply: Result<(), dbus::Error>) -> AdapterSignal {
    match reply {
        Ok(()) => match operation {
            Operation::Pair => AdapterSignal::Paired,
            Operation::Connect => AdapterSignal::Connected,
        },
        // Bonded earlier, nothing left to do
        Err(e) if operation == Operation::Pair && e.name() == Some("org.bluez.Error.AlreadyExists") => {
            AdapterSignal::Paired
        }
        Err(e) => match classify(&e) {
            AdapterError::RadioOff => AdapterSignal::RadioStateChanged(RadioState::PoweredOff),
            AdapterError::Unauthorized => AdapterSignal::RadioStateChanged(RadioState::Unauthorized),
            AdapterError::Native(message) => AdapterSignal::Failed(Some(message)),
            other => AdapterSignal::Failed(Some(other.to_string())),
        },
    }
}

#[async_trait]
impl NativeAdapter for BluezAdapter {
    fn name(&self) -> &str {
        "bluez"
    }

    fn addressing(&self) -> AddressScheme {
        AddressScheme::Mac
    }

    fn operation(&self) -> Operation {
        self.operation
    }

    async fn radio_state(&self) -> Result<RadioState, AdapterError> {
        let proxy = self.proxy(controller_path(&self.controller));
        match proxy.get::<bool>(ADAPTER_INTERFACE, "Powered").await {
            Ok(true) => Ok(RadioState::PoweredOn),
            Ok(false) => Ok(RadioState::PoweredOff),
            Err(e) if is_missing_object(&e) => Err(AdapterError::Unavailable(format!(
                "no controller named {}",
                self.controller
            ))),
            Err(e) => Err(classify(&e)),
        }
    }

    async fn resolve(&self, address: &DeviceAddress) -> Result<Option<ResolvedDevice>, AdapterError> {
        if address.scheme() != AddressScheme::Mac {
            return Err(AdapterError::Unresolvable(address.to_string()));
        }

        let proxy = self.proxy(device_path(&self.controller, address));
        match proxy.get::<String>(DEVICE_INTERFACE, "Address").await {
            Ok(reported) => {
                let name = proxy.get::<String>(DEVICE_INTERFACE, "Alias").await.ok();
                tracing::debug!("BlueZ knows {} as {:?}", reported, name);
                Ok(Some(ResolvedDevice {
                    address: *address,
                    name,
                }))
            }
            Err(e) if is_missing_object(&e) => Ok(None),
            Err(e) => Err(classify(&e)),
        }
    }

    async fn begin(
        &self,
        device: &ResolvedDevice,
        operation: Operation,
        sink: SignalSink,
    ) -> Result<(), AdapterError> {
        let proxy = self.proxy(device_path(&self.controller, &device.address));
        let method = match operation {
            Operation::Pair => "Pair",
            Operation::Connect => "Connect",
        };
        tracing::info!("Calling {}.{} on {}", DEVICE_INTERFACE, method, device.address);

        tokio::spawn(async move {
            let reply: Result<(), dbus::Error> = proxy.method_call(DEVICE_INTERFACE, method, ()).await;
            sink.signal(reply_signal(operation, reply));
        });

        Ok(())
    }

    async fn cancel(&self, device: &ResolvedDevice, operation: Operation) -> Result<(), AdapterError> {
        let proxy = self.proxy(device_path(&self.controller, &device.address));
        let method = match operation {
            Operation::Pair => "CancelPairing",
            Operation::Connect => "Disconnect",
        };
        tracing::info!("Calling {}.{} on {}", DEVICE_INTERFACE, method, device.address);

        let reply: Result<(), dbus::Error> = proxy.method_call(DEVICE_INTERFACE, method, ()).await;
        reply.map_err(|e| classify(&e))
    }
}
