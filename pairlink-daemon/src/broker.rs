/*!
 * Pairing Broker
 * Drives one request at a time through the native adapter
 */

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::adapter::{NativeAdapter, ResolvedDevice};
use crate::address::{AddressScheme, DeviceAddress};
use crate::outcome::{Operation, PairingError, PairingOutcome};
use crate::session::{radio_failure, timed_out, AdapterSession, Phase};

#[derive(Debug, Clone, Default)]
pub struct BrokerSettings {
    /// Upper bound on a whole request, from lookup to the native stack's
    /// answer. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

pub struct PairingBroker {
    adapter: Arc<dyn NativeAdapter>,
    addressing: AddressScheme,
    operation: Operation,
    settings: BrokerSettings,
    // Held for the whole request; later callers queue here in arrival order.
    in_flight: Mutex<()>,
}

impl PairingBroker {
    pub fn new(adapter: Arc<dyn NativeAdapter>, settings: BrokerSettings) -> Self {
        Self {
            addressing: adapter.addressing(),
            operation: adapter.operation(),
            adapter,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn request_pairing(&self, address: &str) -> PairingOutcome {
        let address = match DeviceAddress::parse(address, self.addressing) {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!("Rejecting pairing request: {}", e);
                return PairingError::InvalidAddress(e).into();
            }
        };

        let _turn = self.in_flight.lock().await;
        let session = AdapterSession::open(address);
        let limit = self.settings.request_timeout;
        tracing::info!(
            session = %session.id(),
            adapter = self.adapter.name(),
            "Starting {} with {}",
            self.operation,
            address
        );

        let started = match session.deadline(limit) {
            Some(deadline) => tokio::time::timeout_at(deadline, self.start(&session))
                .await
                .ok(),
            None => Some(self.start(&session).await),
        };

        let device = match started {
            Some(Ok(device)) => Some(device),
            Some(Err(error)) => {
                session.resolve(error.into());
                None
            }
            None => {
                // Nothing was handed to the native stack that could be cancelled.
                tracing::warn!(
                    session = %session.id(),
                    "{} adapter stuck while {:?}, giving up",
                    self.adapter.name(),
                    session.phase()
                );
                session.resolve(timed_out(self.operation, limit.unwrap_or_default()));
                None
            }
        };

        let id = session.id();
        let opened_at = session.opened_at();
        let finish = session.finish(limit).await;

        if finish.expired {
            tracing::warn!(session = %id, "No response from {} adapter, cancelling", self.adapter.name());
            if let Some(device) = &device {
                if let Err(e) = self.adapter.cancel(device, self.operation).await {
                    tracing::debug!(session = %id, "Cancel failed: {}", e);
                }
            }
        }

        let elapsed = Utc::now() - opened_at;
        tracing::info!(
            session = %id,
            elapsed_ms = elapsed.num_milliseconds(),
            "Request for {} {}",
            address,
            finish.outcome
        );
        finish.outcome
    }

    /// Runs the session up to the point where the native stack owns it.
    async fn start(&self, session: &AdapterSession) -> Result<ResolvedDevice, PairingError> {
        session.advance(Phase::Resolving);
        let device = self
            .adapter
            .resolve(session.device())
            .await
            .map_err(|e| e.before_call())?
            .ok_or(PairingError::DeviceNotFound)?;
        tracing::debug!(session = %session.id(), "Resolved {}", device);

        self.check_radio().await?;

        session.advance(Phase::from(self.operation));
        self.adapter
            .begin(&device, self.operation, session.sink())
            .await
            .map_err(|e| e.during_call(self.operation))?;

        Ok(device)
    }

    async fn check_radio(&self) -> Result<(), PairingError> {
        let state = self.adapter.radio_state().await.map_err(|e| e.before_call())?;
        if state.blocks_requests() {
            return Err(radio_failure(state));
        }
        Ok(())
    }
}
