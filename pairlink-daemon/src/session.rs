/*!
 * Adapter Session
 * Per-request state machine and single-assignment result slot
 */

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::adapter::{AdapterSignal, RadioState};
use crate::address::DeviceAddress;
use crate::outcome::{Operation, PairingError, PairingOutcome, Unavailable};

const ABANDONED: &str = "adapter released the request without reporting a result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Pairing,
    Connecting,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    fn operation(self) -> Operation {
        match self {
            Phase::Pairing => Operation::Pair,
            _ => Operation::Connect,
        }
    }
}

impl From<Operation> for Phase {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Pair => Phase::Pairing,
            Operation::Connect => Phase::Connecting,
        }
    }
}

/// Maps a radio state reported mid-request onto the failure it causes.
pub fn radio_failure(state: RadioState) -> PairingError {
    match state {
        RadioState::PoweredOff => PairingError::AdapterUnavailable(Unavailable::RadioOff),
        RadioState::Unauthorized => PairingError::AdapterUnavailable(Unavailable::Unauthorized),
        _ => PairingError::AdapterUnavailable(Unavailable::Unknown),
    }
}

struct Shared {
    id: Uuid,
    phase: Mutex<Phase>,
    resolved: AtomicBool,
    slot: Mutex<Option<oneshot::Sender<PairingOutcome>>>,
}

impl Shared {
    fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First caller wins; everyone after gets `false` and their outcome is dropped.
    fn claim(&self, outcome: PairingOutcome) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }

        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = if outcome.is_success() {
            Phase::Succeeded
        } else {
            Phase::Failed
        };

        let sender = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
        true
    }
}

/// Resolves the session when the last sink goes away without a terminal signal.
struct Release(Arc<Shared>);

impl Drop for Release {
    fn drop(&mut self) {
        let operation = self.0.phase().operation();
        let abandoned = PairingOutcome::Failed(PairingError::OperationFailed {
            operation,
            detail: Some(ABANDONED.to_string()),
        });
        if self.0.claim(abandoned) {
            tracing::warn!(session = %self.0.id, "{}", ABANDONED);
        }
    }
}

/// Handle the native stack uses to report progress on one request.
///
/// Cheap to clone and safe to call from any thread.
#[derive(Clone)]
pub struct SignalSink {
    shared: Arc<Shared>,
    _release: Arc<Release>,
}

impl SignalSink {
    pub fn signal(&self, signal: AdapterSignal) {
        let outcome = match signal {
            AdapterSignal::RadioStateChanged(RadioState::PoweredOn) => {
                tracing::debug!(session = %self.shared.id, "radio powered on");
                return;
            }
            AdapterSignal::RadioStateChanged(state) => PairingOutcome::Failed(radio_failure(state)),
            AdapterSignal::Paired => PairingOutcome::Paired,
            AdapterSignal::Connected => PairingOutcome::Connected,
            AdapterSignal::Failed(detail) => PairingOutcome::Failed(PairingError::OperationFailed {
                operation: self.shared.phase().operation(),
                detail,
            }),
        };

        if !self.shared.claim(outcome.clone()) {
            tracing::debug!(
                session = %self.shared.id,
                "dropping late signal ({}), request already resolved",
                outcome
            );
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.resolved.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSink")
            .field("session", &self.shared.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Result of waiting on a session.
#[derive(Debug)]
pub struct Finish {
    pub outcome: PairingOutcome,
    /// The time limit ran out and the timeout outcome was the one delivered.
    pub expired: bool,
}

/// Everything the broker tracks for a single in-flight request.
pub struct AdapterSession {
    shared: Arc<Shared>,
    device: DeviceAddress,
    opened_at: DateTime<Utc>,
    started: Instant,
    receiver: oneshot::Receiver<PairingOutcome>,
    release: Arc<Release>,
}

impl AdapterSession {
    pub fn open(device: DeviceAddress) -> Self {
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            phase: Mutex::new(Phase::Idle),
            resolved: AtomicBool::new(false),
            slot: Mutex::new(Some(sender)),
        });

        Self {
            release: Arc::new(Release(shared.clone())),
            shared,
            device,
            opened_at: Utc::now(),
            started: Instant::now(),
            receiver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn device(&self) -> &DeviceAddress {
        &self.device
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// The instant `limit` runs out, counted from when the session was opened.
    pub fn deadline(&self, limit: Option<Duration>) -> Option<Instant> {
        limit.map(|limit| self.started + limit)
    }

    /// Moves to a non-terminal phase. Returns `false` once the session is resolved.
    pub fn advance(&self, next: Phase) -> bool {
        debug_assert!(!next.is_terminal(), "terminal phases are reached by resolving");
        let mut phase = self.shared.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.is_terminal() || next.is_terminal() {
            return false;
        }
        *phase = next;
        true
    }

    pub fn sink(&self) -> SignalSink {
        SignalSink {
            shared: self.shared.clone(),
            _release: self.release.clone(),
        }
    }

    /// Resolves from the broker side. Same first-wins rule as adapter signals.
    pub fn resolve(&self, outcome: PairingOutcome) -> bool {
        self.shared.claim(outcome)
    }

    /// Waits for the terminal outcome. `limit` counts from `open`, so time
    /// spent resolving the device is already used up.
    pub async fn finish(self, limit: Option<Duration>) -> Finish {
        let deadline = self.deadline(limit);
        let AdapterSession {
            shared,
            mut receiver,
            release,
            ..
        } = self;
        drop(release);

        let received = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut receiver).await.ok(),
            None => Some((&mut receiver).await),
        };

        match received {
            Some(Ok(outcome)) => Finish {
                outcome,
                expired: false,
            },
            Some(Err(_)) => Finish {
                outcome: abandoned(shared.phase().operation()),
                expired: false,
            },
            None => {
                let operation = shared.phase().operation();
                let expired = shared.claim(timed_out(operation, limit.unwrap_or_default()));

                // Whoever claimed has sent (or is about to send) into the slot.
                let outcome = receiver.await.unwrap_or_else(|_| abandoned(operation));
                Finish { outcome, expired }
            }
        }
    }
}

/// Outcome for a request the native stack did not finish within `limit`.
pub fn timed_out(operation: Operation, limit: Duration) -> PairingOutcome {
    PairingOutcome::Failed(PairingError::OperationFailed {
        operation,
        detail: Some(format!("no response from adapter after {:?}", limit)),
    })
}

fn abandoned(operation: Operation) -> PairingOutcome {
    PairingOutcome::Failed(PairingError::OperationFailed {
        operation,
        detail: Some(ABANDONED.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AdapterSession {
        AdapterSession::open(DeviceAddress::Mac([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
    }

    #[tokio::test]
    async fn test_first_terminal_signal_wins() {
        let session = session();
        session.advance(Phase::Connecting);
        let sink = session.sink();

        sink.signal(AdapterSignal::RadioStateChanged(RadioState::PoweredOff));
        sink.signal(AdapterSignal::Connected);
        assert!(sink.is_resolved());
        drop(sink);

        let finish = session.finish(None).await;
        assert_eq!(
            finish.outcome,
            PairingOutcome::Failed(PairingError::AdapterUnavailable(Unavailable::RadioOff))
        );
    }

    #[tokio::test]
    async fn test_powered_on_is_not_terminal() {
        let session = session();
        session.advance(Phase::Pairing);
        let sink = session.sink();

        sink.signal(AdapterSignal::RadioStateChanged(RadioState::PoweredOn));
        assert!(!sink.is_resolved());
        assert_eq!(session.phase(), Phase::Pairing);

        sink.signal(AdapterSignal::Paired);
        assert_eq!(session.phase(), Phase::Succeeded);
        assert_eq!(session.finish(None).await.outcome, PairingOutcome::Paired);
    }

    #[tokio::test]
    async fn test_failure_carries_the_current_operation() {
        let session = session();
        session.advance(Phase::Pairing);
        session.sink().signal(AdapterSignal::Failed(Some("AuthenticationFailed".into())));

        let outcome = session.finish(None).await.outcome;
        assert_eq!(outcome.error().map(PairingError::code), Some("PAIRING_FAILED"));
    }

    #[tokio::test]
    async fn test_terminal_phase_is_final() {
        let session = session();
        assert!(session.advance(Phase::Resolving));
        assert!(session.resolve(PairingOutcome::Failed(PairingError::DeviceNotFound)));
        assert!(!session.advance(Phase::Connecting));
        assert!(!session.resolve(PairingOutcome::Connected));
        assert_eq!(session.phase(), Phase::Failed);

        let finish = session.finish(None).await;
        assert_eq!(finish.outcome, PairingOutcome::Failed(PairingError::DeviceNotFound));
    }

    #[tokio::test]
    async fn test_dropping_every_sink_resolves_the_session() {
        let session = session();
        session.advance(Phase::Connecting);
        let sink = session.sink();
        let handle = std::thread::spawn(move || drop(sink));
        handle.join().unwrap();

        let outcome = session.finish(None).await.outcome;
        assert_eq!(
            outcome,
            PairingOutcome::Failed(PairingError::OperationFailed {
                operation: Operation::Connect,
                detail: Some(ABANDONED.to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_time_limit_resolves_a_silent_adapter() {
        let session = session();
        session.advance(Phase::Connecting);
        let sink = session.sink();

        let finish = session.finish(Some(Duration::from_millis(20))).await;
        assert!(finish.expired);
        assert_eq!(
            finish.outcome.error().and_then(PairingError::details).as_deref(),
            Some("no response from adapter after 20ms")
        );

        // Arrives too late to matter.
        sink.signal(AdapterSignal::Connected);
        assert!(sink.is_resolved());
    }

    #[tokio::test]
    async fn test_time_limit_counts_from_open() {
        let session = session();
        let sink = session.sink();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Most of the budget went before the wait started.
        let waited = Instant::now();
        let finish = session.finish(Some(Duration::from_millis(250))).await;
        assert!(finish.expired);
        assert!(waited.elapsed() < Duration::from_millis(200));
        drop(sink);
    }

    #[tokio::test]
    async fn test_signals_from_other_threads() {
        let session = session();
        session.advance(Phase::Connecting);
        let sinks: Vec<_> = (0..8).map(|_| session.sink()).collect();

        let handles: Vec<_> = sinks
            .into_iter()
            .enumerate()
            .map(|(i, sink)| {
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        sink.signal(AdapterSignal::Connected);
                    } else {
                        sink.signal(AdapterSignal::Failed(Some(format!("attempt {i}"))));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one of the eight made it through.
        let outcome = session.finish(None).await.outcome;
        assert!(matches!(
            outcome,
            PairingOutcome::Connected | PairingOutcome::Failed(PairingError::OperationFailed { .. })
        ));
    }
}
