//! The phase states of the [`StateMachine`].
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

mod aggregate;
mod broadcast;
mod collect;
mod error;
mod idle;
mod shutdown;

pub use self::{
    aggregate::Aggregate,
    broadcast::Broadcast,
    collect::Collect,
    error::PhaseStateError,
    idle::Idle,
    shutdown::Shutdown,
};

use async_trait::async_trait;
use futures::StreamExt;
use tracing::Span;

use crate::state_machine::{
    coordinator::CoordinatorState,
    events::EventPublisher,
    requests::{RequestError, RequestReceiver, ResponseSender, StateMachineRequest},
    StateMachine,
};

/// Name of the current phase.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PhaseName {
    Idle,
    Collect,
    Aggregate,
    Broadcast,
    Error,
    Shutdown,
}

/// A trait that must be implemented by a state in order to move to a next
/// state.
#[async_trait]
pub trait Phase {
    /// Name of the current phase.
    const NAME: PhaseName;

    /// Runs this phase to completion.
    async fn run(&mut self) -> Result<(), PhaseStateError>;

    /// Moves from this state to the next state.
    fn next(self) -> Option<StateMachine>;
}

/// A trait that must be implemented by a state to handle a request.
pub trait Handler {
    /// Handles a request.
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError>;
}

/// The coordinator state and the I/O interfaces shared across all phase
/// states.
pub struct Shared {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
}

impl Shared {
    pub fn new(
        state: CoordinatorState,
        events: EventPublisher,
        request_rx: RequestReceiver,
    ) -> Self {
        Self {
            state,
            request_rx,
            events,
        }
    }

    /// Sets the round id on the state and on subsequently broadcast events.
    pub fn set_round_id(&mut self, id: u64) {
        self.state.round_id = id;
        self.events.set_round_id(id);
    }
}

/// The state corresponding to a phase of the round protocol.
///
/// Holds the state-dependent `private` state and the state-independent
/// `shared` state which survives state transitions.
pub struct PhaseState<S> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared,
}

impl<S> PhaseState<S>
where
    Self: Phase,
{
    /// Runs the current phase to completion, then transitions to the next
    /// phase and returns it.
    pub async fn run_phase(mut self) -> Option<StateMachine> {
        let phase = <Self as Phase>::NAME;

        info!("starting phase {:?}", phase);
        self.shared.events.broadcast_phase(phase);

        if let Err(err) = self.run().await {
            return Some(self.into_error_state(err));
        }

        info!("phase {:?} ran successfully", phase);
        self.next()
    }

    fn into_error_state(self, err: PhaseStateError) -> StateMachine {
        PhaseState::<PhaseStateError>::new(self.shared, err).into()
    }
}

// Functions that are available to all phase states.
impl<S> PhaseState<S> {
    /// Receives the next request.
    ///
    /// # Errors
    /// Fails with [`PhaseStateError::RequestChannel`] when all sender halves
    /// have been dropped.
    pub(super) async fn next_request(
        &mut self,
    ) -> Result<(StateMachineRequest, Span, ResponseSender), PhaseStateError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.next().await.ok_or_else(|| {
            error!("request receiver broken: senders have been dropped");
            PhaseStateError::RequestChannel("all message senders have been dropped!")
        })
    }

    /// Drains every request that is already queued, rejecting each one.
    /// Used at a round cutoff: submissions that arrive after the deadline
    /// are discarded, never deferred to the next round.
    pub(super) fn discard_pending_requests(&mut self) -> Result<(), PhaseStateError> {
        loop {
            match self.shared.request_rx.try_recv() {
                Ok((_req, span, resp_tx)) => {
                    let _guard = span.enter();
                    info!("discarding late request");
                    let _ = resp_tx.send(Err(RequestError::RoundClosed));
                }
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    warn!("failed to drain pending requests: channel shut down");
                    return Err(PhaseStateError::RequestChannel(
                        "all message senders have been dropped!",
                    ));
                }
            }
        }
    }

    /// Responds to a request that the current phase cannot process.
    pub(super) fn reject_request(error: RequestError, resp_tx: ResponseSender) {
        debug!("rejecting request: {}", error);
        // an error means the requester is no longer interested in the
        // response; nothing to do about it
        let _ = resp_tx.send(Err(error));
    }
}
