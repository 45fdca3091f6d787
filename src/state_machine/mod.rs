//! The state machine that controls the execution of the aggregation
//! protocol.
//!
//! # Overview
//!
//! The state machine is the heart of the coordinator. Every round of the
//! protocol is a walk through its phases:
//!
//! 1. [`Idle`]: wait for a start request that opens the next round.
//! 2. [`Collect`]: accept model updates and encrypted insights from the
//!    round's participants until the quorum is reached or the deadline
//!    elapses.
//! 3. [`Aggregate`]: fold the collected updates into a new global model
//!    (a sample-count weighted average) and combine the encrypted
//!    insights homomorphically.
//! 4. [`Broadcast`]: publish the results and open the next round.
//!
//! A failed round moves through the error state back to [`Idle`] with the
//! global model untouched. An unrecoverable error, such as a closed
//! request channel or too few clients ever connecting, moves to
//! [`Shutdown`] instead.
//!
//! # Requests
//!
//! The state machine is driven by [`StateMachineRequest`]s sent through a
//! [`RequestSender`]. Each phase decides which requests it accepts; the
//! rest are rejected with a [`RequestError`].
//!
//! # Events
//!
//! Observers subscribe to the state machine through the
//! [`EventSubscriber`] returned by [`StateMachine::new`]. The published
//! events cover the public key, the round parameters, the current phase,
//! the global model and the combined insight ciphertext.
//!
//! [`Idle`]: crate::state_machine::phases::Idle
//! [`Collect`]: crate::state_machine::phases::Collect
//! [`Aggregate`]: crate::state_machine::phases::Aggregate
//! [`Broadcast`]: crate::state_machine::phases::Broadcast
//! [`Shutdown`]: crate::state_machine::phases::Shutdown
//! [`StateMachineRequest`]: crate::state_machine::requests::StateMachineRequest
//! [`RequestError`]: crate::state_machine::requests::RequestError

pub mod coordinator;
pub mod events;
pub mod phases;
pub mod requests;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use derive_more::From;
use thiserror::Error;

use crate::{
    aggregation::AggregationError,
    crypto::PublicKey,
    settings::{ModelSettings, RoundSettings},
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber},
        phases::{
            Aggregate,
            Broadcast,
            Collect,
            Idle,
            PhaseState,
            PhaseStateError,
            Shared,
            Shutdown,
        },
        requests::{RequestReceiver, RequestSender},
    },
};

/// Error returned when a round cannot be completed. The global model is
/// left untouched and a new round can be started.
#[derive(Debug, Error)]
pub enum RoundFailed {
    #[error("round closed with {collected} of {required} required updates")]
    NoQuorum { collected: usize, required: usize },
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
}

/// The state machine, wrapping the phase state it currently is in.
#[derive(From)]
pub enum StateMachine {
    Idle(PhaseState<Idle>),
    Collect(PhaseState<Collect>),
    Aggregate(PhaseState<Aggregate>),
    Broadcast(PhaseState<Broadcast>),
    Error(PhaseState<PhaseStateError>),
    Shutdown(PhaseState<Shutdown>),
}

impl StateMachine {
    /// Creates a new state machine.
    ///
    /// Returns the machine itself together with the [`RequestSender`] that
    /// drives it and the [`EventSubscriber`] that observes it. The machine
    /// starts in the idle phase; call [`next`] in a loop or [`run`] once to
    /// make progress.
    ///
    /// [`next`]: StateMachine::next
    /// [`run`]: StateMachine::run
    pub fn new(
        public_key: Arc<PublicKey>,
        round_settings: &RoundSettings,
        model_settings: &ModelSettings,
    ) -> (Self, RequestSender, EventSubscriber) {
        let state = CoordinatorState::new(Arc::clone(&public_key), round_settings, model_settings);
        let (publisher, subscriber) = EventPublisher::init(
            state.round_id,
            public_key,
            state.round_params.clone(),
            phases::PhaseName::Idle,
        );
        let (request_rx, request_tx) = RequestReceiver::new();
        let shared = Shared::new(state, publisher, request_rx);
        let state_machine = StateMachine::from(PhaseState::<Idle>::new(shared));
        (state_machine, request_tx, subscriber)
    }

    /// Moves the state machine to the next state and consumes the current
    /// one. Returns `None` if the state machine has shut down.
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Collect(state) => state.run_phase().await,
            StateMachine::Aggregate(state) => state.run_phase().await,
            StateMachine::Broadcast(state) => state.run_phase().await,
            StateMachine::Error(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}
