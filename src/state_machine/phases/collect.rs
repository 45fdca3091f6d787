use std::collections::HashMap;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use crate::{
    crypto::Ciphertext,
    state_machine::{
        phases::{Aggregate, Handler, Phase, PhaseName, PhaseState, PhaseStateError, Shared},
        requests::{InsightRequest, RequestError, StateMachineRequest, UpdateRequest},
        StateMachine,
    },
    ClientId,
};

/// The collect phase: the round is open and awaiting submissions.
///
/// Ends as soon as the quorum of update submissions is reached, or at the
/// round deadline, whichever comes first. Anything still queued at the
/// cutoff is discarded, not deferred to the next round.
#[derive(Debug)]
pub struct Collect {
    /// Collected updates, keyed by client. A second submission from the
    /// same client overwrites the first; it is never double-counted.
    updates: HashMap<ClientId, UpdateRequest>,
    /// Collected encrypted insights, keyed by client.
    insights: HashMap<ClientId, Ciphertext>,
}

#[async_trait]
impl Phase for PhaseState<Collect> {
    const NAME: PhaseName = PhaseName::Collect;

    async fn run(&mut self) -> Result<(), PhaseStateError> {
        let deadline = Instant::now() + self.shared.state.round_params.timeout;
        let min_required = self.shared.state.round_params.min_required;

        loop {
            if self.private.updates.len() >= min_required {
                info!(
                    "quorum reached: {} updates (required {}), cancelling the remaining wait",
                    self.private.updates.len(),
                    min_required
                );
                break;
            }
            tokio::select! {
                _ = sleep_until(deadline) => {
                    info!(
                        "round deadline elapsed with {} of {} required updates",
                        self.private.updates.len(),
                        min_required
                    );
                    break;
                }
                next = self.next_request() => {
                    let (req, span, resp_tx) = next?;
                    let _guard = span.enter();
                    let response = self.handle_request(req);
                    if let Err(ref err) = response {
                        warn!("submission rejected: {}", err);
                    }
                    let _ = resp_tx.send(response);
                }
            }
        }

        // participants that never submitted are excluded from this round;
        // this is non-fatal for them and for the round
        for client_id in self.shared.state.round_params.participants.iter() {
            if !self.private.updates.contains_key(client_id) {
                warn!("client {} timed out, excluding it from this round", client_id);
            }
        }

        self.record_seen_clients();
        self.discard_pending_requests()
    }

    fn next(self) -> Option<StateMachine> {
        let Collect { updates, insights } = self.private;
        Some(PhaseState::<Aggregate>::new(self.shared, updates, insights).into())
    }
}

impl Handler for PhaseState<Collect> {
    /// Handles an update or insight submission.
    ///
    /// # Errors
    /// Fails with [`RequestError::UnknownParticipant`] when the client is
    /// not part of the round's participant set, and with
    /// [`RequestError::RoundInProgress`] for a start request.
    fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Update(update) => self.handle_update(update),
            StateMachineRequest::Insight(insight) => self.handle_insight(insight),
            StateMachineRequest::Start(_) => Err(RequestError::RoundInProgress),
        }
    }
}

impl PhaseState<Collect> {
    /// Creates a new collect state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Collect {
                updates: HashMap::new(),
                insights: HashMap::new(),
            },
            shared,
        }
    }

    fn ensure_known_participant(&self, client_id: &ClientId) -> Result<(), RequestError> {
        if self.shared.state.round_params.participants.contains(client_id) {
            Ok(())
        } else {
            Err(RequestError::UnknownParticipant)
        }
    }

    fn handle_update(&mut self, update: UpdateRequest) -> Result<(), RequestError> {
        self.ensure_known_participant(&update.client_id)?;
        debug!(
            "collected update from client {} with weight {}",
            update.client_id, update.sample_count
        );
        if self
            .private
            .updates
            .insert(update.client_id, update)
            .is_some()
        {
            info!("duplicate update submission, last write wins");
        }
        Ok(())
    }

    fn handle_insight(&mut self, insight: InsightRequest) -> Result<(), RequestError> {
        self.ensure_known_participant(&insight.client_id)?;
        debug!("collected insight from client {}", insight.client_id);
        self.private
            .insights
            .insert(insight.client_id, insight.ciphertext);
        Ok(())
    }

    /// Records which clients connected this round, for the run-lifetime
    /// participation check.
    fn record_seen_clients(&mut self) {
        let seen = &mut self.shared.state.seen_clients;
        seen.extend(self.private.updates.keys().copied());
        seen.extend(self.private.insights.keys().copied());
    }
}
