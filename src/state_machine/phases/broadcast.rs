use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    crypto::Ciphertext,
    model::Model,
    state_machine::{
        events::{InsightUpdate, ModelUpdate},
        phases::{Idle, Phase, PhaseName, PhaseState, PhaseStateError, Shared},
        StateMachine,
    },
    ClientId,
};

/// The broadcast phase: publishes the round's results and closes the round.
#[derive(Debug)]
pub struct Broadcast {
    new_global: Model,
    combined_insight: Option<Ciphertext>,
    participants: Vec<ClientId>,
}

#[async_trait]
impl Phase for PhaseState<Broadcast> {
    const NAME: PhaseName = PhaseName::Broadcast;

    async fn run(&mut self) -> Result<(), PhaseStateError> {
        let round_id = self.shared.state.round_id;
        info!(
            "round {} complete with {} participating clients",
            round_id,
            self.private.participants.len()
        );

        let new_global = Arc::new(self.private.new_global.clone());
        self.shared.state.model_length = new_global.len();
        self.shared.state.global_model = Arc::clone(&new_global);
        self.shared.events.broadcast_model(ModelUpdate::New(new_global));

        match self.private.combined_insight.take() {
            Some(ciphertext) => self
                .shared
                .events
                .broadcast_insight(InsightUpdate::New(Arc::new(ciphertext))),
            None => self.shared.events.broadcast_insight(InsightUpdate::Invalidate),
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        let mut shared = self.shared;
        let next_round = shared.state.round_id + 1;
        shared.set_round_id(next_round);
        Some(PhaseState::<Idle>::new(shared).into())
    }
}

impl PhaseState<Broadcast> {
    /// Creates a new broadcast state from the aggregation results.
    pub fn new(
        shared: Shared,
        new_global: Model,
        combined_insight: Option<Ciphertext>,
        participants: Vec<ClientId>,
    ) -> Self {
        Self {
            private: Broadcast {
                new_global,
                combined_insight,
                participants,
            },
            shared,
        }
    }
}
