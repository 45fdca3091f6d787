use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    aggregation::{Aggregation, InsightAggregation},
    crypto::Ciphertext,
    model::Model,
    state_machine::{
        phases::{Broadcast, Phase, PhaseName, PhaseState, PhaseStateError, Shared},
        requests::UpdateRequest,
        RoundFailed,
        StateMachine,
    },
    ClientId,
};

/// The aggregate phase: folds the collected submissions into a new global
/// model and a combined encrypted insight.
#[derive(Debug)]
pub struct Aggregate {
    updates: HashMap<ClientId, UpdateRequest>,
    insights: HashMap<ClientId, Ciphertext>,
    new_global: Option<Model>,
    combined_insight: Option<Ciphertext>,
}

#[async_trait]
impl Phase for PhaseState<Aggregate> {
    const NAME: PhaseName = PhaseName::Aggregate;

    async fn run(&mut self) -> Result<(), PhaseStateError> {
        let min_required = self.shared.state.round_params.min_required;
        if self.private.updates.len() < min_required {
            // too few distinct clients ever connected is not a transient
            // condition, it ends the whole run
            let connected = self.shared.state.seen_clients.len();
            if connected < self.shared.state.min_clients {
                return Err(PhaseStateError::StrategyAbort {
                    connected,
                    required: self.shared.state.min_clients,
                });
            }
            return Err(RoundFailed::NoQuorum {
                collected: self.private.updates.len(),
                required: min_required,
            }
            .into());
        }

        self.aggregate_updates()?;
        self.aggregate_insights();
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        // run() only returns Ok after setting the new global model
        let new_global = self.private.new_global?;
        let mut participants: Vec<ClientId> = self.private.updates.keys().copied().collect();
        participants.sort_unstable();
        Some(
            PhaseState::<Broadcast>::new(
                self.shared,
                new_global,
                self.private.combined_insight,
                participants,
            )
            .into(),
        )
    }
}

impl PhaseState<Aggregate> {
    /// Creates a new aggregate state from the collected submissions.
    pub fn new(
        shared: Shared,
        updates: HashMap<ClientId, UpdateRequest>,
        insights: HashMap<ClientId, Ciphertext>,
    ) -> Self {
        Self {
            private: Aggregate {
                updates,
                insights,
                new_global: None,
                combined_insight: None,
            },
            shared,
        }
    }

    /// Computes the sample-count weighted average of the collected updates.
    ///
    /// A dimension mismatch in any submission fails the round: the current
    /// global model must never be replaced by a partially folded one.
    fn aggregate_updates(&mut self) -> Result<(), RoundFailed> {
        let expected_length = match self.shared.state.model_length {
            0 => None,
            length => Some(length),
        };
        let mut aggregation = Aggregation::new(expected_length);
        for update in self.private.updates.values() {
            aggregation.add(&update.model, update.sample_count)?;
        }
        let new_global = aggregation.into_global()?;
        info!(
            "aggregated {} updates into a new global model of length {}",
            self.private.updates.len(),
            new_global.len()
        );
        self.private.new_global = Some(new_global);
        Ok(())
    }

    /// Folds the encrypted insights into a single ciphertext. Purely
    /// homomorphic: the coordinator never sees a plaintext contribution.
    fn aggregate_insights(&mut self) {
        if self.private.insights.is_empty() {
            return;
        }
        let mut aggregation =
            InsightAggregation::new(Arc::clone(&self.shared.state.public_key));
        for ciphertext in self.private.insights.values() {
            aggregation.fold(ciphertext);
        }
        info!("combined {} encrypted insights", aggregation.count());
        self.private.combined_insight = aggregation.into_ciphertext();
    }
}
