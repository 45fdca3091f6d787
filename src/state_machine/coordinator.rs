//! Coordinator state and round parameter types.

use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};

use crate::{
    crypto::PublicKey,
    model::Model,
    settings::{ModelSettings, RoundSettings},
    ClientId, RoundId,
};

/// The parameters of the round currently being run.
#[derive(Debug, Clone)]
pub struct RoundParameters {
    /// The round's identifier.
    pub id: RoundId,
    /// The clients allowed to submit this round.
    pub participants: Arc<HashSet<ClientId>>,
    /// Submissions required before the round may aggregate.
    pub min_required: usize,
    /// Hard deadline for the collection window.
    pub timeout: Duration,
}

impl Default for RoundParameters {
    fn default() -> Self {
        Self {
            id: 0,
            participants: Arc::new(HashSet::new()),
            min_required: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The coordinator state.
///
/// Owned exclusively by the state machine; the outside world only ever sees
/// it through events. The public key is shared configuration generated once
/// per deployment; the coordinator never holds the private half.
#[derive(Debug)]
pub struct CoordinatorState {
    /// The shared Paillier public key.
    pub public_key: Arc<PublicKey>,
    /// The current round's identifier.
    pub round_id: RoundId,
    /// The current global model parameters.
    pub global_model: Arc<Model>,
    /// The parameters of the round in progress.
    pub round_params: RoundParameters,
    /// Every client that ever submitted during this run. Used to decide
    /// between retrying a failed round and aborting the whole run.
    pub seen_clients: HashSet<ClientId>,
    /// The minimum number of distinct clients that must connect over the
    /// run's lifetime before a quorum failure is considered retryable.
    pub min_clients: usize,
    /// The expected parameter vector length, zero when unknown.
    pub model_length: usize,
}

impl CoordinatorState {
    pub fn new(
        public_key: Arc<PublicKey>,
        round_settings: &RoundSettings,
        model_settings: &ModelSettings,
    ) -> Self {
        let global_model = if model_settings.length > 0 {
            Arc::new(Model::zeroed(model_settings.length))
        } else {
            Arc::new(Model::default())
        };
        Self {
            public_key,
            round_id: 0,
            global_model,
            round_params: RoundParameters {
                min_required: round_settings.min_required,
                timeout: Duration::from_secs(round_settings.timeout_secs),
                ..Default::default()
            },
            seen_clients: HashSet::new(),
            min_clients: round_settings.min_clients,
            model_length: model_settings.length,
        }
    }
}
