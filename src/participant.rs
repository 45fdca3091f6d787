//! The participant side of the protocol.
//!
//! A participant owns a local model and a local data set that never leaves
//! the machine. Each round it refines the broadcast global parameters on
//! its own data and submits the refined parameters weighted by its sample
//! count. Insight contributions additionally pass through the deployment's
//! public key, so the coordinator only ever sees ciphertext.

use std::sync::Arc;

use crate::{
    crypto::{PaillierError, PublicKey},
    message::{InsightSubmission, UpdateSubmission},
    model::{LocalModel, Model, ModelError},
    ClientId,
};

/// A round participant, generic over the local model it trains.
pub struct Participant<M> {
    id: ClientId,
    model: M,
    features: Vec<Vec<f64>>,
    labels: Vec<f64>,
    public_key: Arc<PublicKey>,
}

impl<M> Participant<M>
where
    M: LocalModel,
{
    /// Creates a new participant with its private training data.
    pub fn new(
        model: M,
        features: Vec<Vec<f64>>,
        labels: Vec<f64>,
        public_key: Arc<PublicKey>,
    ) -> Self {
        Self {
            id: ClientId::new_v4(),
            model,
            features,
            labels,
            public_key,
        }
    }

    /// The participant's client id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The local model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Produces this round's update: adopts the global parameters, trains
    /// on the local data and returns the refined parameters weighted by the
    /// local sample count.
    ///
    /// A participant whose data cannot support training, because it is
    /// empty or contains a single label class only, still answers, but with
    /// the unchanged global parameters and a zero weight. A zero weight
    /// contribution leaves the aggregate untouched.
    ///
    /// # Errors
    /// Fails when the global parameters do not fit the local model.
    pub fn local_update(&mut self, global: &Model) -> Result<UpdateSubmission, ModelError> {
        self.model.set_parameters(global)?;

        if !self.can_train() {
            debug!("client {} has no trainable data, submitting zero weight", self.id);
            return Ok(UpdateSubmission {
                client_id: self.id,
                parameters: global.clone(),
                sample_count: 0,
            });
        }

        self.model.train(&self.features, &self.labels);
        Ok(UpdateSubmission {
            client_id: self.id,
            parameters: self.model.get_parameters(),
            sample_count: self.features.len() as u32,
        })
    }

    /// Encrypts a locally computed statistic as this round's insight
    /// contribution. The plaintext value never leaves this function.
    ///
    /// # Errors
    /// Fails when the statistic cannot be represented as a plaintext, for
    /// example when it is not finite.
    pub fn encrypted_insight<F>(&self, statistic: F) -> Result<InsightSubmission, PaillierError>
    where
        F: FnOnce(&M, &[Vec<f64>]) -> f64,
    {
        let value = statistic(&self.model, &self.features);
        let ciphertext = self.public_key.encrypt(value)?;
        Ok(InsightSubmission {
            client_id: self.id,
            ciphertext,
        })
    }

    fn can_train(&self) -> bool {
        if self.features.is_empty() {
            return false;
        }
        match self.labels.split_first() {
            // unlabeled data trains unsupervised models just fine
            None => true,
            Some((first, rest)) => rest.iter().any(|label| label != first),
        }
    }
}
