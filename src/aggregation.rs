//! Aggregation of model parameters and encrypted insights.
//!
//! Both operations are commutative and associative, so the order in which
//! contributions arrive never changes the result beyond floating-point
//! rounding.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    crypto::{Ciphertext, PublicKey},
    model::Model,
};

/// Error returned when contributions cannot be aggregated.
#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("parameter vector length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no participant contributed a positive sample count")]
    NoContribution,
}

/// Sample-weighted averaging of parameter vectors.
///
/// Contributions accumulate into a weighted running sum; the average is taken
/// once when the aggregation is consumed. Zero-weight contributions are
/// accepted and ignored, so a participant with no usable local data never
/// changes the result.
#[derive(Debug)]
pub struct Aggregation {
    weighted_sum: Vec<f64>,
    total_weight: f64,
    /// Fixed on construction, or by the first contribution.
    length: Option<usize>,
}

impl Aggregation {
    pub fn new(expected_length: Option<usize>) -> Self {
        Self {
            weighted_sum: Vec::new(),
            total_weight: 0.0,
            length: expected_length,
        }
    }

    /// Checks that a parameter vector can be aggregated.
    ///
    /// # Errors
    /// Fails if its length differs from the aggregation's.
    pub fn validate(&self, model: &Model) -> Result<(), AggregationError> {
        match self.length {
            Some(expected) if model.len() != expected => Err(AggregationError::DimensionMismatch {
                expected,
                actual: model.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Accumulates one participant's parameters with the given weight.
    pub fn add(&mut self, model: &Model, sample_count: u32) -> Result<(), AggregationError> {
        self.validate(model)?;
        if self.length.is_none() {
            self.length = Some(model.len());
        }
        if sample_count == 0 {
            return Ok(());
        }
        if self.weighted_sum.is_empty() {
            self.weighted_sum = vec![0.0; model.len()];
        }
        let weight = f64::from(sample_count);
        for (acc, param) in self.weighted_sum.iter_mut().zip(model.iter()) {
            *acc += weight * param;
        }
        self.total_weight += weight;
        Ok(())
    }

    /// Consumes the aggregation and yields the weighted average.
    ///
    /// # Errors
    /// Fails if no contribution carried a positive weight.
    pub fn into_global(self) -> Result<Model, AggregationError> {
        if self.total_weight <= 0.0 {
            return Err(AggregationError::NoContribution);
        }
        let total = self.total_weight;
        Ok(self.weighted_sum.into_iter().map(|sum| sum / total).collect())
    }
}

/// Folds encrypted scalar insights into a single round aggregate.
///
/// Uses only public-key operations; the fold result can solely be revealed by
/// the decryption authority.
#[derive(Debug)]
pub struct InsightAggregation {
    public_key: Arc<PublicKey>,
    sum: Option<Ciphertext>,
    count: usize,
}

impl InsightAggregation {
    pub fn new(public_key: Arc<PublicKey>) -> Self {
        Self {
            public_key,
            sum: None,
            count: 0,
        }
    }

    /// Folds one ciphertext into the running homomorphic sum.
    pub fn fold(&mut self, ciphertext: &Ciphertext) {
        self.sum = Some(match self.sum.take() {
            Some(sum) => self.public_key.add(&sum, ciphertext),
            None => ciphertext.clone(),
        });
        self.count += 1;
    }

    /// Number of insights folded so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The aggregate ciphertext, or `None` when no insight was folded.
    pub fn into_ciphertext(self) -> Option<Ciphertext> {
        self.sum
    }
}
