//! Model parameter vectors and the local model capability interface.

use std::{
    iter::FromIterator,
    slice::{Iter, IterMut},
};

use derive_more::{From, Index, IndexMut, Into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A model parameter vector: coefficients followed by the intercept terms.
///
/// The length is fixed for a given model family and must match across all
/// participants in a round.
#[derive(Debug, Clone, PartialEq, Default, From, Index, IndexMut, Into, Serialize, Deserialize)]
pub struct Model(Vec<f64>);

impl Model {
    /// A zero-initialized model of the given length.
    pub fn zeroed(length: usize) -> Self {
        Self(vec![0.0; length])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<f64> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<f64> {
        self.0.iter_mut()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl FromIterator<f64> for Model {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Model(iter.into_iter().collect())
    }
}

impl IntoIterator for Model {
    type Item = f64;
    type IntoIter = std::vec::IntoIter<f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Error returned when parameters cannot be applied to a local model.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("invalid parameter vector: expected length {expected}, got {actual}")]
    InvalidParameters { expected: usize, actual: usize },
}

/// The capability interface every local model variant implements.
///
/// The variant set is closed and chosen at construction time; no runtime
/// type inspection is needed anywhere.
pub trait LocalModel {
    /// Fits the model to the given feature rows and labels.
    fn train(&mut self, features: &[Vec<f64>], labels: &[f64]);

    /// Scores a single feature row.
    fn predict(&self, features: &[f64]) -> f64;

    /// The model's current parameter vector.
    fn get_parameters(&self) -> Model;

    /// Overwrites the model's parameters.
    ///
    /// # Errors
    /// Fails if the parameter vector does not fit the model family.
    fn set_parameters(&mut self, params: &Model) -> Result<(), ModelError>;
}

/// A binary linear classifier fit by logistic regression.
///
/// Parameters are the feature weights followed by a single intercept.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    weights: Vec<f64>,
    intercept: f64,
    learning_rate: f64,
    epochs: usize,
}

impl LinearClassifier {
    pub fn new(num_features: usize) -> Self {
        Self {
            weights: vec![0.0; num_features],
            intercept: 0.0,
            learning_rate: 0.1,
            epochs: 100,
        }
    }

    pub fn with_hyperparameters(num_features: usize, learning_rate: f64, epochs: usize) -> Self {
        Self {
            weights: vec![0.0; num_features],
            intercept: 0.0,
            learning_rate,
            epochs,
        }
    }

    fn logit(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(features.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl LocalModel for LinearClassifier {
    fn train(&mut self, features: &[Vec<f64>], labels: &[f64]) {
        if features.is_empty() {
            return;
        }
        let count = features.len() as f64;
        for _ in 0..self.epochs {
            let mut weight_grads = vec![0.0; self.weights.len()];
            let mut intercept_grad = 0.0;
            for (row, label) in features.iter().zip(labels.iter()) {
                let error = sigmoid(self.logit(row)) - label;
                for (grad, x) in weight_grads.iter_mut().zip(row.iter()) {
                    *grad += error * x;
                }
                intercept_grad += error;
            }
            for (weight, grad) in self.weights.iter_mut().zip(weight_grads.iter()) {
                *weight -= self.learning_rate * grad / count;
            }
            self.intercept -= self.learning_rate * intercept_grad / count;
        }
    }

    fn predict(&self, features: &[f64]) -> f64 {
        sigmoid(self.logit(features))
    }

    fn get_parameters(&self) -> Model {
        self.weights
            .iter()
            .copied()
            .chain(std::iter::once(self.intercept))
            .collect()
    }

    fn set_parameters(&mut self, params: &Model) -> Result<(), ModelError> {
        let expected = self.weights.len() + 1;
        if params.len() != expected {
            return Err(ModelError::InvalidParameters {
                expected,
                actual: params.len(),
            });
        }
        let slice = params.as_slice();
        self.weights.copy_from_slice(&slice[..slice.len() - 1]);
        self.intercept = slice[slice.len() - 1];
        Ok(())
    }
}

/// An unsupervised z-score anomaly detector.
///
/// Its parameters are purely local statistics and are not federated: the
/// parameter vector is empty and incoming parameters are ignored, matching
/// the classifier-centric aggregation of the round protocol. Its role is to
/// produce the local anomaly rate used as an encrypted insight.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    means: Vec<f64>,
    deviations: Vec<f64>,
    /// Distance in standard deviations beyond which a row is anomalous.
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new(num_features: usize) -> Self {
        Self {
            means: vec![0.0; num_features],
            deviations: vec![1.0; num_features],
            threshold: 3.0,
        }
    }

    /// Fraction of rows flagged as anomalous.
    pub fn anomaly_rate(&self, features: &[Vec<f64>]) -> f64 {
        if features.is_empty() {
            return 0.0;
        }
        let flagged = features
            .iter()
            .filter(|row| self.predict(row) > 0.5)
            .count();
        flagged as f64 / features.len() as f64
    }
}

impl LocalModel for AnomalyDetector {
    fn train(&mut self, features: &[Vec<f64>], _labels: &[f64]) {
        if features.is_empty() {
            return;
        }
        let count = features.len() as f64;
        for dim in 0..self.means.len() {
            let mean = features.iter().map(|row| row[dim]).sum::<f64>() / count;
            let variance = features
                .iter()
                .map(|row| (row[dim] - mean).powi(2))
                .sum::<f64>()
                / count;
            self.means[dim] = mean;
            self.deviations[dim] = variance.sqrt().max(f64::EPSILON);
        }
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let anomalous = self
            .means
            .iter()
            .zip(self.deviations.iter())
            .zip(features.iter())
            .any(|((mean, dev), x)| ((x - mean) / dev).abs() > self.threshold);
        if anomalous {
            1.0
        } else {
            0.0
        }
    }

    fn get_parameters(&self) -> Model {
        Model::default()
    }

    fn set_parameters(&mut self, _params: &Model) -> Result<(), ModelError> {
        Ok(())
    }
}
