//! Privacy-preserving federated aggregation.
//!
//! Participants compute on private local data and share only weight-averaged
//! parameter vectors and Paillier-encrypted scalar insights. The coordinator
//! aggregates both without ever holding the decryption key: parameter vectors
//! are combined by sample-weighted averaging, encrypted insights by additive
//! homomorphic summation. Only the [`Auditor`], the decryption authority,
//! can reveal an aggregate insight.
//!
//! The building blocks are:
//!
//! - [`crypto`]: the additive homomorphic cryptosystem,
//! - [`state_machine`]: the round coordinator,
//! - [`participant`]: the client-side round participant,
//! - [`auditor`]: the decryption authority,
//! - [`message`]: the transport-agnostic round protocol schema.
//!
//! [`Auditor`]: crate::auditor::Auditor

#[macro_use]
extern crate tracing;

pub mod aggregation;
pub mod auditor;
pub mod crypto;
pub mod message;
pub mod model;
pub mod participant;
pub mod settings;
pub mod state_machine;

use uuid::Uuid;

/// Unique identifier of a round participant.
pub type ClientId = Uuid;

/// Identifier of a federated round.
pub type RoundId = u64;
