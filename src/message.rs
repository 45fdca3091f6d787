//! The transport-agnostic round protocol schema.
//!
//! These types define what travels between the coordinator and the
//! participants; how they travel (sockets, queues, in-process channels) is a
//! deployment concern. Submissions convert into state-machine requests, see
//! [`crate::state_machine::requests`].

use serde::{Deserialize, Serialize};

use crate::{crypto::Ciphertext, model::Model, ClientId, RoundId};

/// Announces a new round and carries the current global parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRound {
    pub round: RoundId,
    pub global_parameters: Model,
    pub min_required: usize,
    pub timeout_ms: u64,
}

/// A participant's trained parameters together with its aggregation weight.
///
/// A `sample_count` of zero means "no contribution this round" and is a
/// valid, non-error submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSubmission {
    pub client_id: ClientId,
    pub parameters: Model,
    pub sample_count: u32,
}

/// A participant's encrypted scalar insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSubmission {
    pub client_id: ClientId,
    pub ciphertext: Ciphertext,
}

/// The outcome of a round, broadcast to all participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub round: RoundId,
    pub new_global_parameters: Model,
    pub participating_client_ids: Vec<ClientId>,
}

/// Envelope over all round protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    StartRound(StartRound),
    Update(UpdateSubmission),
    Insight(InsightSubmission),
    Aggregate(AggregateResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, MIN_KEY_BITS};

    #[test]
    fn test_update_submission_roundtrip() {
        let submission = UpdateSubmission {
            client_id: ClientId::new_v4(),
            parameters: vec![0.5, -1.25, 3.0].into(),
            sample_count: 42,
        };
        let json = serde_json::to_string(&submission).unwrap();
        assert_eq!(serde_json::from_str::<UpdateSubmission>(&json).unwrap(), submission);
    }

    #[test]
    fn test_insight_submission_roundtrip() {
        let keys = KeyPair::generate(MIN_KEY_BITS).unwrap();
        let submission = InsightSubmission {
            client_id: ClientId::new_v4(),
            ciphertext: keys.public.encrypt(0.25).unwrap(),
        };
        let json = serde_json::to_string(&submission).unwrap();
        let decoded: InsightSubmission = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, submission);
        // the ciphertext survives the trip intact
        let value = keys.secret.decrypt(&decoded.ciphertext).unwrap();
        assert!((value - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_message_envelope_roundtrip() {
        let messages = vec![
            Message::StartRound(StartRound {
                round: 3,
                global_parameters: vec![1.0, 2.0].into(),
                min_required: 2,
                timeout_ms: 30_000,
            }),
            Message::Aggregate(AggregateResult {
                round: 3,
                new_global_parameters: vec![0.5, -1.5].into(),
                participating_client_ids: vec![ClientId::new_v4(), ClientId::new_v4()],
            }),
        ];
        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            assert_eq!(serde_json::from_str::<Message>(&json).unwrap(), message);
        }
    }
}
