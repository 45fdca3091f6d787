use std::{collections::HashSet, sync::Arc, time::Duration};

use tracing::Span;

use crate::{
    auditor::Auditor,
    crypto::{KeyPair, FIXED_POINT_EPSILON, MIN_KEY_BITS},
    message::{InsightSubmission, UpdateSubmission},
    model::{LinearClassifier, Model},
    participant::Participant,
    settings::{ModelSettings, RoundSettings},
    state_machine::{
        events::{EventSubscriber, InsightUpdate, ModelUpdate},
        phases::PhaseName,
        requests::{RequestError, RequestSender, StartRequest},
        StateMachine,
    },
    ClientId, RoundId,
};

fn round_settings(min_required: usize, min_clients: usize) -> RoundSettings {
    RoundSettings {
        min_required,
        min_clients,
        timeout_secs: 10,
    }
}

fn spawn_machine(
    min_required: usize,
    min_clients: usize,
) -> (RequestSender, EventSubscriber, Arc<Auditor>) {
    let auditor = Arc::new(Auditor::new(MIN_KEY_BITS).unwrap());
    let (machine, request_tx, subscriber) = StateMachine::new(
        auditor.public_key(),
        &round_settings(min_required, min_clients),
        &ModelSettings { length: 0 },
    );
    tokio::spawn(machine.run());
    (request_tx, subscriber, auditor)
}

fn start_request(
    participants: &[ClientId],
    min_required: usize,
    timeout: Duration,
) -> StartRequest {
    StartRequest {
        global_model: None,
        participants: participants.iter().copied().collect::<HashSet<_>>(),
        min_required,
        timeout,
    }
}

fn update(client_id: ClientId, parameters: Vec<f64>, sample_count: u32) -> UpdateSubmission {
    UpdateSubmission {
        client_id,
        parameters: parameters.into(),
        sample_count,
    }
}

/// Waits until the machine settles in the given phase. Phase events are
/// coalescing, so this is only reliable for phases the machine stays in:
/// idle and shutdown.
async fn await_phase(subscriber: &EventSubscriber, phase: PhaseName, round_id: RoundId) {
    let mut listener = subscriber.phase_listener();
    let latest = listener.get_latest();
    if latest.event == phase && latest.round_id == round_id {
        return;
    }
    loop {
        let event = listener.changed().await.expect("publisher dropped");
        if event.event == phase && event.round_id == round_id {
            return;
        }
    }
}

fn latest_model(subscriber: &EventSubscriber) -> Option<Arc<Model>> {
    match subscriber.model_listener().get_latest().event {
        ModelUpdate::New(model) => Some(model),
        ModelUpdate::Invalidate => None,
    }
}

#[tokio::test]
async fn test_full_round() {
    let (requests, subscriber, _auditor) = spawn_machine(3, 3);
    let clients: Vec<ClientId> = (0..3).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 3, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    for (client, (value, weight)) in clients
        .iter()
        .zip(vec![(1.0, 10), (2.0, 20), (3.0, 30)])
    {
        requests
            .request(update(*client, vec![value], weight), Span::none())
            .await
            .unwrap();
    }

    // round 0 complete, round 1 idle
    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let global = latest_model(&subscriber).unwrap();
    // (1 * 10 + 2 * 20 + 3 * 30) / 60
    assert!((global[0] - 140.0 / 60.0).abs() < 1e-12);

    let params = subscriber.params_listener().get_latest().event;
    assert_eq!(params.id, 0);
    assert_eq!(params.min_required, 3);
}

#[tokio::test]
async fn test_zero_weight_contribution_is_neutral() {
    let (requests, subscriber, _auditor) = spawn_machine(2, 2);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 2, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();
    requests
        .request(update(clients[0], vec![4.0], 5), Span::none())
        .await
        .unwrap();
    requests
        .request(update(clients[1], vec![1000.0], 0), Span::none())
        .await
        .unwrap();

    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let global = latest_model(&subscriber).unwrap();
    assert!((global[0] - 4.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_duplicate_submission_counts_once() {
    let (requests, subscriber, _auditor) = spawn_machine(2, 2);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 2, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    // the second submission replaces the first, it does not reach quorum
    requests
        .request(update(clients[0], vec![1.0], 10), Span::none())
        .await
        .unwrap();
    requests
        .request(update(clients[0], vec![5.0], 10), Span::none())
        .await
        .unwrap();
    requests
        .request(update(clients[1], vec![3.0], 10), Span::none())
        .await
        .unwrap();

    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let global = latest_model(&subscriber).unwrap();
    assert!((global[0] - 4.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_unknown_participant_rejected() {
    let (requests, _subscriber, _auditor) = spawn_machine(1, 1);
    let client = ClientId::new_v4();

    requests
        .request(
            start_request(&[client], 1, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    let outsider = ClientId::new_v4();
    assert_eq!(
        requests
            .request(update(outsider, vec![1.0], 1), Span::none())
            .await,
        Err(RequestError::UnknownParticipant)
    );
}

#[tokio::test]
async fn test_submission_while_idle_rejected() {
    let (requests, _subscriber, _auditor) = spawn_machine(1, 1);

    assert_eq!(
        requests
            .request(update(ClientId::new_v4(), vec![1.0], 1), Span::none())
            .await,
        Err(RequestError::RoundClosed)
    );
}

#[tokio::test]
async fn test_submission_after_cutoff_discarded() {
    let (requests, subscriber, _auditor) = spawn_machine(1, 1);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 1, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    // the first update satisfies the quorum of one and closes the window;
    // the straggler is rejected, never deferred to the next round
    requests
        .request(update(clients[0], vec![2.0], 10), Span::none())
        .await
        .unwrap();
    assert_eq!(
        requests
            .request(update(clients[1], vec![1000.0], 10), Span::none())
            .await,
        Err(RequestError::RoundClosed)
    );

    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let global = latest_model(&subscriber).unwrap();
    assert!((global[0] - 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_start_while_collecting_rejected() {
    let (requests, _subscriber, _auditor) = spawn_machine(2, 2);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 2, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    assert_eq!(
        requests
            .request(
                start_request(&clients, 2, Duration::from_secs(10)),
                Span::none(),
            )
            .await,
        Err(RequestError::RoundInProgress)
    );
}

#[tokio::test]
async fn test_failed_round_leaves_global_model_untouched() {
    let (requests, subscriber, _auditor) = spawn_machine(2, 1);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();

    requests
        .request(
            start_request(&clients, 2, Duration::from_millis(200)),
            Span::none(),
        )
        .await
        .unwrap();
    requests
        .request(update(clients[0], vec![9.0], 1), Span::none())
        .await
        .unwrap();

    // one update cannot reach the quorum of two, the round fails and the
    // machine recovers into idle without touching the global model
    await_phase(&subscriber, PhaseName::Idle, 0).await;

    let global = latest_model(&subscriber).unwrap();
    assert_eq!(*global, Model::default());
    assert!(requests.is_open());
}

#[tokio::test]
async fn test_too_few_clients_shuts_down() {
    let (requests, subscriber, _auditor) = spawn_machine(2, 2);
    let client = ClientId::new_v4();

    requests
        .request(
            start_request(&[client], 2, Duration::from_millis(200)),
            Span::none(),
        )
        .await
        .unwrap();
    requests
        .request(update(client, vec![1.0], 1), Span::none())
        .await
        .unwrap();

    await_phase(&subscriber, PhaseName::Shutdown, 0).await;

    let rejected = requests
        .request(update(client, vec![1.0], 1), Span::none())
        .await;
    assert!(matches!(rejected, Err(RequestError::InternalError(_))));
}

#[tokio::test]
async fn test_insight_aggregation() {
    let (requests, subscriber, auditor) = spawn_machine(2, 2);
    let clients: Vec<ClientId> = (0..2).map(|_| ClientId::new_v4()).collect();
    let public_key = auditor.public_key();

    requests
        .request(
            start_request(&clients, 2, Duration::from_secs(10)),
            Span::none(),
        )
        .await
        .unwrap();

    for (client, insight) in clients.iter().zip(vec![2.5, -0.5]) {
        requests
            .request(
                InsightSubmission {
                    client_id: *client,
                    ciphertext: public_key.encrypt(insight).unwrap(),
                },
                Span::none(),
            )
            .await
            .unwrap();
        requests
            .request(update(*client, vec![1.0], 1), Span::none())
            .await
            .unwrap();
    }

    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let aggregate = match subscriber.insight_listener().get_latest().event {
        InsightUpdate::New(ciphertext) => ciphertext,
        InsightUpdate::Invalidate => panic!("no aggregate insight published"),
    };
    let revealed = auditor.reveal(&aggregate).unwrap();
    assert!((revealed - 2.0).abs() < FIXED_POINT_EPSILON);
}

#[tokio::test]
async fn test_bootstrap_global_model() {
    let auditor = Auditor::new(MIN_KEY_BITS).unwrap();
    let (machine, requests, subscriber) = StateMachine::new(
        auditor.public_key(),
        &round_settings(1, 1),
        &ModelSettings { length: 2 },
    );
    tokio::spawn(machine.run());
    let client = ClientId::new_v4();

    requests
        .request(
            StartRequest {
                global_model: Some(vec![0.5, -0.5].into()),
                participants: [client].iter().copied().collect(),
                min_required: 1,
                timeout: Duration::from_secs(10),
            },
            Span::none(),
        )
        .await
        .unwrap();

    // a dimension mismatch against the bootstrapped model fails the round
    requests
        .request(update(client, vec![1.0], 1), Span::none())
        .await
        .unwrap();
    await_phase(&subscriber, PhaseName::Idle, 0).await;

    let global = latest_model(&subscriber).unwrap();
    assert_eq!(*global, Model::from(vec![0.5, -0.5]));
}

#[tokio::test]
async fn test_trained_participants_complete_a_bootstrapped_round() {
    let (requests, subscriber, auditor) = spawn_machine(2, 2);
    let public_key = auditor.public_key();

    let mut fleet = vec![
        Participant::new(
            LinearClassifier::new(2),
            vec![vec![0.0, 0.1], vec![1.0, 0.9]],
            vec![0.0, 1.0],
            Arc::clone(&public_key),
        ),
        Participant::new(
            LinearClassifier::new(2),
            vec![vec![0.2, 0.0], vec![0.9, 1.1], vec![1.1, 1.0]],
            vec![0.0, 1.0, 1.0],
            Arc::clone(&public_key),
        ),
    ];

    // the bootstrap model must fit the classifiers: two weights plus the
    // intercept; an empty default global would reject every participant
    requests
        .request(
            StartRequest {
                global_model: Some(Model::zeroed(3)),
                participants: fleet.iter().map(Participant::id).collect(),
                min_required: 2,
                timeout: Duration::from_secs(10),
            },
            Span::none(),
        )
        .await
        .unwrap();

    // the bootstrapped global is published before the collect phase opens
    await_phase(&subscriber, PhaseName::Collect, 0).await;
    let global = latest_model(&subscriber).unwrap();
    for participant in fleet.iter_mut() {
        let update = participant.local_update(&global).unwrap();
        assert!(update.sample_count > 0);
        requests.request(update, Span::none()).await.unwrap();
    }

    await_phase(&subscriber, PhaseName::Idle, 1).await;

    let new_global = latest_model(&subscriber).unwrap();
    assert_eq!(new_global.len(), 3);
    assert_ne!(*new_global, Model::zeroed(3));
}

#[test]
fn test_key_pair_shared_across_parties() {
    let keys = KeyPair::generate(MIN_KEY_BITS).unwrap();
    let shared = Arc::new(keys.public.clone());
    let c = shared.encrypt(1.0).unwrap();
    assert!((keys.secret.decrypt(&c).unwrap() - 1.0).abs() < FIXED_POINT_EPSILON);
}
