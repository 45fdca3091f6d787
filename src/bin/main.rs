use std::{path::PathBuf, process, sync::Arc};

use structopt::StructOpt;
use tokio::signal;
use tracing::Span;
use tracing_subscriber::*;

use guardian_fl::{
    auditor::Auditor,
    model::{LinearClassifier, LocalModel, Model},
    participant::Participant,
    settings::Settings,
    state_machine::{
        events::{EventSubscriber, InsightUpdate, ModelUpdate},
        requests::{RequestSender, StartRequest},
        StateMachine,
    },
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// Number of rounds to run before exiting
    #[structopt(short, long, default_value = "3")]
    rounds: u64,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        round: round_settings,
        crypto: crypto_settings,
        model: model_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    // the auditor is the only holder of the decryption key; everyone else
    // works with the public half
    let auditor = Auditor::new(crypto_settings.key_bits).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let (state_machine, requests_tx, event_subscriber) =
        StateMachine::new(auditor.public_key(), &round_settings, &model_settings);

    tokio::select! {
        _ = state_machine.run() => {
            warn!("shutting down: coordinator terminated");
        }
        _ = run_demo_fleet(
            requests_tx,
            event_subscriber,
            auditor,
            round_settings.timeout(),
            opt.rounds,
        ) => {
            info!("demo fleet finished");
        }
        _ = signal::ctrl_c() => {}
    }
}

/// Drives a small in-process fleet of participants through `rounds` rounds
/// and reveals the aggregate insight of each round.
async fn run_demo_fleet(
    requests: RequestSender,
    events: EventSubscriber,
    auditor: Auditor,
    timeout: std::time::Duration,
    rounds: u64,
) {
    let public_key = auditor.public_key();

    // three participants, each holding a private shard of the data set
    let shards: Vec<(Vec<Vec<f64>>, Vec<f64>)> = vec![
        (
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.2, 0.1]],
            vec![0.0, 1.0, 0.0],
        ),
        (
            vec![vec![0.9, 0.8], vec![0.1, 0.3], vec![0.7, 0.9], vec![0.8, 0.6]],
            vec![1.0, 0.0, 1.0, 1.0],
        ),
        (
            vec![vec![0.4, 0.5], vec![0.6, 0.4]],
            vec![0.0, 1.0],
        ),
    ];
    let mut fleet: Vec<Participant<LinearClassifier>> = shards
        .into_iter()
        .map(|(features, labels)| {
            Participant::new(
                LinearClassifier::new(2),
                features,
                labels,
                Arc::clone(&public_key),
            )
        })
        .collect();

    let mut model_listener = events.model_listener();

    for round in 0..rounds {
        // the very first round seeds a zeroed model matching the
        // classifier's two weights plus intercept; later rounds adopt the
        // coordinator's aggregated global
        let start = StartRequest {
            global_model: if round == 0 {
                Some(Model::zeroed(3))
            } else {
                None
            },
            participants: fleet.iter().map(Participant::id).collect(),
            min_required: fleet.len(),
            timeout,
        };
        if let Err(err) = requests.request(start, Span::none()).await {
            error!("failed to start round {}: {}", round, err);
            return;
        }

        // the round opening republishes the current global model
        let global = loop {
            match model_listener.changed().await {
                Some(event) => {
                    if let ModelUpdate::New(model) = event.event {
                        break model;
                    }
                }
                None => return,
            }
        };

        for participant in fleet.iter_mut() {
            let update = match participant.local_update(&global) {
                Ok(update) => update,
                Err(err) => {
                    error!("participant failed to train: {}", err);
                    continue;
                }
            };
            let insight = participant
                .encrypted_insight(|model, features| {
                    features.iter().filter(|x| model.predict(x) > 0.5).count() as f64
                });
            match insight {
                Ok(insight) => {
                    if let Err(err) = requests.request(insight, Span::none()).await {
                        warn!("insight submission rejected: {}", err);
                    }
                }
                Err(err) => warn!("failed to encrypt insight: {}", err),
            }
            if let Err(err) = requests.request(update, Span::none()).await {
                warn!("update submission rejected: {}", err);
            }
        }

        // the aggregated global model closes the round
        let new_global = loop {
            match model_listener.changed().await {
                Some(event) => {
                    if let ModelUpdate::New(model) = event.event {
                        break model;
                    }
                }
                None => return,
            }
        };
        info!("round {} aggregated a global model of length {}", round, new_global.len());

        match events.insight_listener().get_latest().event {
            InsightUpdate::New(ciphertext) => match auditor.reveal(&ciphertext) {
                Ok(total) => info!(
                    "round {} insight: {} positive predictions across the fleet",
                    round, total
                ),
                Err(err) => error!("failed to reveal round insight: {}", err),
            },
            InsightUpdate::Invalidate => info!("round {} published no insight", round),
        }
    }
}
