use std::sync::Arc;

use async_trait::async_trait;

use crate::state_machine::{
    coordinator::RoundParameters,
    events::ModelUpdate,
    phases::{Collect, Phase, PhaseName, PhaseState, PhaseStateError, Shared},
    requests::{RequestError, StartRequest, StateMachineRequest},
    StateMachine,
};

/// The idle phase: no round in progress.
///
/// Waits for a start request. Update and insight submissions received while
/// idle are rejected, which is also what happens to submissions that were
/// still queued when the previous round hit its cutoff.
#[derive(Debug)]
pub struct Idle {
    accepted: Option<StartRequest>,
}

#[async_trait]
impl Phase for PhaseState<Idle> {
    const NAME: PhaseName = PhaseName::Idle;

    async fn run(&mut self) -> Result<(), PhaseStateError> {
        loop {
            let (req, span, resp_tx) = self.next_request().await?;
            let _guard = span.enter();
            match req {
                StateMachineRequest::Start(start) => {
                    info!(
                        "accepted start request: {} participants, quorum {}",
                        start.participants.len(),
                        start.min_required
                    );
                    let _ = resp_tx.send(Ok(()));
                    self.private.accepted = Some(start);
                    return Ok(());
                }
                StateMachineRequest::Update(_) | StateMachineRequest::Insight(_) => {
                    Self::reject_request(RequestError::RoundClosed, resp_tx);
                }
            }
        }
    }

    fn next(mut self) -> Option<StateMachine> {
        // safe unwrap: run only returns successfully after accepting a start
        // request
        let start = self.private.accepted.take().unwrap();

        if let Some(global_model) = start.global_model {
            info!("bootstrapping global model from start request");
            self.shared.state.model_length = global_model.len();
            self.shared.state.global_model = Arc::new(global_model);
        }

        let params = RoundParameters {
            id: self.shared.state.round_id,
            participants: Arc::new(start.participants),
            min_required: start.min_required,
            timeout: start.timeout,
        };
        self.shared.state.round_params = params.clone();

        info!("broadcasting round parameters");
        self.shared.events.broadcast_params(params);

        info!("broadcasting current global model");
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(self.shared.state.global_model.clone()));

        Some(PhaseState::<Collect>::new(self.shared).into())
    }
}

impl PhaseState<Idle> {
    /// Creates a new idle state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Idle { accepted: None },
            shared,
        }
    }
}
