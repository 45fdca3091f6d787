use async_trait::async_trait;
use thiserror::Error;

use crate::state_machine::{
    phases::{Idle, Phase, PhaseName, PhaseState, Shared, Shutdown},
    RoundFailed,
    StateMachine,
};

/// Error that can occur during the execution of a phase.
#[derive(Debug, Error)]
pub enum PhaseStateError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("round failed: {0}")]
    Round(#[from] RoundFailed),
    #[error("only {connected} distinct clients ever connected, {required} required")]
    StrategyAbort { connected: usize, required: usize },
}

#[async_trait]
impl Phase for PhaseState<PhaseStateError> {
    const NAME: PhaseName = PhaseName::Error;

    async fn run(&mut self) -> Result<(), PhaseStateError> {
        error!("phase state error: {}", self.private);
        Ok(())
    }

    /// A failed round is recoverable: the global model is left untouched
    /// and a new round can start. A broken request channel or an aborted
    /// strategy is not.
    fn next(self) -> Option<StateMachine> {
        Some(match self.private {
            PhaseStateError::Round(_) => PhaseState::<Idle>::new(self.shared).into(),
            PhaseStateError::RequestChannel(_) | PhaseStateError::StrategyAbort { .. } => {
                PhaseState::<Shutdown>::new(self.shared).into()
            }
        })
    }
}

impl PhaseState<PhaseStateError> {
    /// Creates a new error state.
    pub fn new(shared: Shared, error: PhaseStateError) -> Self {
        Self {
            private: error,
            shared,
        }
    }
}
