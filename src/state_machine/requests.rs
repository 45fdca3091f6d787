//! The [`StateMachine`]'s request channel and request types.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::{
    collections::HashSet,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use derive_more::From;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::Span;

use crate::{
    crypto::Ciphertext,
    message::{InsightSubmission, UpdateSubmission},
    model::Model,
    ClientId,
};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("the client is not part of the current round's participant set")]
    UnknownParticipant,
    #[error("no round is currently accepting submissions")]
    RoundClosed,
    #[error("a round is already in progress")]
    RoundInProgress,
    #[error("the request could not be processed due to an internal error: {0}")]
    InternalError(&'static str),
}

/// A request to open a new round. Accepted only while the coordinator is
/// idle.
#[derive(Debug)]
pub struct StartRequest {
    /// Replaces the coordinator's global parameters when set. Used to
    /// bootstrap the very first round.
    pub global_model: Option<Model>,
    /// The clients allowed to submit this round.
    pub participants: HashSet<ClientId>,
    /// Submissions required before the round may aggregate.
    pub min_required: usize,
    /// Hard deadline for the collection window.
    pub timeout: Duration,
}

/// An update submission. Overwrites any earlier submission from the same
/// client in the current round.
#[derive(Debug)]
pub struct UpdateRequest {
    pub client_id: ClientId,
    pub model: Model,
    pub sample_count: u32,
}

/// An encrypted insight submission.
#[derive(Debug)]
pub struct InsightRequest {
    pub client_id: ClientId,
    pub ciphertext: Ciphertext,
}

/// A [`StateMachine`] request.
///
/// [`StateMachine`]: crate::state_machine
#[derive(Debug, From)]
pub enum StateMachineRequest {
    Start(StartRequest),
    Update(UpdateRequest),
    Insight(InsightRequest),
}

impl From<UpdateSubmission> for StateMachineRequest {
    fn from(submission: UpdateSubmission) -> Self {
        StateMachineRequest::Update(UpdateRequest {
            client_id: submission.client_id,
            model: submission.parameters,
            sample_count: submission.sample_count,
        })
    }
}

impl From<InsightSubmission> for StateMachineRequest {
    fn from(submission: InsightSubmission) -> Self {
        StateMachineRequest::Insight(InsightRequest {
            client_id: submission.client_id,
            ciphertext: submission.ciphertext,
        })
    }
}

/// The sender half of a request's response channel.
pub type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// A handle to send requests to the [`StateMachine`].
///
/// [`StateMachine`]: crate::state_machine
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<(StateMachineRequest, Span, ResponseSender)>);

impl RequestSender {
    /// Sends a request to the [`StateMachine`] and awaits its response.
    ///
    /// # Errors
    /// Fails if the request is rejected, or if the [`StateMachine`] has
    /// already shut down and the request channel has been closed as a result.
    ///
    /// [`StateMachine`]: crate::state_machine
    pub async fn request(
        &self,
        req: impl Into<StateMachineRequest>,
        span: Span,
    ) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<(), RequestError>>();
        self.0.send((req.into(), span, resp_tx)).map_err(|_| {
            RequestError::InternalError(
                "failed to send request to the state machine: state machine is shutting down",
            )
        })?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the state machine")
        })?
    }

    /// Whether the state machine is still accepting requests.
    pub fn is_open(&self) -> bool {
        !self.0.is_closed()
    }
}

/// The receiver half of the request channel used by the [`StateMachine`].
///
/// [`StateMachine`]: crate::state_machine
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<(StateMachineRequest, Span, ResponseSender)>);

impl Stream for RequestReceiver {
    type Item = (StateMachineRequest, Span, ResponseSender);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        trace!("RequestReceiver: polling");
        self.get_mut().0.poll_recv(cx)
    }
}

impl RequestReceiver {
    /// Creates a new request channel and returns the [`RequestReceiver`] as
    /// well as the [`RequestSender`] half.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel::<(StateMachineRequest, Span, ResponseSender)>();
        (RequestReceiver::from(rx), RequestSender::from(tx))
    }

    /// Closes the request channel.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request.
    pub async fn recv(&mut self) -> Option<(StateMachineRequest, Span, ResponseSender)> {
        self.0.recv().await
    }

    /// Retrieves the next pending request without blocking.
    pub fn try_recv(
        &mut self,
    ) -> Result<(StateMachineRequest, Span, ResponseSender), mpsc::error::TryRecvError> {
        self.0.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel() {
        let (mut recv, snd) = RequestReceiver::new();
        let (resp_tx, _resp_rx) = oneshot::channel();
        let req = StateMachineRequest::Update(UpdateRequest {
            client_id: ClientId::new_v4(),
            model: vec![1.0].into(),
            sample_count: 1,
        });
        snd.0.send((req, Span::none(), resp_tx)).unwrap();
        assert!(recv.recv().await.is_some());
        drop(snd);
        assert!(recv.recv().await.is_none());
    }
}
