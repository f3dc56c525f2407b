//! This module provides the coordinator's `CoordinatorRequest`, `RequestSender` and
//! `RequestReceiver` types.

use derive_more::From;
use displaydoc::Display;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::Span;

use fedsum_core::{model::ShapeError, model::SumObject, PublicKeyId};

use super::connection::{Connection, ConnectionId};

/// Errors which can occur while the coordinator handles a request.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// The participant is already enrolled.
    AlreadyEnrolled,
    /// The connection already enrolled a participant.
    ConnectionAlreadyEnrolled,
    /// The participant is not enrolled.
    UnknownParticipant,
    /// The participant was enrolled by another connection.
    ConnectionMismatch,
    /// The participant already submitted its partial sum.
    AlreadySubmitted,
    /// The partial sum belongs to round {0} but the party is in round {1}.
    StaleRound(u64, u64),
    /// Invalid partial sum: {0}.
    InvalidPartialSum(#[from] ShapeError),
    /// The partial sums of the party could not be aggregated.
    AggregationFailed,
    /// The request could not be processed due to an internal error: {0}.
    InternalError(&'static str),
}

/// An enrollment request.
#[derive(Debug)]
pub struct EnrollRequest {
    /// The identity of the participant.
    pub public_key: PublicKeyId,
    /// The connection the participant enrolled on.
    pub connection: Connection,
}

/// A request to relay an encrypted piece.
#[derive(Debug)]
pub struct RelayRequest {
    pub from: PublicKeyId,
    pub to: PublicKeyId,
    /// The wire form of the envelope, relayed verbatim.
    pub piece: String,
}

/// A partial sum submission.
#[derive(Debug)]
pub struct PartialSumRequest {
    /// The connection the partial sum arrived on.
    pub connection_id: ConnectionId,
    /// The identity the partial sum claims to be from.
    pub from: PublicKeyId,
    pub partial_sum: SumObject,
}

/// Notification that a connection closed.
#[derive(Debug)]
pub struct DisconnectRequest {
    pub connection_id: ConnectionId,
}

/// A [`Coordinator`] request.
///
/// [`Coordinator`]: crate::coordinator::Coordinator
#[derive(Debug, From)]
pub enum CoordinatorRequest {
    Enroll(EnrollRequest),
    Relay(RelayRequest),
    PartialSum(PartialSumRequest),
    Disconnect(DisconnectRequest),
}

impl CoordinatorRequest {
    /// A short name of the request for logging.
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorRequest::Enroll(_) => "enroll",
            CoordinatorRequest::Relay(_) => "relay",
            CoordinatorRequest::PartialSum(_) => "partial_sum",
            CoordinatorRequest::Disconnect(_) => "disconnect",
        }
    }
}

/// A channel for the coordinator to send the response to a [`CoordinatorRequest`].
pub(in crate::coordinator) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// A handle to send requests to the [`Coordinator`].
///
/// [`Coordinator`]: crate::coordinator::Coordinator
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<(CoordinatorRequest, Span, ResponseSender)>);

impl RequestSender {
    /// Sends a request to the [`Coordinator`] and waits for it to be handled.
    ///
    /// # Errors
    /// Fails if the [`Coordinator`] refused the request or has already shut down.
    ///
    /// [`Coordinator`]: crate::coordinator::Coordinator
    pub async fn request(&self, req: CoordinatorRequest, span: Span) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<(), RequestError>>();
        self.0.send((req, span, resp_tx)).map_err(|_| {
            RequestError::InternalError(
                "failed to send request to the coordinator: coordinator is shutting down",
            )
        })?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the coordinator")
        })?
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// The receiver half of the request channel that is used by the [`Coordinator`] to receive
/// requests.
///
/// [`Coordinator`]: crate::coordinator::Coordinator
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<(CoordinatorRequest, Span, ResponseSender)>);

impl RequestReceiver {
    /// Creates a new request channel and returns the [`RequestReceiver`] as well as the
    /// [`RequestSender`] half.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel::<(CoordinatorRequest, Span, ResponseSender)>();
        let receiver = RequestReceiver::from(rx);
        let handle = RequestSender::from(tx);
        (receiver, handle)
    }

    /// Receives the next request.
    /// See [the `tokio` documentation][receive] for more information.
    ///
    /// [receive]: https://docs.rs/tokio/1/tokio/sync/mpsc/struct.UnboundedReceiver.html#method.recv
    pub async fn recv(&mut self) -> Option<(CoordinatorRequest, Span, ResponseSender)> {
        self.0.recv().await
    }
}
