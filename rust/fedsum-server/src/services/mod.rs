//! This module provides the services for processing the messages of a connection.
//!
//! The [`MessageHandler`] parses the text frames received on a connection, answers model requests
//! from the latest published model and turns everything else into requests to the
//! [`Coordinator`]. Replies, including errors, are queued on the connection.
//!
//! [`Coordinator`]: crate::coordinator::Coordinator

pub mod fetchers;

use tracing::{debug, debug_span, warn, Span};

use fedsum_core::message::Message;

use self::fetchers::ModelFetcher;
use crate::coordinator::{
    connection::{Connection, ConnectionId},
    events::EventSubscriber,
    requests::{
        CoordinatorRequest,
        DisconnectRequest,
        EnrollRequest,
        PartialSumRequest,
        RelayRequest,
        RequestSender,
    },
};

/// Dispatches the messages of all connections.
#[derive(Debug, Clone)]
pub struct MessageHandler {
    requests: RequestSender,
    fetcher: ModelFetcher,
}

impl MessageHandler {
    pub fn new(events: &EventSubscriber, requests: RequestSender) -> Self {
        Self {
            requests,
            fetcher: ModelFetcher::new(events),
        }
    }

    /// Handles a text frame received on `connection`.
    ///
    /// Malformed messages, messages only the coordinator may send and refused requests are
    /// answered with an `error` message. The connection stays open in any case.
    pub async fn handle_message(&self, connection: &Connection, text: &str) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("failed to parse message: {}", err);
                connection.send(Message::parse_error());
                return;
            }
        };
        let span = request_span(connection.id(), message.method_name());

        let req: CoordinatorRequest = match message {
            Message::Enroll { encoded_public_key } => EnrollRequest {
                public_key: encoded_public_key,
                connection: connection.clone(),
            }
            .into(),
            Message::SendPiece { from, to, piece } => RelayRequest { from, to, piece }.into(),
            Message::SendPartialSum { from, partial_sum } => PartialSumRequest {
                connection_id: connection.id(),
                from,
                partial_sum,
            }
            .into(),
            Message::GetModel => {
                let model = self.fetcher.fetch();
                connection.send(Message::Model {
                    model: model.as_ref().clone(),
                });
                return;
            }
            message @ Message::Configuration { .. }
            | message @ Message::Model { .. }
            | message @ Message::Error { .. }
            | message @ Message::Leave { .. } => {
                debug!("refusing {} message from a client", message.method_name());
                connection.send(Message::Error {
                    reason: format!("{} is sent by the coordinator only", message.method_name()),
                });
                return;
            }
        };

        if let Err(err) = self.requests.request(req, span).await {
            warn!("request failed: {}", err);
            connection.send(Message::Error {
                reason: err.to_string(),
            });
        }
    }

    /// Tells the coordinator that `connection` closed.
    pub async fn handle_disconnect(&self, connection_id: ConnectionId) {
        let req = DisconnectRequest { connection_id };
        let span = request_span(connection_id, "disconnect");
        if let Err(err) = self.requests.request(req.into(), span).await {
            warn!("failed to handle disconnect: {}", err);
        }
    }
}

fn request_span(connection_id: ConnectionId, method: &'static str) -> Span {
    debug_span!("request", connection = %connection_id, method)
}
