//! The aggregation coordinator.
//!
//! The [`Coordinator`] is a single task that owns all mutable server state: the [`PartyTable`]
//! and the [`ModelHistory`]. Other tasks talk to it through a [`RequestSender`], every request is
//! handled to completion before the next one is looked at. This serializes the check of a party's
//! completion barrier with the aggregation it triggers, so a party can't produce two layers.
//!
//! # Requests
//!
//! - **Enroll**: the participant is added to the first party with a free slot, or to a new party.
//!   It receives a `configuration` message with the party size and the current round of the
//!   party. It is then introduced to every member already in the party, and they are introduced
//!   to it, by `enroll` messages.
//! - **Relay**: an encrypted piece is forwarded verbatim to the connection of its recipient. If
//!   the recipient is unknown, the piece is dropped.
//! - **PartialSum**: the plaintext partial sum is checked against the model shapes and the round
//!   of the party, and recorded for the sender. If this was the last missing partial sum of the
//!   party, the partial sums are summed into the party total, the weights of the total are
//!   averaged over the party size and added to the newest layer. The result is appended as a new
//!   layer.
//! - **Disconnect**: depending on [`PartySettings::evict_on_disconnect`] the participant is either
//!   kept, blocking its party, or evicted. An evicted participant's party discards its recorded
//!   partial sums and enters the next round. The remaining members receive a `leave` message
//!   carrying the new round.
//!
//! The newest model is published through an [`EventSubscriber`], so that model requests don't
//! need to go through the coordinator.
//!
//! [`PartyTable`]: party::PartyTable
//! [`ModelHistory`]: history::ModelHistory
//! [`PartySettings::evict_on_disconnect`]: crate::settings::PartySettings::evict_on_disconnect

pub mod connection;
pub mod events;
pub mod history;
pub mod party;
pub mod requests;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fedsum_core::{
    message::Message,
    model::{ModelWeights, Shape, Weights},
    share::assemble_parts,
};

use self::{
    connection::ConnectionId,
    events::{EventPublisher, EventSubscriber},
    history::{LayerId, ModelHistory},
    party::{PartyId, PartyTable},
    requests::{
        CoordinatorRequest,
        DisconnectRequest,
        EnrollRequest,
        PartialSumRequest,
        RelayRequest,
        RequestError,
        RequestReceiver,
        RequestSender,
    },
};
use crate::settings::{ModelSettings, PartySettings};

/// The coordinator task.
pub struct Coordinator {
    party_settings: PartySettings,
    shapes: Vec<Shape>,
    parties: PartyTable,
    history: ModelHistory,
    requests: RequestReceiver,
    events: EventPublisher,
}

impl Coordinator {
    /// Creates a new coordinator whose history starts with a model filled with the configured
    /// initial value.
    ///
    /// Returns the coordinator as well as the handles to send it requests and to subscribe to its
    /// events.
    pub fn new(
        party_settings: PartySettings,
        model_settings: ModelSettings,
    ) -> (Self, RequestSender, EventSubscriber) {
        let ModelSettings {
            shapes,
            initial_value,
        } = model_settings;
        let history = ModelHistory::new(Weights::filled(&shapes, initial_value));
        let (events, subscriber) = EventPublisher::init(
            history.root().id,
            Arc::new(ModelWeights::from(history.root().weights.as_ref())),
        );
        let (requests, sender) = RequestReceiver::new();

        let coordinator = Self {
            party_settings,
            shapes,
            parties: PartyTable::new(party_settings.size),
            history,
            requests,
            events,
        };
        (coordinator, sender, subscriber)
    }

    /// Handles requests until all request senders are dropped.
    pub async fn run(mut self) {
        info!(
            "coordinator running with parties of {}",
            self.party_settings.size
        );
        while let Some((req, span, resp_tx)) = self.requests.recv().await {
            let res = {
                let _span_guard = span.enter();
                self.handle_request(req)
            };
            // the requester may have gone away in the meantime
            let _ = resp_tx.send(res);
        }
        info!("request channel closed, shutting down");
    }

    pub fn history(&self) -> &ModelHistory {
        &self.history
    }

    pub fn parties(&self) -> &PartyTable {
        &self.parties
    }

    /// Handles a single request.
    pub fn handle_request(&mut self, req: CoordinatorRequest) -> Result<(), RequestError> {
        debug!("handling {} request", req.name());
        match req {
            CoordinatorRequest::Enroll(req) => self.handle_enroll(req),
            CoordinatorRequest::Relay(req) => {
                self.handle_relay(req);
                Ok(())
            }
            CoordinatorRequest::PartialSum(req) => self.handle_partial_sum(req),
            CoordinatorRequest::Disconnect(req) => {
                self.handle_disconnect(req);
                Ok(())
            }
        }
    }

    fn handle_enroll(&mut self, req: EnrollRequest) -> Result<(), RequestError> {
        let EnrollRequest {
            public_key,
            connection,
        } = req;
        let party_id = self.parties.enroll(public_key.clone(), connection.clone())?;
        let party = self
            .parties
            .get(party_id)
            .ok_or(RequestError::InternalError("party vanished after enrollment"))?;
        info!(
            "connection {} enrolled in party {} ({}/{})",
            connection.id(),
            party_id,
            party.len(),
            self.party_settings.size
        );

        connection.send(Message::Configuration {
            number_of_friends: self.party_settings.size,
            round: party.round(),
        });
        for friend in party
            .participants()
            .iter()
            .filter(|p| p.public_key != public_key)
        {
            friend.connection.send(Message::Enroll {
                encoded_public_key: public_key.clone(),
            });
            connection.send(Message::Enroll {
                encoded_public_key: friend.public_key.clone(),
            });
        }
        Ok(())
    }

    fn handle_relay(&self, req: RelayRequest) {
        let RelayRequest { from, to, piece } = req;
        match self.parties.find(&to) {
            Some((party_id, recipient)) => {
                debug!(
                    "relaying piece to connection {} in party {}",
                    recipient.connection.id(),
                    party_id
                );
                recipient
                    .connection
                    .send(Message::SendPiece { from, to, piece });
            }
            None => debug!("dropping piece for unknown recipient"),
        }
    }

    fn handle_partial_sum(&mut self, req: PartialSumRequest) -> Result<(), RequestError> {
        let PartialSumRequest {
            connection_id,
            from,
            partial_sum,
        } = req;
        let round = partial_sum.round;
        let partial_sum = partial_sum.into_part(&self.shapes)?;
        let party_id = self
            .parties
            .record_partial_sum(&from, connection_id, round, partial_sum)?;

        let party = self
            .parties
            .get(party_id)
            .ok_or(RequestError::InternalError("party vanished after submission"))?;
        if party.is_completed() || !party.all_submitted(self.party_settings.size) {
            debug!("party {} is waiting for more partial sums", party_id);
            return Ok(());
        }

        let layer_id = self.aggregate(party_id)?;
        info!("party {} completed, appended layer {}", party_id, layer_id);
        Ok(())
    }

    /// Sums the partial sums of a party and appends the averaged result to the newest layer.
    fn aggregate(&mut self, party_id: PartyId) -> Result<LayerId, RequestError> {
        let party = self
            .parties
            .get_mut(party_id)
            .ok_or(RequestError::InternalError("unknown party"))?;
        let partial_sums = party.partial_sums().ok_or_else(|| {
            error!("party {} is missing partial sums", party_id);
            RequestError::AggregationFailed
        })?;
        let total = assemble_parts(&partial_sums).map_err(|err| {
            error!("failed to sum partial sums of party {}: {}", party_id, err);
            RequestError::AggregationFailed
        })?;

        let parent = self.history.newest();
        let average = total
            .model_weights
            .scale(1.0 / self.party_settings.size as f32);
        let weights = parent.weights.add(&average).map_err(|err| {
            error!("failed to update layer {}: {}", parent.id, err);
            RequestError::AggregationFailed
        })?;
        let parent_id = parent.id;

        party.complete(total.clone());
        let layer_id = self
            .history
            .append(parent_id, weights, total)
            .ok_or(RequestError::InternalError("newest layer vanished"))?;
        self.publish_newest();
        Ok(layer_id)
    }

    fn publish_newest(&mut self) {
        let newest = self.history.newest();
        let model = Arc::new(ModelWeights::from(newest.weights.as_ref()));
        let layer_id = newest.id;
        self.events.broadcast_model(layer_id, model);
    }

    fn handle_disconnect(&mut self, req: DisconnectRequest) {
        let DisconnectRequest { connection_id } = req;
        let party_id = match self.parties.find_by_connection(connection_id) {
            Some((party_id, _)) => party_id,
            None => {
                debug!("connection {} closed before enrolling", connection_id);
                return;
            }
        };

        if !self.party_settings.evict_on_disconnect {
            warn!(
                "participant on connection {} left party {}, the party still expects it",
                connection_id, party_id
            );
            return;
        }
        self.evict(party_id, connection_id);
    }

    fn evict(&mut self, party_id: PartyId, connection_id: ConnectionId) {
        match self.parties.evict(connection_id) {
            Some(eviction) => {
                info!(
                    "evicted participant on connection {} from party {}, entering round {}",
                    connection_id, party_id, eviction.round
                );
                for connection in eviction.remaining {
                    connection.send(Message::Leave {
                        encoded_public_key: eviction.public_key.clone(),
                        round: eviction.round,
                    });
                }
            }
            None => debug!(
                "participant on connection {} left completed party {}",
                connection_id, party_id
            ),
        }
    }
}

#[cfg(test)]
mod tests;
