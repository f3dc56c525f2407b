//! Party formation and partial sum bookkeeping.

use derive_more::{Display, From, Into};
use tracing::debug;

use fedsum_core::{model::PrivatePart, PublicKeyId};

use super::{
    connection::{Connection, ConnectionId},
    requests::RequestError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From, Into)]
/// Index of a party in the [`PartyTable`].
pub struct PartyId(usize);

#[derive(Debug, Clone)]
/// An enrolled participant.
pub struct Participant {
    pub public_key: PublicKeyId,
    pub connection: Connection,
    /// The plaintext partial sum, once submitted.
    pub partial_sum: Option<PrivatePart>,
}

#[derive(Debug, Clone)]
/// A group of participants that jointly compute one sum.
pub struct Party {
    id: PartyId,
    participants: Vec<Participant>,
    /// Number of participants which submitted a partial sum.
    submitted: usize,
    /// Grows by one with every eviction.
    round: u64,
    /// The total of all partial sums, once the party completed.
    sum: Option<PrivatePart>,
}

impl Party {
    fn new(id: PartyId) -> Self {
        Self {
            id,
            participants: Vec::new(),
            submitted: 0,
            round: 0,
            sum: None,
        }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    /// The current round. Only partial sums produced for it are accepted.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn sum(&self) -> Option<&PrivatePart> {
        self.sum.as_ref()
    }

    /// Whether the party produced its sum. A completed party accepts no further changes.
    pub fn is_completed(&self) -> bool {
        self.sum.is_some()
    }

    /// Whether every member of a full party has submitted its partial sum.
    pub fn all_submitted(&self, party_size: usize) -> bool {
        self.participants.len() == party_size && self.submitted == party_size
    }

    /// The recorded partial sums, in enrollment order.
    ///
    /// Returns `None` if any member hasn't submitted yet.
    pub fn partial_sums(&self) -> Option<Vec<PrivatePart>> {
        self.participants
            .iter()
            .map(|p| p.partial_sum.clone())
            .collect()
    }

    /// Marks the party as completed with its total.
    pub fn complete(&mut self, sum: PrivatePart) {
        self.sum = Some(sum);
    }

    fn position(&self, public_key: &str) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.public_key == public_key)
    }
}

#[derive(Debug, Clone)]
/// The outcome of removing a participant from its party.
pub struct Eviction {
    /// The identity of the removed participant.
    pub public_key: PublicKeyId,
    /// The round the party entered.
    pub round: u64,
    /// The connections of the remaining members.
    pub remaining: Vec<Connection>,
}

#[derive(Debug)]
/// All parties formed by the coordinator.
///
/// Parties are never removed: a completed party stays in the table so that its members can't
/// enroll a second time.
pub struct PartyTable {
    party_size: usize,
    parties: Vec<Party>,
}

impl PartyTable {
    pub fn new(party_size: usize) -> Self {
        Self {
            party_size,
            parties: Vec::new(),
        }
    }

    pub fn party_size(&self) -> usize {
        self.party_size
    }

    pub fn get(&self, id: PartyId) -> Option<&Party> {
        self.parties.get(id.0)
    }

    pub fn get_mut(&mut self, id: PartyId) -> Option<&mut Party> {
        self.parties.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Party> {
        self.parties.iter()
    }

    /// Adds a participant to the first party with a free slot, or to a new party if all parties
    /// are full.
    ///
    /// # Errors
    /// Fails if the identity or the connection is already enrolled.
    pub fn enroll(
        &mut self,
        public_key: PublicKeyId,
        connection: Connection,
    ) -> Result<PartyId, RequestError> {
        if self.find(&public_key).is_some() {
            return Err(RequestError::AlreadyEnrolled);
        }
        if self.find_by_connection(connection.id()).is_some() {
            return Err(RequestError::ConnectionAlreadyEnrolled);
        }

        let party_size = self.party_size;
        let id = match self
            .parties
            .iter()
            .position(|party| !party.is_completed() && party.len() < party_size)
        {
            Some(index) => PartyId(index),
            None => {
                let id = PartyId(self.parties.len());
                debug!("forming party {}", id);
                self.parties.push(Party::new(id));
                id
            }
        };

        self.parties[id.0].participants.push(Participant {
            public_key,
            connection,
            partial_sum: None,
        });
        Ok(id)
    }

    /// Finds the party of an identity.
    pub fn find(&self, public_key: &str) -> Option<(PartyId, &Participant)> {
        self.parties.iter().find_map(|party| {
            party
                .participants
                .iter()
                .find(|p| p.public_key == public_key)
                .map(|p| (party.id, p))
        })
    }

    /// Finds the party of the participant enrolled on a connection.
    pub fn find_by_connection(&self, id: ConnectionId) -> Option<(PartyId, &Participant)> {
        self.parties.iter().find_map(|party| {
            party
                .participants
                .iter()
                .find(|p| p.connection.id() == id)
                .map(|p| (party.id, p))
        })
    }

    /// Records a partial sum of a participant produced for `round` and returns its party.
    ///
    /// # Errors
    /// Fails if the identity isn't enrolled, was enrolled on another connection, the partial sum
    /// belongs to another round than the current one of the party, or the party doesn't accept
    /// partial sums from it anymore.
    pub fn record_partial_sum(
        &mut self,
        public_key: &str,
        connection_id: ConnectionId,
        round: u64,
        partial_sum: PrivatePart,
    ) -> Result<PartyId, RequestError> {
        let (id, participant) = self
            .find(public_key)
            .ok_or(RequestError::UnknownParticipant)?;
        if participant.connection.id() != connection_id {
            return Err(RequestError::ConnectionMismatch);
        }

        let party = &mut self.parties[id.0];
        if party.is_completed() {
            return Err(RequestError::AlreadySubmitted);
        }
        if round != party.round {
            debug!(
                "refusing partial sum of round {} in round {} of party {}",
                round, party.round, id
            );
            return Err(RequestError::StaleRound(round, party.round));
        }
        let index = party
            .position(public_key)
            .ok_or(RequestError::InternalError("participant vanished"))?;
        let participant = &mut party.participants[index];
        if participant.partial_sum.is_some() {
            return Err(RequestError::AlreadySubmitted);
        }
        participant.partial_sum = Some(partial_sum);
        party.submitted += 1;
        Ok(id)
    }

    /// Removes the participant enrolled on a connection from its party, unless the party already
    /// completed.
    ///
    /// All partial sums recorded in the party are cleared, since each of them embeds a piece of
    /// the removed participant, and the party enters the next round.
    pub fn evict(&mut self, connection_id: ConnectionId) -> Option<Eviction> {
        let (id, _) = self.find_by_connection(connection_id)?;
        let party = &mut self.parties[id.0];
        if party.is_completed() {
            return None;
        }

        let index = party
            .participants
            .iter()
            .position(|p| p.connection.id() == connection_id)?;
        let removed = party.participants.remove(index);
        for participant in party.participants.iter_mut() {
            participant.partial_sum = None;
        }
        party.submitted = 0;
        party.round += 1;

        let remaining = party
            .participants
            .iter()
            .map(|p| p.connection.clone())
            .collect();
        Some(Eviction {
            public_key: removed.public_key,
            round: party.round,
            remaining,
        })
    }
}
