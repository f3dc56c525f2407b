use thiserror::Error;
use tracing::{debug, info, warn};

use fedsum_core::{
    crypto::{EncryptKeyPair, EncryptionError, Envelope, KeyError, PublicEncryptKey},
    message::Message,
    model::{ModelWeights, PrivatePart, SumObject},
    share::{assemble_parts, split_part, ShareError},
    PublicKeyId,
};

use super::{boxed_io, BoxedError, Friend, PhaseName, Round, IO};
use crate::{CoordinatorClient, Notify};

/// Errors of the operations a participant triggers itself.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("the operation is not allowed in phase {0}")]
    NotReady(PhaseName),
    #[error("the round has already been started")]
    AlreadyStarted,
    #[error("key generation failed: {0}")]
    Key(#[from] KeyError),
    #[error("splitting the update failed: {0}")]
    Share(#[from] ShareError),
    #[error("encrypting a piece failed: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("serializing a piece failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("sending a message to the coordinator failed: {0}")]
    Io(Box<dyn std::error::Error + Send + Sync>),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<BoxedError> for ProtocolError {
    fn from(err: BoxedError) -> Self {
        Self::Io(err)
    }
}

/// The result of [`StateMachine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The pieces have been sent to every friend.
    Started,
    /// Not every member of the party is known yet, nothing has been sent. `expected` is `None`
    /// until the party size has been received.
    RosterIncomplete {
        known: usize,
        expected: Option<usize>,
    },
}

/// What handling a coordinator message resulted in.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Nothing noteworthy happened.
    Continue,
    /// The partial sum has been sent to the coordinator.
    PartialSumSubmitted,
    /// A member left the party during a round. The round has been discarded and must be started
    /// again once the party is complete.
    RoundReset,
    /// The coordinator sent a model.
    Model(ModelWeights),
}

/// The participant side of the protocol.
///
/// The state machine doesn't read from the coordinator connection itself: incoming messages are
/// fed to [`handle_message`]. Outgoing messages and notifications go through the client and
/// the notifier it was created with.
///
/// [`handle_message`]: StateMachine::handle_message
pub struct StateMachine {
    phase: PhaseName,
    keys: Option<EncryptKeyPair>,
    public_key: Option<PublicKeyId>,
    party_size: Option<usize>,
    /// The round of the party as announced by the coordinator.
    party_round: u64,
    friends: Vec<Friend>,
    round: Option<Round>,
    io: Box<dyn IO>,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("phase", &self.phase)
            .field("public_key", &self.public_key)
            .field("party_size", &self.party_size)
            .field("party_round", &self.party_round)
            .field("friends", &self.friends.len())
            .field("io", &"IO")
            .finish()
    }
}

impl StateMachine {
    /// Creates a disconnected state machine.
    pub fn new<C, N>(client: C, notifier: N) -> Self
    where
        C: CoordinatorClient + Send + 'static,
        N: Notify + Send + 'static,
    {
        Self::with_io(boxed_io(client, notifier))
    }

    pub(crate) fn with_io(io: Box<dyn IO>) -> Self {
        Self {
            phase: PhaseName::Disconnected,
            keys: None,
            public_key: None,
            party_size: None,
            party_round: 0,
            friends: Vec::new(),
            round: None,
            io,
        }
    }

    pub fn phase(&self) -> PhaseName {
        self.phase
    }

    /// The identity of the participant, once it has enrolled.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// The identities of the known members of the party, self excluded.
    pub fn friends(&self) -> impl Iterator<Item = &str> {
        self.friends.iter().map(|friend| friend.public_key.as_str())
    }

    /// Marks the connection to the coordinator as established.
    pub fn connected(&mut self) {
        if self.phase == PhaseName::Disconnected {
            self.phase = PhaseName::Connected;
            self.io.notify_ready();
        }
    }

    /// Marks the connection to the coordinator as lost.
    pub fn disconnected(&mut self) {
        info!("disconnected in phase {}", self.phase);
        self.phase = PhaseName::Disconnected;
    }

    /// Generates a key pair and enrolls with its public key.
    ///
    /// # Errors
    /// Fails if the participant isn't connected or has already enrolled.
    pub async fn enroll(&mut self) -> Result<PublicKeyId, ProtocolError> {
        self.check_phase(PhaseName::Connected)?;
        let keys = tokio::task::spawn_blocking(EncryptKeyPair::generate)
            .await
            .map_err(|_| ProtocolError::Internal("key generation task panicked"))??;
        self.enroll_with(keys).await
    }

    /// Enrolls with the public key of `keys`.
    ///
    /// # Errors
    /// Fails if the participant isn't connected or has already enrolled.
    pub async fn enroll_with(&mut self, keys: EncryptKeyPair) -> Result<PublicKeyId, ProtocolError> {
        self.check_phase(PhaseName::Connected)?;
        let public_key = keys.public.export();
        self.io
            .send_message(Message::Enroll {
                encoded_public_key: public_key.clone(),
            })
            .await?;

        debug!("enrolled");
        self.keys = Some(keys);
        self.public_key = Some(public_key.clone());
        self.phase = PhaseName::Enrolled;
        Ok(public_key)
    }

    /// Asks the coordinator for its newest model. The model arrives as a [`Progress::Model`].
    ///
    /// # Errors
    /// Fails if the participant isn't connected.
    pub async fn request_model(&mut self) -> Result<(), ProtocolError> {
        if self.phase == PhaseName::Disconnected {
            return Err(ProtocolError::NotReady(self.phase));
        }
        self.io.send_message(Message::GetModel).await?;
        Ok(())
    }

    /// Splits `update` into one piece per party member and sends an encrypted piece to every
    /// friend.
    ///
    /// Nothing happens if the party isn't complete yet, the call has to be repeated later.
    ///
    /// # Errors
    /// Fails if the participant hasn't enrolled, if a round is already running or if the pieces
    /// can't be produced or sent. In the latter case the round is discarded.
    pub async fn start(&mut self, update: PrivatePart) -> Result<StartOutcome, ProtocolError> {
        match self.phase {
            PhaseName::Enrolled | PhaseName::AwaitingCompleteRoster => {}
            phase if phase.in_round() => return Err(ProtocolError::AlreadyStarted),
            phase => return Err(ProtocolError::NotReady(phase)),
        }
        let known = self.friends.len();
        match self.party_size {
            Some(size) if known + 1 == size => {}
            expected => {
                debug!("party incomplete, knowing {} friends", known);
                return Ok(StartOutcome::RosterIncomplete {
                    known,
                    expected: expected.map(|size| size.saturating_sub(1)),
                });
            }
        }

        self.phase = PhaseName::Sharing;
        if let Err(err) = self.share(update).await {
            warn!("failed to share the update: {}", err);
            self.reset_round();
            return Err(err);
        }
        self.phase = PhaseName::AwaitingPartialSums;
        info!("sent pieces to {} friends", known);

        self.try_submit().await?;
        Ok(StartOutcome::Started)
    }

    async fn share(&mut self, update: PrivatePart) -> Result<(), ProtocolError> {
        let from = self
            .public_key
            .clone()
            .ok_or(ProtocolError::Internal("enrolled without a public key"))?;
        let mut pieces = split_part(&update, self.friends.len() + 1)?;
        let residual = pieces
            .pop()
            .ok_or(ProtocolError::Internal("split produced no pieces"))?;

        let round = self.party_round;
        let mut messages = Vec::with_capacity(pieces.len());
        for (friend, piece) in self.friends.iter().zip(&pieces) {
            let payload = serde_json::to_vec(&piece.to_sum_object().with_round(round))?;
            let envelope = friend.key.encrypt(&payload)?;
            messages.push(Message::piece(
                from.clone(),
                friend.public_key.clone(),
                &envelope,
            ));
        }
        for message in messages {
            self.io.send_message(message).await?;
        }

        let shapes = update.model_weights.shapes();
        // pieces that arrived early can only be checked now
        for friend in self.friends.iter_mut() {
            if let Some(piece) = &friend.piece {
                if piece.clone().into_part(&shapes).is_err() {
                    warn!("dropping piece of mismatching shape");
                    friend.piece = None;
                }
            }
        }
        self.round = Some(Round { shapes, residual });
        Ok(())
    }

    /// Handles a message received from the coordinator.
    ///
    /// # Errors
    /// Fails if the message completed the pieces but the partial sum couldn't be sent.
    pub async fn handle_message(&mut self, message: Message) -> Result<Progress, ProtocolError> {
        match message {
            Message::Configuration {
                number_of_friends,
                round,
            } => {
                self.on_configuration(number_of_friends, round);
                Ok(Progress::Continue)
            }
            Message::Enroll { encoded_public_key } => {
                self.on_enroll(encoded_public_key);
                Ok(Progress::Continue)
            }
            Message::SendPiece { from, to, piece } => self.on_piece(from, to, &piece).await,
            Message::Leave {
                encoded_public_key,
                round,
            } => Ok(self.on_leave(&encoded_public_key, round)),
            Message::Model { model } => Ok(Progress::Model(model)),
            Message::Error { reason } => {
                warn!("coordinator reported an error: {}", reason);
                Ok(Progress::Continue)
            }
            message @ Message::SendPartialSum { .. } | message @ Message::GetModel => {
                debug!("ignoring {} message", message.method_name());
                Ok(Progress::Continue)
            }
        }
    }

    fn on_configuration(&mut self, party_size: usize, round: u64) {
        debug!("party size is {}, round {}", party_size, round);
        self.party_size = Some(party_size);
        self.party_round = round;
        if self.phase == PhaseName::Enrolled {
            self.phase = PhaseName::AwaitingCompleteRoster;
        }
    }

    fn on_enroll(&mut self, public_key: PublicKeyId) {
        if self.public_key.as_ref() == Some(&public_key)
            || self.friends.iter().any(|f| f.public_key == public_key)
        {
            debug!("ignoring known participant");
            return;
        }
        let key = match PublicEncryptKey::import(&public_key) {
            Ok(key) => key,
            Err(err) => {
                warn!("ignoring participant with invalid identity: {}", err);
                return;
            }
        };
        self.friends.push(Friend {
            public_key,
            key,
            piece: None,
        });
        info!("{} friends known", self.friends.len());
        if let Some(friend) = self.friends.last() {
            self.io.notify_new_participant(&friend.public_key);
        }
    }

    async fn on_piece(
        &mut self,
        from: PublicKeyId,
        to: PublicKeyId,
        piece: &str,
    ) -> Result<Progress, ProtocolError> {
        if self.public_key.as_ref() != Some(&to) {
            debug!("ignoring piece for another participant");
            return Ok(Progress::Continue);
        }
        let keys = match &self.keys {
            Some(keys) => keys,
            None => return Ok(Progress::Continue),
        };
        let friend = match self.friends.iter_mut().find(|f| f.public_key == from) {
            Some(friend) => friend,
            None => {
                debug!("ignoring piece from unknown participant");
                return Ok(Progress::Continue);
            }
        };
        if friend.piece.is_some() {
            debug!("ignoring duplicate piece");
            return Ok(Progress::Continue);
        }

        let piece = match open_piece(keys, piece) {
            Some(piece) => piece,
            None => return Ok(Progress::Continue),
        };
        if piece.round != self.party_round {
            debug!(
                "dropping piece of round {} in round {}",
                piece.round, self.party_round
            );
            return Ok(Progress::Continue);
        }
        if let Some(round) = &self.round {
            if piece.clone().into_part(&round.shapes).is_err() {
                warn!("dropping piece of mismatching shape");
                return Ok(Progress::Continue);
            }
        }
        friend.piece = Some(piece);
        self.try_submit().await
    }

    fn on_leave(&mut self, public_key: &str, round: u64) -> Progress {
        let position = self.friends.iter().position(|f| f.public_key == public_key);
        if position.is_none() && round == self.party_round {
            debug!("ignoring leave of unknown participant");
            return Progress::Continue;
        }
        if let Some(position) = position {
            let friend = self.friends.remove(position);
            self.io.notify_removed_participant(&friend.public_key);
        }

        // pieces received so far belong to the aborted round
        debug!("party entered round {}", round);
        self.party_round = round;
        self.friends.iter_mut().for_each(|f| f.piece = None);
        if self.phase.in_round() {
            info!("a friend left, discarding the round");
            self.reset_round();
            Progress::RoundReset
        } else {
            Progress::Continue
        }
    }

    /// Sends the partial sum if the pieces of every friend have arrived.
    async fn try_submit(&mut self) -> Result<Progress, ProtocolError> {
        if self.phase != PhaseName::AwaitingPartialSums
            || Some(self.friends.len() + 1) != self.party_size
        {
            return Ok(Progress::Continue);
        }
        let round = match &self.round {
            Some(round) => round,
            None => return Ok(Progress::Continue),
        };

        let mut parts = vec![round.residual.clone()];
        for friend in &self.friends {
            match &friend.piece {
                Some(piece) => parts.push(
                    piece
                        .clone()
                        .into_part(&round.shapes)
                        .map_err(ShareError::from)?,
                ),
                None => return Ok(Progress::Continue),
            }
        }
        let partial_sum = assemble_parts(&parts)?;
        let from = self
            .public_key
            .clone()
            .ok_or(ProtocolError::Internal("enrolled without a public key"))?;
        self.io
            .send_message(Message::SendPartialSum {
                from,
                partial_sum: partial_sum.to_sum_object().with_round(self.party_round),
            })
            .await?;

        info!("partial sum submitted");
        self.phase = PhaseName::PartialSumSubmitted;
        self.io.notify_partial_sum_submitted();
        Ok(Progress::PartialSumSubmitted)
    }

    fn reset_round(&mut self) {
        self.round = None;
        self.friends.iter_mut().for_each(|f| f.piece = None);
        self.phase = PhaseName::AwaitingCompleteRoster;
    }

    fn check_phase(&self, expected: PhaseName) -> Result<(), ProtocolError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ProtocolError::NotReady(self.phase))
        }
    }
}

/// Decrypts a piece. Pieces that can't be opened are dropped.
fn open_piece(keys: &EncryptKeyPair, piece: &str) -> Option<SumObject> {
    let envelope = Envelope::from_wire(piece)
        .map_err(|err| warn!("dropping malformed piece: {}", err))
        .ok()?;
    let plaintext = keys
        .secret
        .decrypt(&envelope)
        .map_err(|err| warn!("dropping piece: {}", err))
        .ok()?;
    serde_json::from_slice(&plaintext)
        .map_err(|err| warn!("dropping piece with malformed content: {}", err))
        .ok()
}
