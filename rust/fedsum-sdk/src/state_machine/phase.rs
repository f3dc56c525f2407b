use derive_more::Display;

use fedsum_core::{
    crypto::PublicEncryptKey,
    model::{PrivatePart, Shape, SumObject},
    PublicKeyId,
};

/// The name of the phase a participant is in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
    #[display(fmt = "Disconnected")]
    Disconnected,
    #[display(fmt = "Connected")]
    Connected,
    #[display(fmt = "Enrolled")]
    Enrolled,
    #[display(fmt = "AwaitingCompleteRoster")]
    AwaitingCompleteRoster,
    #[display(fmt = "Sharing")]
    Sharing,
    #[display(fmt = "AwaitingPartialSums")]
    AwaitingPartialSums,
    #[display(fmt = "PartialSumSubmitted")]
    PartialSumSubmitted,
}

impl PhaseName {
    /// Whether a round has been started and not been reset since.
    pub fn in_round(self) -> bool {
        matches!(
            self,
            Self::Sharing | Self::AwaitingPartialSums | Self::PartialSumSubmitted
        )
    }
}

/// Another member of the participant's party.
#[derive(Debug)]
pub(crate) struct Friend {
    pub public_key: PublicKeyId,
    pub key: PublicEncryptKey,
    /// The piece received from this friend, kept until the partial sum is computed.
    pub piece: Option<SumObject>,
}

/// The data of a started round.
#[derive(Debug)]
pub(crate) struct Round {
    pub shapes: Vec<Shape>,
    /// The piece of the update the participant keeps for itself.
    pub residual: PrivatePart,
}
