#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Fedsum: secure sums for federated learning
//!
//! Several parties each hold a private model update: a list of parameter deltas and the number of
//! batches they were trained on. Fedsum lets them compute the *sum* of those updates without any
//! party, including the relay server, learning another party's individual update.
//!
//! This crate holds the building blocks shared by the coordinator ([`fedsum-server`]) and the
//! participants ([`fedsum-sdk`]):
//!
//! - [`share`]: additive secret splitting and reconstruction over scalars and tensors. A value is
//!   split into `n` pieces, `n - 1` of them random and a final residual, such that the pieces sum
//!   back to the value.
//! - [`crypto`]: hybrid encryption of pieces in transit. A fresh `AES-256-GCM` key encrypts the
//!   payload and is itself wrapped with the recipient's `RSA-OAEP` public key. The resulting
//!   [`Envelope`] can only be opened by the holder of the matching private key.
//! - [`model`]: tensors, weight lists and the [`PrivatePart`] a participant contributes.
//! - [`message`]: the JSON control messages exchanged over the websocket channel.
//!
//! The scheme hides individual updates from honest-but-curious parties. It is not a
//! cryptographically hardened MPC protocol and makes no claim against colluding participants.
//!
//! [`fedsum-server`]: https://docs.rs/fedsum-server
//! [`fedsum-sdk`]: https://docs.rs/fedsum-sdk
//! [`Envelope`]: crate::crypto::Envelope
//! [`PrivatePart`]: crate::model::PrivatePart

pub mod crypto;
pub mod message;
pub mod model;
pub mod share;

#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

/// The routable identity of a participant.
///
/// It is the base64 encoding of the participant's exported public key, see
/// [`PublicEncryptKey::export`]. There is no other identity scheme: the encoded key *is* the
/// address that pieces are relayed to.
///
/// [`PublicEncryptKey::export`]: crate::crypto::PublicEncryptKey::export
pub type PublicKeyId = String;
