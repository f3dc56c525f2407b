//! Hybrid public-key encryption of protocol pieces.
//!
//! A participant owns an `RSA-2048` key pair. Its exported public key doubles as its identity on
//! the wire, see [`PublicKeyId`]. Pieces addressed to a participant are encrypted as follows:
//!
//! 1. a fresh random `AES-256-GCM` key and a fresh 12-byte nonce are generated,
//! 2. the plaintext is encrypted with that key under the nonce,
//! 3. the symmetric key is wrapped with the recipient's public key using `RSA-OAEP` with `SHA-256`.
//!
//! The three outputs form an [`Envelope`] which can be opened only with the matching secret key.
//! Nonces and keys are never reused since both are generated per call.
//!
//! # Examples
//! ```no_run
//! # use fedsum_core::crypto::{EncryptKeyPair, PublicEncryptKey};
//! let keys = EncryptKeyPair::generate().unwrap();
//! let identity = keys.public.export();
//!
//! // a peer only knows the identity
//! let recipient = PublicEncryptKey::import(&identity).unwrap();
//! let envelope = recipient.encrypt(b"Hello world!").unwrap();
//! assert_eq!(keys.secret.decrypt(&envelope).unwrap(), b"Hello world!".to_vec());
//! ```
//!
//! [`PublicKeyId`]: crate::PublicKeyId

pub(crate) mod encrypt;
pub(crate) mod envelope;

pub use self::{
    encrypt::{
        DecryptionError,
        EncryptKeyPair,
        EncryptionError,
        KeyError,
        PublicEncryptKey,
        SecretEncryptKey,
        KEY_BITS,
    },
    envelope::{Envelope, NONCE_LENGTH},
};
