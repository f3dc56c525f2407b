//! Wrappers around the [rsa] and [aes-gcm] primitives.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [rsa]: https://docs.rs/rsa/
//! [aes-gcm]: https://docs.rs/aes-gcm/
//! [crypto module]: crate::crypto

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
    Nonce,
};
use rand::{rngs::OsRng, RngCore};
use rsa::{traits::PublicKeyParts, BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use super::envelope::{Envelope, NONCE_LENGTH};

/// Size of the RSA modulus in bits.
pub const KEY_BITS: usize = 2048;

/// Length in bytes of the symmetric `AES-256` key.
const SYMMETRIC_KEY_LENGTH: usize = 32;

/// The JWK algorithm identifier of the wrapping scheme.
const JWK_ALGORITHM: &str = "RSA-OAEP-256";

#[derive(Debug, Error)]
/// Errors related to key generation and key import.
pub enum KeyError {
    #[error("failed to generate a key pair: {0}")]
    Generation(#[source] rsa::Error),
    #[error("identity is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("identity is not a valid JWK: {0}")]
    Jwk(#[from] serde_json::Error),
    #[error("unsupported key type {0:?}")]
    KeyType(String),
    #[error("invalid RSA public key: {0}")]
    InvalidKey(#[source] rsa::Error),
}

#[derive(Debug, Error)]
/// Errors related to the encryption of a payload.
pub enum EncryptionError {
    #[error("failed to encrypt the payload")]
    Payload,
    #[error("failed to wrap the symmetric key: {0}")]
    KeyWrap(#[source] rsa::Error),
}

#[derive(Debug, Error)]
#[error("decryption failed")]
/// An envelope could not be opened.
///
/// This doesn't say whether unwrapping the symmetric key or authenticating the ciphertext failed.
pub struct DecryptionError;

#[derive(Debug, Clone)]
/// An `RSA-2048` key pair for hybrid encryption.
pub struct EncryptKeyPair {
    /// The public key, used to encrypt pieces for its owner.
    pub public: PublicEncryptKey,
    /// The secret key, used by its owner to open envelopes.
    pub secret: SecretEncryptKey,
}

impl EncryptKeyPair {
    /// Generates a new random `RSA-2048` key pair.
    ///
    /// This is expensive, callers in async contexts should run it on a blocking thread.
    pub fn generate() -> Result<Self, KeyError> {
        let secret = RsaPrivateKey::new(&mut OsRng, KEY_BITS).map_err(KeyError::Generation)?;
        let public = RsaPublicKey::from(&secret);
        Ok(Self {
            public: PublicEncryptKey(public),
            secret: SecretEncryptKey(secret),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
/// The JSON web key form of an exported public key.
struct Jwk {
    kty: String,
    n: String,
    e: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    ext: Option<bool>,
    #[serde(default)]
    key_ops: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// An `RSA` public key for hybrid encryption.
pub struct PublicEncryptKey(RsaPublicKey);

impl PublicEncryptKey {
    /// Exports the key in its textual identity form: the base64 encoding of its JWK.
    pub fn export(&self) -> String {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            n: base64::encode_config(self.0.n().to_bytes_be(), base64::URL_SAFE_NO_PAD),
            e: base64::encode_config(self.0.e().to_bytes_be(), base64::URL_SAFE_NO_PAD),
            alg: Some(JWK_ALGORITHM.to_string()),
            ext: Some(true),
            key_ops: vec!["encrypt".to_string()],
        };
        // serializing a struct of strings can't fail
        base64::encode(serde_json::to_vec(&jwk).unwrap_or_default())
    }

    /// Imports a key from its textual identity form.
    ///
    /// # Errors
    /// Fails if the identity isn't a base64 encoded `RSA` JWK.
    pub fn import(identity: &str) -> Result<Self, KeyError> {
        let json = base64::decode(identity)?;
        let jwk: Jwk = serde_json::from_slice(&json)?;
        if jwk.kty != "RSA" {
            return Err(KeyError::KeyType(jwk.kty));
        }
        let n = base64::decode_config(&jwk.n, base64::URL_SAFE_NO_PAD)?;
        let e = base64::decode_config(&jwk.e, base64::URL_SAFE_NO_PAD)?;
        RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map(Self)
            .map_err(KeyError::InvalidKey)
    }

    /// Encrypts a message for the owner of this key.
    ///
    /// A fresh symmetric key and nonce are generated for each call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, EncryptionError> {
        let mut key = [0_u8; SYMMETRIC_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        let mut iv = [0_u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::Payload)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| EncryptionError::Payload)?;
        let wrapped_key = self
            .0
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)
            .map_err(EncryptionError::KeyWrap)?;

        Ok(Envelope {
            wrapped_key,
            ciphertext,
            iv: iv.to_vec(),
        })
    }
}

#[derive(Clone)]
/// An `RSA` secret key for hybrid encryption.
pub struct SecretEncryptKey(RsaPrivateKey);

impl SecretEncryptKey {
    /// Opens an envelope encrypted for the public counterpart of this key.
    ///
    /// # Errors
    /// Fails if the symmetric key can't be unwrapped or the ciphertext doesn't authenticate.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, DecryptionError> {
        if envelope.iv.len() != NONCE_LENGTH {
            return Err(DecryptionError);
        }
        let key = self
            .0
            .decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
            .map_err(|_| DecryptionError)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| DecryptionError)?;
        cipher
            .decrypt(Nonce::from_slice(&envelope.iv), envelope.ciphertext.as_slice())
            .map_err(|_| DecryptionError)
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicEncryptKey {
        PublicEncryptKey(RsaPublicKey::from(&self.0))
    }
}

impl fmt::Debug for SecretEncryptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretEncryptKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    // key generation is slow in debug builds, share the key pairs across tests
    fn keys() -> &'static (EncryptKeyPair, EncryptKeyPair) {
        static KEYS: OnceLock<(EncryptKeyPair, EncryptKeyPair)> = OnceLock::new();
        KEYS.get_or_init(|| {
            (
                EncryptKeyPair::generate().unwrap(),
                EncryptKeyPair::generate().unwrap(),
            )
        })
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (keys, _) = keys();
        let message = b"Hello world!".to_vec();
        let envelope = keys.public.encrypt(&message).unwrap();
        assert_eq!(envelope.iv.len(), NONCE_LENGTH);
        assert_eq!(envelope.wrapped_key.len(), KEY_BITS / 8);
        assert_eq!(keys.secret.decrypt(&envelope).unwrap(), message);
    }

    #[test]
    fn test_encrypt_empty() {
        let (keys, _) = keys();
        let envelope = keys.public.encrypt(&[]).unwrap();
        assert!(keys.secret.decrypt(&envelope).unwrap().is_empty());
    }

    #[test]
    fn test_fresh_key_and_nonce() {
        let (keys, _) = keys();
        let e1 = keys.public.encrypt(b"same").unwrap();
        let e2 = keys.public.encrypt(b"same").unwrap();
        assert_ne!(e1.iv, e2.iv);
        assert_ne!(e1.wrapped_key, e2.wrapped_key);
        assert_ne!(e1.ciphertext, e2.ciphertext);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let (alice, bob) = keys();
        let envelope = alice.public.encrypt(b"for alice").unwrap();
        assert!(bob.secret.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_decrypt_tampered() {
        let (keys, _) = keys();
        let envelope = keys.public.encrypt(b"Hello world!").unwrap();

        for i in 0..envelope.ciphertext.len() {
            let mut tampered = envelope.clone();
            tampered.ciphertext[i] ^= 0x01;
            assert!(keys.secret.decrypt(&tampered).is_err());
        }

        for i in 0..envelope.iv.len() {
            let mut tampered = envelope.clone();
            tampered.iv[i] ^= 0x01;
            assert!(keys.secret.decrypt(&tampered).is_err());
        }

        let mut tampered = envelope.clone();
        tampered.wrapped_key[0] ^= 0x01;
        assert!(keys.secret.decrypt(&tampered).is_err());

        let mut tampered = envelope;
        tampered.iv.pop();
        assert!(keys.secret.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_export_import() {
        let (keys, _) = keys();
        let identity = keys.public.export();
        let imported = PublicEncryptKey::import(&identity).unwrap();
        assert_eq!(imported, keys.public);
        assert_eq!(keys.secret.public_key(), keys.public);

        // the identity is stable
        assert_eq!(imported.export(), identity);
    }

    #[test]
    fn test_export_jwk_members() {
        let (keys, _) = keys();
        let json = base64::decode(keys.public.export()).unwrap();
        let jwk: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["alg"], "RSA-OAEP-256");
        assert_eq!(jwk["ext"], true);
        assert_eq!(jwk["key_ops"], serde_json::json!(["encrypt"]));
        // 65537
        assert_eq!(jwk["e"], "AQAB");
    }

    #[test]
    fn test_import_invalid() {
        assert!(matches!(
            PublicEncryptKey::import("not base64!"),
            Err(KeyError::Encoding(_))
        ));
        assert!(matches!(
            PublicEncryptKey::import(&base64::encode("{}")),
            Err(KeyError::Jwk(_))
        ));
        let ec = r#"{"kty":"EC","n":"AQAB","e":"AQAB"}"#;
        assert!(matches!(
            PublicEncryptKey::import(&base64::encode(ec)),
            Err(KeyError::KeyType(_))
        ));
    }
}
