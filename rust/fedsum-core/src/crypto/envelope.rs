//! Transportable ciphertext bundles.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use serde::{Deserialize, Serialize};

/// Length in bytes of an `AES-GCM` nonce.
pub const NONCE_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A self-contained ciphertext that only the holder of the recipient's secret key can open.
///
/// On the wire each field is base64 encoded and the envelope itself travels as JSON text, see
/// [`Envelope::to_wire()`].
pub struct Envelope {
    /// The symmetric key, wrapped with the recipient's public key.
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// The authenticated ciphertext, including the tag.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// The nonce the ciphertext was produced with.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

impl Envelope {
    /// Serializes the envelope into the textual form relayed in a `sendPiece` message.
    pub fn to_wire(&self) -> String {
        // all fields are plain strings once encoded
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses an envelope from its textual form.
    pub fn from_wire(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

mod base64_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(D::Error::custom)
    }
}
