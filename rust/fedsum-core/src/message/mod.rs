//! The control messages exchanged between participants and the coordinator.
//!
//! Every message is a JSON object discriminated by its `methodName` member, the remaining members
//! are camelCase:
//!
//! | `methodName`     | direction        | members                              |
//! |------------------|------------------|--------------------------------------|
//! | `enroll`         | both             | `encodedPublicKey`                   |
//! | `configuration`  | server to client | `numberOfFriends`, `round`           |
//! | `sendPiece`      | relayed          | `from`, `to`, `piece`                |
//! | `sendPartialSum` | client to server | `from`, `partialSum`                 |
//! | `getModel`       | client to server |                                      |
//! | `model`          | server to client | `model: {weightShapes, weightData}`  |
//! | `error`          | server to client | `reason`                             |
//! | `leave`          | server to client | `encodedPublicKey`, `round`          |
//!
//! `round` is the current round of the party. It starts at `0` and grows by one whenever a member
//! leaves. Participants stamp it into every [`SumObject`] they produce, so that pieces and partial
//! sums still in flight from an aborted round can be told apart. A missing `round` means `0`.
//!
//! A `piece` is the [wire form] of an [`Envelope`]. The coordinator relays it verbatim and never
//! looks inside.
//!
//! [wire form]: crate::crypto::Envelope::to_wire
//! [`Envelope`]: crate::crypto::Envelope

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    crypto::Envelope,
    model::{ModelWeights, SumObject},
    PublicKeyId,
};

/// The reason sent back for messages which can't be parsed.
pub const PARSE_ERROR_REASON: &str = "Parse Error";

#[derive(Debug, Error)]
/// Errors related to decoding messages.
pub enum MessageError {
    #[error("malformed message: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "methodName", rename_all = "camelCase")]
/// A control message.
pub enum Message {
    /// Registers a participant, or announces a new peer to a participant.
    #[serde(rename_all = "camelCase")]
    Enroll { encoded_public_key: PublicKeyId },
    /// Announces the size and the current round of the party the participant was assigned to.
    #[serde(rename_all = "camelCase")]
    Configuration {
        number_of_friends: usize,
        #[serde(default)]
        round: u64,
    },
    /// An encrypted piece for `to`.
    SendPiece {
        from: PublicKeyId,
        to: PublicKeyId,
        piece: String,
    },
    /// The plaintext partial sum of a participant.
    #[serde(rename_all = "camelCase")]
    SendPartialSum {
        from: PublicKeyId,
        partial_sum: SumObject,
    },
    /// Requests the newest model.
    GetModel,
    /// The newest model.
    Model { model: ModelWeights },
    /// The previous message was refused.
    Error { reason: String },
    /// A peer left the party, which entered `round`.
    #[serde(rename_all = "camelCase")]
    Leave {
        encoded_public_key: PublicKeyId,
        #[serde(default)]
        round: u64,
    },
}

impl Message {
    /// Decodes a message from its JSON text.
    ///
    /// # Errors
    /// Fails if the text isn't a well formed message.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        serde_json::from_str(text).map_err(MessageError::from)
    }

    /// Encodes the message into its JSON text.
    pub fn encode(&self) -> String {
        // the message types only contain strings, numbers and sequences
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Creates a `sendPiece` message carrying an envelope.
    pub fn piece(from: PublicKeyId, to: PublicKeyId, envelope: &Envelope) -> Self {
        Message::SendPiece {
            from,
            to,
            piece: envelope.to_wire(),
        }
    }

    /// Creates the reply to a message which couldn't be parsed.
    pub fn parse_error() -> Self {
        Message::Error {
            reason: PARSE_ERROR_REASON.to_string(),
        }
    }

    /// Whether only the coordinator may send this message.
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            Message::Configuration { .. }
                | Message::Model { .. }
                | Message::Error { .. }
                | Message::Leave { .. }
        )
    }

    /// The `methodName` of the message.
    pub fn method_name(&self) -> &'static str {
        match self {
            Message::Enroll { .. } => "enroll",
            Message::Configuration { .. } => "configuration",
            Message::SendPiece { .. } => "sendPiece",
            Message::SendPartialSum { .. } => "sendPartialSum",
            Message::GetModel => "getModel",
            Message::Model { .. } => "model",
            Message::Error { .. } => "error",
            Message::Leave { .. } => "leave",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn to_json(message: &Message) -> serde_json::Value {
        serde_json::from_str(&message.encode()).unwrap()
    }

    #[test]
    fn test_enroll() {
        let message = Message::Enroll {
            encoded_public_key: "key".to_string(),
        };
        assert_eq!(
            to_json(&message),
            json!({"methodName": "enroll", "encodedPublicKey": "key"})
        );
        assert_eq!(
            Message::decode(r#"{"methodName":"enroll","encodedPublicKey":"key"}"#).unwrap(),
            message
        );
    }

    #[test]
    fn test_configuration() {
        let message = Message::decode(r#"{"methodName":"configuration","numberOfFriends":3}"#)
            .unwrap();
        assert_eq!(
            message,
            Message::Configuration {
                number_of_friends: 3,
                round: 0,
            }
        );
        assert!(message.is_server_only());

        let message = Message::Configuration {
            number_of_friends: 2,
            round: 5,
        };
        assert_eq!(
            to_json(&message),
            json!({"methodName": "configuration", "numberOfFriends": 2, "round": 5})
        );
    }

    #[test]
    fn test_send_piece() {
        let envelope = Envelope {
            wrapped_key: vec![1],
            ciphertext: vec![2],
            iv: vec![3],
        };
        let message = Message::piece("a".to_string(), "b".to_string(), &envelope);
        let json = to_json(&message);
        assert_eq!(json["methodName"], "sendPiece");
        assert_eq!(json["from"], "a");
        assert_eq!(json["to"], "b");

        // the piece is itself JSON text
        let piece = json["piece"].as_str().unwrap();
        assert_eq!(Envelope::from_wire(piece).unwrap(), envelope);
    }

    #[test]
    fn test_send_partial_sum() {
        let text = r#"{
            "methodName": "sendPartialSum",
            "from": "a",
            "partialSum": {"trainedBatches": 30, "modelWeights": [[1.5, 2.5], [3.0]]}
        }"#;
        let message = Message::decode(text).unwrap();
        assert_eq!(
            message,
            Message::SendPartialSum {
                from: "a".to_string(),
                partial_sum: SumObject {
                    trained_batches: 30,
                    model_weights: vec![vec![1.5, 2.5], vec![3.0]],
                    round: 0,
                },
            }
        );
        assert!(!message.is_server_only());
    }

    #[test]
    fn test_get_model() {
        assert_eq!(to_json(&Message::GetModel), json!({"methodName": "getModel"}));
        assert_eq!(
            Message::decode(r#"{"methodName":"getModel"}"#).unwrap(),
            Message::GetModel
        );
    }

    #[test]
    fn test_model() {
        let message = Message::Model {
            model: ModelWeights {
                weight_shapes: vec![vec![2]],
                weight_data: vec![vec![1.0, 1.0]],
            },
        };
        assert_eq!(
            to_json(&message),
            json!({
                "methodName": "model",
                "model": {"weightShapes": [[2]], "weightData": [[1.0, 1.0]]},
            })
        );
    }

    #[test]
    fn test_error_and_leave() {
        assert_eq!(
            to_json(&Message::parse_error()),
            json!({"methodName": "error", "reason": "Parse Error"})
        );
        let leave = Message::Leave {
            encoded_public_key: "a".to_string(),
            round: 1,
        };
        assert_eq!(
            to_json(&leave),
            json!({"methodName": "leave", "encodedPublicKey": "a", "round": 1})
        );
        assert!(leave.is_server_only());
    }

    #[test]
    fn test_decode_invalid() {
        // not json
        assert!(Message::decode("hello").is_err());
        // unknown method
        assert!(Message::decode(r#"{"methodName":"reset"}"#).is_err());
        // missing tag
        assert!(Message::decode(r#"{"encodedPublicKey":"a"}"#).is_err());
        // missing member
        assert!(Message::decode(r#"{"methodName":"sendPiece","from":"a","to":"b"}"#).is_err());
        // wrong member type
        assert!(
            Message::decode(r#"{"methodName":"configuration","numberOfFriends":"three"}"#)
                .is_err()
        );
        assert!(Message::decode(
            r#"{"methodName":"sendPartialSum","from":"a","partialSum":{"trainedBatches":1.5,"modelWeights":[]}}"#
        )
        .is_err());
    }

    #[test]
    fn test_method_name() {
        let message = Message::Error {
            reason: "x".to_string(),
        };
        assert_eq!(to_json(&message)["methodName"], message.method_name());
    }
}
