//! Message types for the peerlink agent.
//!
//! A packed message is one of three JSON shapes: a plaintext message, a
//! JWS in general JSON serialization, or a JWE in general JSON
//! serialization. [`Envelope::parse`] tells them apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Media type of plaintext messages
pub const DIDCOMM_PLAIN: &str = "application/didcomm-plain+json";
/// Media type of signed messages
pub const DIDCOMM_SIGNED: &str = "application/didcomm-signed+json";
/// Media type of encrypted messages
pub const DIDCOMM_ENCRYPTED: &str = "application/didcomm-encrypted+json";
/// Protocol type of the text messages exchanged by the agent
pub const DEMO_MESSAGE_TYPE: &str = "my-protocol/1.0";

/// A plaintext message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainMessage {
    pub id: String,
    pub typ: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<u64>,
}

impl PlainMessage {
    /// Wraps a text message addressed to a single recipient
    pub fn text(msg: &str, from: Option<&str>, to: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            typ: DIDCOMM_PLAIN.to_string(),
            type_: DEMO_MESSAGE_TYPE.to_string(),
            body: serde_json::json!({ "msg": msg }),
            from: from.map(str::to_string),
            to: vec![to.to_string()],
            created_time: Some(chrono::Utc::now().timestamp().max(0) as u64),
        }
    }

    /// The text carried in the body, if the body has one
    pub fn text_body(&self) -> Option<&str> {
        self.body.get("msg").and_then(Value::as_str)
    }
}

/// A JWE in general JSON serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwe {
    pub protected: String,
    pub recipients: Vec<JweRecipient>,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Per-recipient wrapped content key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweRecipient {
    pub header: JweHeader,
    pub encrypted_key: String,
}

/// Per-recipient unprotected header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweHeader {
    pub kid: String,
}

/// Ephemeral public key of an ECDH key agreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralPublicKey {
    pub kty: String,
    pub crv: String,
    pub x: String,
}

/// The protected header shared by all recipients of a JWE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JweProtected {
    pub typ: String,
    pub alg: String,
    pub enc: String,
    pub epk: EphemeralPublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    pub apv: String,
}

/// A JWS in general JSON serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jws {
    pub payload: String,
    pub signatures: Vec<JwsSignature>,
}

/// One signature of a JWS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsSignature {
    pub protected: String,
    pub signature: String,
    pub header: JwsHeader,
}

/// Unprotected signature header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub kid: String,
}

/// Protected signature header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsProtected {
    pub typ: String,
    pub alg: String,
}

/// The outermost layer of a packed message
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Encrypted(Jwe),
    Signed(Jws),
    Plain(PlainMessage),
}

impl Envelope {
    /// Parses a packed message, recognizing it by its top-level members
    pub fn parse(packed: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(packed)
            .map_err(|e| Error::InvalidEnvelope(format!("Message is not JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Same as [`Envelope::parse`], for an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidEnvelope("Message is not a JSON object".to_string()))?;

        if obj.contains_key("ciphertext") {
            serde_json::from_value(value)
                .map(Envelope::Encrypted)
                .map_err(|e| Error::InvalidEnvelope(format!("Malformed JWE: {}", e)))
        } else if obj.contains_key("signatures") {
            serde_json::from_value(value)
                .map(Envelope::Signed)
                .map_err(|e| Error::InvalidEnvelope(format!("Malformed JWS: {}", e)))
        } else if obj.contains_key("id") && obj.contains_key("body") {
            serde_json::from_value(value)
                .map(Envelope::Plain)
                .map_err(|e| Error::InvalidEnvelope(format!("Malformed plaintext message: {}", e)))
        } else {
            Err(Error::InvalidEnvelope(
                "Unrecognized message structure".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_text_message_shape() {
        let msg = PlainMessage::text("hello", Some("did:peer:0zA"), "did:peer:0zB");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["typ"], DIDCOMM_PLAIN);
        assert_eq!(json["type"], DEMO_MESSAGE_TYPE);
        assert_eq!(json["body"]["msg"], "hello");
        assert_eq!(json["to"][0], "did:peer:0zB");
        assert_eq!(msg.text_body(), Some("hello"));

        let anonymous = PlainMessage::text("hello", None, "did:peer:0zB");
        let json = serde_json::to_value(&anonymous).unwrap();
        assert!(json.get("from").is_none());
    }

    #[test]
    fn test_envelope_detection() {
        let plain = serde_json::to_string(&PlainMessage::text("hi", None, "did:peer:0zB")).unwrap();
        assert_matches!(Envelope::parse(&plain), Ok(Envelope::Plain(_)));

        let jws = concat!(
            r#"{"payload":"e30","#,
            r#""signatures":[{"protected":"e30","signature":"AA","header":{"kid":"k"}}]}"#
        );
        assert_matches!(Envelope::parse(jws), Ok(Envelope::Signed(_)));

        let jwe = r#"{"protected":"e30","recipients":[],"iv":"","ciphertext":"","tag":""}"#;
        assert_matches!(Envelope::parse(jwe), Ok(Envelope::Encrypted(_)));

        assert_matches!(Envelope::parse("[1,2]"), Err(Error::InvalidEnvelope(_)));
        assert_matches!(Envelope::parse("not json"), Err(Error::InvalidEnvelope(_)));
        assert_matches!(
            Envelope::parse(r#"{"ciphertext":"x"}"#),
            Err(Error::InvalidEnvelope(_))
        );
    }
}
