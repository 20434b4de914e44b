//! Message Types für das Signaling-Protokoll
//!
//! JSON-Nachrichten mit `type`-Diskriminante, wie sie der
//! Signaling-Endpoint unter `/api/v1/webrtc/signal/{roomId}` erwartet.
//! Ausgehende Nachrichten werden in einen Envelope mit Timestamp
//! verpackt.

use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Envelope für alle Client-Nachrichten
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    #[serde(flatten)]
    pub payload: T,
    pub timestamp: i64,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Authentifizierung direkt nach dem Socket-Open
#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub token: String,
}

impl AuthPayload {
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            msg_type: "auth",
            user_id,
            token,
        }
    }
}

/// SDP Offer senden
#[derive(Debug, Clone, Serialize)]
pub struct OfferPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub sdp: String,
}

impl OfferPayload {
    pub fn new(sdp: String) -> Self {
        Self {
            msg_type: "offer",
            sdp,
        }
    }
}

/// SDP Answer senden
#[derive(Debug, Clone, Serialize)]
pub struct AnswerPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub sdp: String,
}

impl AnswerPayload {
    pub fn new(sdp: String) -> Self {
        Self {
            msg_type: "answer",
            sdp,
        }
    }
}

/// ICE Candidate senden (Candidate als JSON-String)
#[derive(Debug, Clone, Serialize)]
pub struct IceCandidatePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub candidate: String,
}

impl IceCandidatePayload {
    pub fn new(candidate: String) -> Self {
        Self {
            msg_type: "ice-candidate",
            candidate,
        }
    }
}

/// Heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct PingPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl PingPayload {
    pub fn new() -> Self {
        Self { msg_type: "ping" }
    }
}

impl Default for PingPayload {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Auth akzeptiert - erst jetzt darf die Peer Connection aufgebaut werden
    Connected,

    /// Eingehendes SDP Offer
    Offer { sdp: String },

    /// Eingehendes SDP Answer
    Answer { sdp: String },

    /// Eingehender ICE Candidate
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: String },

    /// Gegenseite hat den Raum verlassen - normales Call-Ende
    UserLeft { reason: Option<String> },

    /// Fataler Fehler vom Server
    Error { message: String },

    /// Heartbeat-Antwort
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_envelope_carries_type_and_timestamp() {
        let json = Envelope::new(AuthPayload::new("user-1".into(), "tok".into()))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["token"], "tok");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn ice_candidate_uses_hyphenated_type() {
        let json = Envelope::new(IceCandidatePayload::new("cand".into()))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "ice-candidate");
    }

    #[test]
    fn server_messages_parse_by_type() {
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"connected"}"#).unwrap(),
            ServerMessage::Connected
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"offer","sdp":"v=0"}"#).unwrap(),
            ServerMessage::Offer { .. }
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"ice-candidate","candidate":"c"}"#)
                .unwrap(),
            ServerMessage::IceCandidate { .. }
        ));
        assert!(matches!(
            serde_json::from_str::<ServerMessage>(r#"{"type":"pong"}"#).unwrap(),
            ServerMessage::Pong
        ));
    }

    #[test]
    fn user_left_reason_is_optional() {
        let with_reason: ServerMessage =
            serde_json::from_str(r#"{"type":"user_left","reason":"timeout"}"#).unwrap();
        let without: ServerMessage = serde_json::from_str(r#"{"type":"user_left"}"#).unwrap();
        assert!(matches!(with_reason, ServerMessage::UserLeft { reason: Some(_) }));
        assert!(matches!(without, ServerMessage::UserLeft { reason: None }));
    }
}
