//! Call-Konfiguration - Session-Deskriptor und ICE-Server
//!
//! `CallConfig` beschreibt genau einen Anrufversuch und wird nach der
//! Erstellung nicht mehr verändert. ICE-Server sind standardmäßig die
//! öffentlichen Google STUN-Server; TURN-Server können vom Deployment
//! über `ice_servers` ergänzt werden.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use webrtc::ice_transport::ice_server::RTCIceServer;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid signaling URL: {0}")]
    InvalidSignalingUrl(String),

    #[error("Unsupported signaling scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
}

// ============================================================================
// CALL TYPE
// ============================================================================

/// Art des Anrufs - bestimmt ob Video-Optimierung aktiviert wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn has_video(self) -> bool {
        matches!(self, CallType::Video)
    }
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Ein konfigurierbarer ICE-Server (STUN oder TURN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub(crate) fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Standard STUN-Server Konfiguration
///
/// Kein TURN: NAT-Traversal-Policy ist Sache des Deployments und wird
/// über `CallConfig::ice_servers` nachgereicht.
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: None,
        credential: None,
    }]
}

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Unveränderlicher Session-Deskriptor für einen Anrufversuch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Basis-URL des Signaling-Servers (ws:// oder wss://)
    pub signaling_url: String,
    /// Raum-ID der Call-Session
    pub room_id: String,
    /// ID des anrufenden Benutzers
    pub user_id: String,
    /// ID des AI-Klons auf der Gegenseite
    pub clone_id: String,
    /// Voice oder Video
    pub call_type: CallType,
    /// Bearer-Token für die Auth-Nachricht nach dem Socket-Open
    pub token: String,
    /// ICE-Server; Default sind die Google STUN-Server
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,
}

impl CallConfig {
    pub fn new(
        signaling_url: impl Into<String>,
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        clone_id: impl Into<String>,
        call_type: CallType,
        token: impl Into<String>,
    ) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            room_id: room_id.into(),
            user_id: user_id.into(),
            clone_id: clone_id.into(),
            call_type,
            token: token.into(),
            ice_servers: default_ice_servers(),
        }
    }

    /// Raum-bezogene Signaling-Endpoint-URL
    ///
    /// `{signaling_url}/api/v1/webrtc/signal/{room_id}`
    pub fn signal_endpoint(&self) -> Result<Url, ConfigError> {
        let base = self
            .signaling_url
            .trim_end_matches('/');

        let url = Url::parse(&format!(
            "{}/api/v1/webrtc/signal/{}",
            base, self.room_id
        ))
        .map_err(|e| ConfigError::InvalidSignalingUrl(e.to_string()))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub(crate) fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(IceServerConfig::to_rtc).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> CallConfig {
        CallConfig::new(url, "room-42", "user-1", "clone-7", CallType::Voice, "tok")
    }

    #[test]
    fn signal_endpoint_is_room_scoped() {
        let url = config("wss://rtc.example.com").signal_endpoint().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://rtc.example.com/api/v1/webrtc/signal/room-42"
        );
    }

    #[test]
    fn signal_endpoint_strips_trailing_slash() {
        let url = config("ws://localhost:8000/").signal_endpoint().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/api/v1/webrtc/signal/room-42");
    }

    #[test]
    fn signal_endpoint_rejects_http() {
        let err = config("https://rtc.example.com").signal_endpoint().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(_)));
    }

    #[test]
    fn default_ice_servers_are_stun_only() {
        for server in default_ice_servers() {
            assert!(server.urls.iter().all(|u| u.starts_with("stun:")));
            assert!(server.username.is_none());
            assert!(server.credential.is_none());
        }
    }

    #[test]
    fn turn_server_keeps_credentials() {
        let turn = IceServerConfig {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("u".to_string()),
            credential: Some("p".to_string()),
        };
        let rtc = turn.to_rtc();
        assert_eq!(rtc.username, "u");
        assert_eq!(rtc.credential, "p");
    }
}
