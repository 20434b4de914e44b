//! Call State - Lebenszyklus der Media-Session
//!
//! Zweite Achse neben dem `ConnectionState` des Signaling-Layers.
//! Übergänge laufen ausschließlich über die explizite Tabelle in
//! `CallState::apply`; illegale Kombinationen liefern `None` und
//! werden vom Aufrufer verworfen.

use serde::Serialize;

/// Status der Peer-Connection/Media-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Media-Erwerb bzw. Verbindungsaufbau läuft
    Connecting,
    /// Anruf aktiv
    Connected,
    /// Anruf beendet (terminal)
    Ended,
    /// Peer-Connection verloren; Aufrufer muss `end_call` rufen
    Failed,
}

/// Events die den Call-Lebenszyklus treiben
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStateEvent {
    /// `initialize_call()` gestartet
    Initiate,
    /// Peer-Connection meldet `connecting`
    PeerConnecting,
    /// Peer-Connection meldet `connected`
    PeerConnected,
    /// Peer-Connection meldet `disconnected` oder `failed`
    PeerLost,
    /// `end_call()` - lokal oder weil die Gegenseite gegangen ist
    HangUp,
}

impl CallState {
    /// Übergangstabelle; `None` heißt: Event in diesem Zustand illegal
    pub fn apply(self, event: CallStateEvent) -> Option<CallState> {
        use CallState::*;
        use CallStateEvent::*;

        match (self, event) {
            (Idle, Initiate) => Some(Connecting),

            (Connecting, PeerConnecting) => Some(Connecting),
            (Connecting, PeerConnected) => Some(Connected),
            (Connecting, PeerLost) => Some(Failed),

            // ICE-Neuverhandlung wirft zurück auf Connecting
            (Connected, PeerConnecting) => Some(Connecting),
            (Connected, PeerLost) => Some(Failed),

            // Auflegen geht aus jedem nicht-terminalen Zustand
            (Idle | Connecting | Connected | Failed, HangUp) => Some(Ended),

            // Ended ist terminal, alles andere illegal
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == CallState::Ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallState::*;
    use CallStateEvent::*;

    #[test]
    fn happy_path_reaches_connected() {
        let state = Idle
            .apply(Initiate)
            .and_then(|s| s.apply(PeerConnecting))
            .and_then(|s| s.apply(PeerConnected));
        assert_eq!(state, Some(Connected));
    }

    #[test]
    fn peer_loss_fails_the_call_without_ending_it() {
        assert_eq!(Connected.apply(PeerLost), Some(Failed));
        // Failed verlangt ein explizites HangUp vom Aufrufer
        assert_eq!(Failed.apply(HangUp), Some(Ended));
    }

    #[test]
    fn ended_is_terminal() {
        for event in [Initiate, PeerConnecting, PeerConnected, PeerLost, HangUp] {
            assert_eq!(Ended.apply(event), None);
        }
        assert!(Ended.is_terminal());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert_eq!(Idle.apply(PeerConnected), None);
        assert_eq!(Failed.apply(PeerConnected), None);
        assert_eq!(Connected.apply(Initiate), None);
    }

    #[test]
    fn renegotiation_drops_back_to_connecting() {
        assert_eq!(Connected.apply(PeerConnecting), Some(Connecting));
    }
}
