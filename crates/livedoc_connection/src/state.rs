//! Connection status.

use std::fmt;

/// The state of the shared transport channel.
///
/// Transitions are driven entirely by the transport; the document layer only
/// observes. `Ready` is the wire-level "ok".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel to the server.
    Disconnected,
    /// Socket is being established.
    Connecting,
    /// Socket is up, authentication in progress.
    Handshaking,
    /// Authenticated and ready to open documents.
    Ready,
}

impl ConnectionState {
    /// Returns true if documents may be opened.
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Returns true if the channel is coming up but not yet usable.
    pub fn is_establishing(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Handshaking
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ok",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Ready.is_ready());
        assert!(!ConnectionState::Connecting.is_ready());
        assert!(ConnectionState::Connecting.is_establishing());
        assert!(ConnectionState::Handshaking.is_establishing());
        assert!(!ConnectionState::Disconnected.is_establishing());
        assert!(!ConnectionState::Ready.is_establishing());
    }

    #[test]
    fn wire_labels() {
        assert_eq!(ConnectionState::Ready.to_string(), "ok");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
