//! Connection state for a device type.
//!
//! One explicit state per device type replaces independent pairing and
//! connection flags, so "connecting" and "connected" can never both hold.

/// Pairing and connection lifecycle of one device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Scanning for a device of this type to pair with.
    Pairing,
    /// An identity was captured and persisted.
    Paired,
    /// A connection has been requested.
    Connecting,
    /// The transport reported the connection established.
    Connected,
    /// The transport reported the connection attempt failed.
    ConnectionFailed,
    /// The connection was lost or closed.
    Disconnected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Pairing | Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Unpaired"),
            Self::Pairing => write!(f, "Pairing"),
            Self::Paired => write!(f, "Paired"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ConnectionFailed => write!(f, "Connection Failure"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Pairing.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
        assert!(!ConnectionState::ConnectionFailed.is_transitioning());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Idle), "Unpaired");
        assert_eq!(
            format!("{}", ConnectionState::ConnectionFailed),
            "Connection Failure"
        );
    }
}
