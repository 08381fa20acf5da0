//! Connection lifecycle state.
//!
//! Liveness and authentication are tracked separately: the transport may
//! cycle through reconnects while the principal stays the same.

/// Liveness of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the server
    Disconnected,
    /// Attempting to establish connection
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, transport is retrying
    Reconnecting,
    /// Torn down with `disconnect()`; terminal
    Closed,
}

/// Authentication state of the principal on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    /// `authenticate` sent, waiting for the acknowledgment
    Pending,
    Authenticated,
    Rejected,
}

/// Snapshot of the logical session to the push server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub state: ConnectionState,
    pub auth: AuthState,
    pub principal_id: Option<String>,
    pub last_error: Option<String>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            auth: AuthState::Unauthenticated,
            principal_id: None,
            last_error: None,
        }
    }
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A socket is up, or the transport is restoring one after a drop.
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_connected() && self.auth == AuthState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Drop to `Disconnected` unless already closed. Authentication does not
    /// survive the socket.
    pub(crate) fn mark_disconnected(&mut self, error: Option<String>) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Disconnected;
        self.auth = AuthState::Unauthenticated;
        if error.is_some() {
            self.last_error = error;
        }
    }
}
