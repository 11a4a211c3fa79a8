//! Connection State Tracker
//!
//! Pure state machine recomputing the controller's [`ConnectionState`] from
//! the last-known remote session status and transport status. It performs no
//! I/O; the lifecycle manager feeds it on every property poll and connection
//! event and reads the result.
//!
//! Transitions the table cannot express (issuing a create, the open-to-ready
//! handover, the disconnect sequence) are applied by the manager through
//! [`ConnectionStateTracker::force`]; `update` itself is exactly the table.

use serde::{Deserialize, Serialize};

use crate::service::{SessionStatus, TransportStatus};

/// Derived connection state of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session exists.
    Inactive,
    /// The session ended in a service-side error. A new session is required.
    Error,
    /// The session was stopped.
    Stopped,
    /// The session lease ran out.
    Expired,
    /// A create/open is in flight or the session is still starting.
    OpeningSession,
    /// Session is ready; runtime not connected.
    SessionOpen,
    /// Data-plane connection attempt in flight.
    RuntimeConnecting,
    /// Data-plane connected; frames are streaming.
    RuntimeConnected,
    /// Disconnect sequence in progress; inputs are ignored until it finishes.
    Disconnecting,
}

impl ConnectionState {
    /// Any state except `Inactive`, `Error`, `Stopped`, `Expired`.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            ConnectionState::Inactive
                | ConnectionState::Error
                | ConnectionState::Stopped
                | ConnectionState::Expired
        )
    }

    /// States from which an explicit stop is meaningful.
    pub fn is_stoppable(self) -> bool {
        matches!(
            self,
            ConnectionState::OpeningSession
                | ConnectionState::SessionOpen
                | ConnectionState::RuntimeConnecting
                | ConnectionState::RuntimeConnected
        )
    }

    /// True only while rendering is active.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::RuntimeConnected
    }
}

/// Tracks the current [`ConnectionState`].
#[derive(Clone, Debug)]
pub struct ConnectionStateTracker {
    state: ConnectionState,
}

impl ConnectionStateTracker {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Inactive,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply one `(remote, transport)` observation and return the new state.
    ///
    /// Rules, in precedence order:
    /// 1. `Disconnecting` ignores all inputs.
    /// 2. Remote `Error`/`Expired`/`Stopped` are terminal from any other state.
    /// 3. Remote `Unknown`/`Starting` leave the state unchanged.
    /// 4. Remote `Ready` while in `SessionOpen`/`RuntimeConnecting`/
    ///    `RuntimeConnected` follows the transport status.
    /// 5. Anything else leaves the state unchanged.
    pub fn update(&mut self, remote: SessionStatus, transport: TransportStatus) -> ConnectionState {
        self.state = Self::next(self.state, remote, transport);
        self.state
    }

    /// Apply a manager-owned transition outside the observation table.
    pub(crate) fn force(&mut self, state: ConnectionState) -> ConnectionState {
        self.state = state;
        self.state
    }

    fn next(
        current: ConnectionState,
        remote: SessionStatus,
        transport: TransportStatus,
    ) -> ConnectionState {
        if current == ConnectionState::Disconnecting {
            return current;
        }
        match remote {
            SessionStatus::Error => ConnectionState::Error,
            SessionStatus::Expired => ConnectionState::Expired,
            SessionStatus::Stopped => ConnectionState::Stopped,
            SessionStatus::Unknown | SessionStatus::Starting => current,
            SessionStatus::Ready => match current {
                ConnectionState::SessionOpen
                | ConnectionState::RuntimeConnecting
                | ConnectionState::RuntimeConnected => match transport {
                    TransportStatus::Disconnected => ConnectionState::SessionOpen,
                    TransportStatus::Connecting => ConnectionState::RuntimeConnecting,
                    TransportStatus::Connected => ConnectionState::RuntimeConnected,
                },
                other => other,
            },
        }
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState as S;
    use SessionStatus as R;
    use TransportStatus as T;

    const STATES: [S; 9] = [
        S::Inactive,
        S::Error,
        S::Stopped,
        S::Expired,
        S::OpeningSession,
        S::SessionOpen,
        S::RuntimeConnecting,
        S::RuntimeConnected,
        S::Disconnecting,
    ];
    const REMOTES: [R; 6] = [R::Unknown, R::Starting, R::Ready, R::Stopped, R::Expired, R::Error];
    const TRANSPORTS: [T; 3] = [T::Disconnected, T::Connecting, T::Connected];

    /// Literal transition table, written out independently of the
    /// implementation's rule ordering.
    fn expected(current: S, remote: R, transport: T) -> S {
        match (current, remote, transport) {
            (S::Disconnecting, _, _) => S::Disconnecting,
            (_, R::Error, _) => S::Error,
            (_, R::Expired, _) => S::Expired,
            (_, R::Stopped, _) => S::Stopped,
            (_, R::Unknown | R::Starting, _) => current,
            (S::SessionOpen | S::RuntimeConnecting | S::RuntimeConnected, R::Ready, T::Disconnected) => {
                S::SessionOpen
            }
            (S::SessionOpen | S::RuntimeConnecting | S::RuntimeConnected, R::Ready, T::Connecting) => {
                S::RuntimeConnecting
            }
            (S::SessionOpen | S::RuntimeConnecting | S::RuntimeConnected, R::Ready, T::Connected) => {
                S::RuntimeConnected
            }
            (_, R::Ready, _) => current,
        }
    }

    #[test]
    fn update_matches_table_for_all_triples() {
        for current in STATES {
            for remote in REMOTES {
                for transport in TRANSPORTS {
                    let mut tracker = ConnectionStateTracker::new();
                    tracker.force(current);
                    let got = tracker.update(remote, transport);
                    assert_eq!(
                        got,
                        expected(current, remote, transport),
                        "({current:?}, {remote:?}, {transport:?})"
                    );
                }
            }
        }
    }

    #[test]
    fn update_is_idempotent() {
        for current in STATES {
            for remote in REMOTES {
                for transport in TRANSPORTS {
                    let mut tracker = ConnectionStateTracker::new();
                    tracker.force(current);
                    let once = tracker.update(remote, transport);
                    let twice = tracker.update(remote, transport);
                    assert_eq!(once, twice, "({current:?}, {remote:?}, {transport:?})");
                }
            }
        }
    }

    #[test]
    fn initial_state_is_inactive() {
        assert_eq!(ConnectionStateTracker::new().state(), S::Inactive);
    }

    #[test]
    fn predicates() {
        assert!(S::OpeningSession.is_active());
        assert!(S::Disconnecting.is_active());
        assert!(!S::Inactive.is_active());
        assert!(!S::Stopped.is_active());
        assert!(!S::Expired.is_active());
        assert!(!S::Error.is_active());

        assert!(S::OpeningSession.is_stoppable());
        assert!(S::SessionOpen.is_stoppable());
        assert!(S::RuntimeConnecting.is_stoppable());
        assert!(S::RuntimeConnected.is_stoppable());
        assert!(!S::Disconnecting.is_stoppable());
        assert!(!S::Inactive.is_stoppable());

        assert!(S::RuntimeConnected.is_connected());
        assert!(!S::RuntimeConnecting.is_connected());
    }

    #[test]
    fn disconnecting_ignores_terminal_remote_statuses() {
        let mut tracker = ConnectionStateTracker::new();
        tracker.force(S::Disconnecting);
        assert_eq!(tracker.update(R::Error, T::Disconnected), S::Disconnecting);
        assert_eq!(tracker.update(R::Expired, T::Connected), S::Disconnecting);
        assert_eq!(tracker.update(R::Ready, T::Connected), S::Disconnecting);
    }

    #[test]
    fn opening_session_waits_for_explicit_handover() {
        // The table leaves (OpeningSession, Ready, _) unchanged; the manager
        // performs that edge once a poll reports Ready.
        let mut tracker = ConnectionStateTracker::new();
        tracker.force(S::OpeningSession);
        assert_eq!(tracker.update(R::Ready, T::Disconnected), S::OpeningSession);
        tracker.force(S::SessionOpen);
        assert_eq!(tracker.update(R::Ready, T::Connecting), S::RuntimeConnecting);
    }
}
