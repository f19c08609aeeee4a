use crate::{error::SyncError, types::ConnectionState};

/// Inputs that drive the push-channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// Start dialing the socket.
    Dial,
    /// Socket opened; handshake about to be sent.
    SocketOpened,
    /// Server accepted the handshake.
    HandshakeAccepted,
    /// Dial failed, handshake failed or an open connection dropped.
    ConnectionLost,
    /// Reconnect policy has no attempts left.
    RetriesExhausted,
    /// Sign-out / shutdown.
    Teardown,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Outbound intents are only accepted once the handshake has completed.
    pub fn accepts_intents(&self) -> bool {
        accepts_intents(self.state)
    }

    pub fn apply(&mut self, signal: ConnectionSignal) -> Result<ConnectionState, SyncError> {
        use ConnectionState::*;

        match signal {
            ConnectionSignal::Dial => {
                self.transition_from_any_of(&[Idle, Reconnecting], Connecting, "dial")
            }
            ConnectionSignal::SocketOpened => {
                self.transition_from_state(Connecting, Authenticating, "socket_opened")
            }
            ConnectionSignal::HandshakeAccepted => {
                self.transition_from_state(Authenticating, Connected, "handshake_accepted")
            }
            ConnectionSignal::ConnectionLost => self.transition_from_any_of(
                &[Connecting, Authenticating, Connected],
                Reconnecting,
                "connection_lost",
            ),
            ConnectionSignal::RetriesExhausted => {
                self.transition_from_state(Reconnecting, Failed, "retries_exhausted")
            }
            ConnectionSignal::Teardown => {
                if self.state == Closed {
                    return Err(SyncError::invalid_state(self.state, "teardown"));
                }
                self.state = Closed;
                Ok(Closed)
            }
        }
    }

    fn transition_from_state(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        action: &str,
    ) -> Result<ConnectionState, SyncError> {
        if self.state != expected {
            return Err(SyncError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        action: &str,
    ) -> Result<ConnectionState, SyncError> {
        if !expected.contains(&self.state) {
            return Err(SyncError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}

/// Whether intents may be emitted while the connection is in `state`.
pub fn accepts_intents(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_connect_drop_reconnect_cycle() {
        let mut sm = ConnectionStateMachine::default();

        sm.apply(ConnectionSignal::Dial).expect("dial must work");
        assert_eq!(sm.state(), ConnectionState::Connecting);

        sm.apply(ConnectionSignal::SocketOpened)
            .expect("socket open must work");
        assert_eq!(sm.state(), ConnectionState::Authenticating);
        assert!(!sm.accepts_intents());

        sm.apply(ConnectionSignal::HandshakeAccepted)
            .expect("handshake must work");
        assert!(sm.accepts_intents());

        sm.apply(ConnectionSignal::ConnectionLost)
            .expect("drop must work");
        assert_eq!(sm.state(), ConnectionState::Reconnecting);
        assert!(!sm.accepts_intents());

        sm.apply(ConnectionSignal::Dial).expect("redial must work");
        assert_eq!(sm.state(), ConnectionState::Connecting);
    }

    #[test]
    fn rejects_handshake_without_open_socket() {
        let mut sm = ConnectionStateMachine::default();
        sm.apply(ConnectionSignal::Dial).expect("dial must work");

        let err = sm
            .apply(ConnectionSignal::HandshakeAccepted)
            .expect_err("handshake must fail before socket is open");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(sm.state(), ConnectionState::Connecting);
    }

    #[test]
    fn exhausted_retries_fail_and_teardown_closes() {
        let mut sm = ConnectionStateMachine::default();
        sm.apply(ConnectionSignal::Dial).expect("dial");
        sm.apply(ConnectionSignal::ConnectionLost).expect("lost");
        sm.apply(ConnectionSignal::RetriesExhausted)
            .expect("exhausted");
        assert_eq!(sm.state(), ConnectionState::Failed);

        sm.apply(ConnectionSignal::Teardown).expect("teardown");
        assert_eq!(sm.state(), ConnectionState::Closed);

        let err = sm
            .apply(ConnectionSignal::Dial)
            .expect_err("closed transport must not redial");
        assert_eq!(err.code, "invalid_state_transition");
    }
}
