//! Room session state machine.
//!
//! A [`Session`] is owned by exactly one channel worker. It gates outbound sends on
//! the connection phase and holds the identities the server handed out.

use std::fmt;

use thiserror::Error;

use crate::types::RoomIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    New,
    Connected,
    Closed,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::New => "new",
            Phase::Connected => "connected",
            Phase::Closed => "closed",
            Phase::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session; connect first")]
    NotStarted,
    #[error("session is {0}, not connected")]
    NotConnected(Phase),
    #[error("session already {0}")]
    Finished(Phase),
    #[error("channel already joined room {0}")]
    AlreadyStarted(String),
    #[error("no remote peer associated yet")]
    NoPeer,
    #[error("no auth token assigned yet")]
    NoToken,
    #[error("answers are never sent in loopback mode")]
    LoopbackAnswer,
    #[error("identity already assigned")]
    IdentityAssigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalIdentity {
    client_id: String,
    token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    room_id: String,
    identity: Option<LocalIdentity>,
    peer: Option<String>,
    phase: Phase,
    initiator: bool,
    loopback: bool,
}

impl Session {
    pub fn new(room_id: impl Into<String>, loopback: bool) -> Self {
        Self {
            room_id: room_id.into(),
            identity: None,
            peer: None,
            phase: Phase::New,
            initiator: false,
            loopback,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.client_id.as_str())
    }

    pub fn token(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|id| id.token.as_deref())
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn loopback(&self) -> bool {
        self.loopback
    }

    /// Records the server-assigned identity and moves `New -> Connected`.
    ///
    /// The identity and the initiator role are written once; a second call fails and
    /// leaves the session untouched.
    pub fn resolve(
        &mut self,
        client_id: impl Into<String>,
        token: Option<String>,
        initiator: bool,
    ) -> Result<RoomIdentity, SessionError> {
        if self.identity.is_some() {
            return Err(SessionError::IdentityAssigned);
        }
        if self.phase != Phase::New {
            return Err(SessionError::Finished(self.phase));
        }
        let identity = LocalIdentity {
            client_id: client_id.into(),
            token,
        };
        let room = RoomIdentity {
            room_id: self.room_id.clone(),
            client_id: identity.client_id.clone(),
            token: identity.token.clone(),
            initiator,
        };
        self.identity = Some(identity);
        self.initiator = initiator;
        self.phase = Phase::Connected;
        Ok(room)
    }

    /// Replaces the room id derived from the room URL with the one the server assigned.
    /// Only valid before the identity is resolved.
    pub fn adopt_room_id(&mut self, room_id: impl Into<String>) -> Result<(), SessionError> {
        if self.identity.is_some() {
            return Err(SessionError::IdentityAssigned);
        }
        if self.phase != Phase::New {
            return Err(SessionError::Finished(self.phase));
        }
        self.room_id = room_id.into();
        Ok(())
    }

    /// Associates the remote peer named by an inbound offer or join. Returns the
    /// previously associated peer when it was replaced.
    pub fn associate_peer(&mut self, peer: &str) -> Option<String> {
        if self.peer.as_deref() == Some(peer) {
            return None;
        }
        self.peer.replace(peer.to_string())
    }

    /// Clears the association if `peer` is the one currently associated.
    pub fn peer_left(&mut self, peer: &str) -> bool {
        if self.peer.as_deref() == Some(peer) {
            self.peer = None;
            true
        } else {
            false
        }
    }

    pub fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Connected => Ok(()),
            other => Err(SessionError::NotConnected(other)),
        }
    }

    /// Peer and token an addressed envelope must carry.
    pub fn addressing(&self) -> Result<(&str, &str), SessionError> {
        self.ensure_connected()?;
        let peer = self.peer().ok_or(SessionError::NoPeer)?;
        let token = self.token().ok_or(SessionError::NoToken)?;
        Ok((peer, token))
    }

    /// Moves to `Closed`. Returns whether the session was connected, i.e. whether a
    /// bye is owed to the server. `Error` stays `Error`.
    pub fn close(&mut self) -> bool {
        let was_connected = self.phase == Phase::Connected;
        if !self.phase.is_terminal() {
            self.phase = Phase::Closed;
        }
        was_connected
    }

    /// Moves to `Error`. Returns `false` when the session was already terminal, in
    /// which case the failure must not be reported again.
    pub fn fail(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Error;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn connected() -> Session {
        let mut session = Session::new("room1", false);
        session
            .resolve("u1", Some("t1".into()), false)
            .expect("resolve");
        session
    }

    #[test]
    fn resolve_connects_once() {
        let mut session = Session::new("room1", false);
        let identity = session
            .resolve("u1", Some("t1".into()), true)
            .expect("first resolve");
        assert_eq!(identity.client_id, "u1");
        assert_eq!(identity.token.as_deref(), Some("t1"));
        assert_eq!(session.phase(), Phase::Connected);
        assert!(session.is_initiator());

        let err = session.resolve("u2", Some("t2".into()), false).unwrap_err();
        assert_eq!(err, SessionError::IdentityAssigned);
        assert_eq!(session.client_id(), Some("u1"));
        assert_eq!(session.token(), Some("t1"));
        assert!(session.is_initiator());
    }

    #[test]
    fn resolve_after_close_is_rejected() {
        let mut session = Session::new("room1", false);
        assert!(!session.close());
        assert_eq!(
            session.resolve("u1", None, false).unwrap_err(),
            SessionError::Finished(Phase::Closed)
        );
    }

    #[test]
    fn room_id_is_fixed_once_resolved() {
        let mut session = Session::new("join", false);
        session.adopt_room_id("room1").unwrap();
        let identity = session.resolve("c1", None, true).unwrap();
        assert_eq!(identity.room_id, "room1");
        assert_eq!(
            session.adopt_room_id("room2").unwrap_err(),
            SessionError::IdentityAssigned
        );
        assert_eq!(session.room_id(), "room1");
    }

    #[test]
    fn addressing_requires_peer_and_token() {
        let mut session = Session::new("room1", false);
        assert_eq!(
            session.addressing().unwrap_err(),
            SessionError::NotConnected(Phase::New)
        );
        session.resolve("u1", None, false).unwrap();
        assert_eq!(session.addressing().unwrap_err(), SessionError::NoPeer);
        session.associate_peer("p1");
        assert_eq!(session.addressing().unwrap_err(), SessionError::NoToken);

        let mut session = connected();
        session.associate_peer("p1");
        assert_eq!(session.addressing().unwrap(), ("p1", "t1"));
    }

    #[test]
    fn close_reports_bye_once() {
        let mut session = connected();
        assert!(session.close());
        assert_eq!(session.phase(), Phase::Closed);
        assert!(!session.close());
    }

    #[test]
    fn fail_guards_duplicate_transitions() {
        let mut session = connected();
        assert!(session.fail());
        assert!(!session.fail());
        assert_eq!(session.phase(), Phase::Error);
        assert!(!session.close());
        assert_eq!(session.phase(), Phase::Error);
    }

    #[test]
    fn fail_after_close_is_silent() {
        let mut session = connected();
        session.close();
        assert!(!session.fail());
        assert_eq!(session.phase(), Phase::Closed);
    }

    #[derive(Debug, Clone)]
    enum PeerEvent {
        Offer(String),
        Joined(String),
        Left(String),
        Candidate(String),
    }

    fn peer_event() -> impl Strategy<Value = PeerEvent> {
        let peer = prop::sample::select(vec!["p1", "p2", "p3"]).prop_map(String::from);
        prop_oneof![
            peer.clone().prop_map(PeerEvent::Offer),
            peer.clone().prop_map(PeerEvent::Joined),
            peer.clone().prop_map(PeerEvent::Left),
            peer.prop_map(PeerEvent::Candidate),
        ]
    }

    proptest! {
        #[test]
        fn peer_tracks_offers_joins_and_leaves(events in prop::collection::vec(peer_event(), 0..40)) {
            let mut session = connected();
            let mut expected: Option<String> = None;
            let mut seen_association = false;
            for event in events {
                match event {
                    PeerEvent::Offer(peer) | PeerEvent::Joined(peer) => {
                        session.associate_peer(&peer);
                        expected = Some(peer);
                        seen_association = true;
                    }
                    PeerEvent::Left(peer) => {
                        let cleared = session.peer_left(&peer);
                        prop_assert_eq!(cleared, expected.as_deref() == Some(peer.as_str()));
                        if cleared {
                            expected = None;
                        }
                    }
                    PeerEvent::Candidate(_) => {}
                }
                prop_assert_eq!(session.peer(), expected.as_deref());
                if !seen_association {
                    prop_assert!(session.peer().is_none());
                }
            }
        }
    }
}
