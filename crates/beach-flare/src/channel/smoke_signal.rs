use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::worker::{append_segments, Command, Core, Notification, PostKind, Protocol, WorkerHandle};
use super::SignalingChannel;
use crate::config::ChannelConfig;
use crate::error::{Operation, SignalingError, SignalingResult};
use crate::session::{Session, SessionError};
use crate::sink::SignalingEvents;
use crate::transport::{EventSourcePush, HttpTransport, PushTransport, ReqwestHttp};
use crate::types::{IceCandidate, SdpType, SessionDescription};
use crate::wire::smoke_signal::{
    answer_envelope, candidate_envelope, offer_body, InboundEvent, EVENT_OFFER, EVENT_UID,
};

/// Channel for rooms that stream named events (`uid`, `offer`, `icecandidate`, ...)
/// and accept peer/token addressed posts on the room URL itself.
///
/// Loopback sessions are initiators: their offer is posted and immediately answered
/// locally with the same SDP, and local candidates are echoed back without a post.
pub struct SmokeSignalChannel {
    worker: WorkerHandle,
}

impl SmokeSignalChannel {
    /// Builds a channel on the reqwest-backed transports. Must be called from within a
    /// tokio runtime.
    pub fn new(events: Arc<dyn SignalingEvents>, config: ChannelConfig) -> SignalingResult<Self> {
        let http = ReqwestHttp::new(&config)
            .map_err(|err| SignalingError::transport("http client setup failed", err))?;
        let push = EventSourcePush::new(&config);
        Ok(Self::with_transports(
            events,
            Arc::new(http),
            Arc::new(push),
            config,
        ))
    }

    pub fn with_transports(
        events: Arc<dyn SignalingEvents>,
        http: Arc<dyn HttpTransport>,
        push: Arc<dyn PushTransport>,
        config: ChannelConfig,
    ) -> Self {
        let protocol = SmokeSignal {
            room_url: None,
            success_token: config.success_token.trim().to_string(),
        };
        Self {
            worker: WorkerHandle::spawn(protocol, events, http, push, config),
        }
    }

    /// Session snapshot once every previously issued operation has been handled.
    pub async fn session(&self) -> Option<Session> {
        self.worker.session().await
    }

    /// Disconnects and waits for the worker to finish, including the bye post.
    pub async fn close(self) {
        self.worker.close().await;
    }
}

impl SignalingChannel for SmokeSignalChannel {
    fn connect(&self, room_url: &str, loopback: bool) {
        self.worker.enqueue(Command::Connect {
            room_url: room_url.to_string(),
            loopback,
        });
    }

    fn disconnect(&self) {
        self.worker.enqueue(Command::Disconnect);
    }

    fn send_offer(&self, description: SessionDescription) {
        self.worker.enqueue(Command::SendOffer(description));
    }

    fn send_answer(&self, description: SessionDescription) {
        self.worker.enqueue(Command::SendAnswer(description));
    }

    fn send_local_candidate(&self, candidate: IceCandidate) {
        self.worker.enqueue(Command::SendCandidate(candidate));
    }
}

struct SmokeSignal {
    room_url: Option<Url>,
    success_token: String,
}

impl SmokeSignal {
    fn post_to_room(&self, core: &mut Core, kind: PostKind, body: String) {
        match &self.room_url {
            Some(url) => core.post(kind, url.clone(), body),
            None => warn!(target = "signaling", kind = kind.as_str(), "no room url; dropping post"),
        }
    }
}

impl Protocol for SmokeSignal {
    const NAME: &'static str = "smoke-signal";

    fn start(&mut self, core: &mut Core, room_url: Url) {
        core.subscribe(&room_url);
        self.room_url = Some(room_url);
    }

    fn send_offer(&mut self, core: &mut Core, description: SessionDescription) {
        let Some(session) = core.connected_for(Operation::SendOffer) else {
            return;
        };
        let loopback = session.loopback();
        self.post_to_room(core, PostKind::Offer, offer_body(&description));
        if loopback {
            core.notify(Notification::Description(description.to_answer()));
        }
    }

    fn send_answer(&mut self, core: &mut Core, description: SessionDescription) {
        let envelope = core.session().and_then(|session| {
            if session.loopback() {
                return Err(SessionError::LoopbackAnswer);
            }
            let (peer, token) = session.addressing()?;
            Ok(answer_envelope(peer, token, &description))
        });
        match envelope {
            Ok(body) => self.post_to_room(core, PostKind::Answer, body),
            Err(err) => core.report(SignalingError::misuse(Operation::SendAnswer, err)),
        }
    }

    fn send_candidate(&mut self, core: &mut Core, candidate: IceCandidate) {
        let envelope = core.session().and_then(|session| {
            session.ensure_connected()?;
            if session.loopback() {
                return Ok(None);
            }
            let (peer, token) = session.addressing()?;
            Ok(Some(candidate_envelope(peer, token, &candidate)))
        });
        match envelope {
            Ok(Some(body)) => self.post_to_room(core, PostKind::Candidate, body),
            Ok(None) => core.notify(Notification::Candidate(candidate)),
            Err(err) => core.report(SignalingError::misuse(Operation::SendCandidate, err)),
        }
    }

    fn on_push_message(&mut self, core: &mut Core, event: &str, data: &str) {
        let inbound = match InboundEvent::parse(event, data) {
            Ok(inbound) => inbound,
            Err(err) => {
                core.report(SignalingError::malformed(event, err));
                return;
            }
        };
        let routed = match core.session_mut() {
            Ok(session) => route(session, inbound),
            Err(err) => {
                debug!(target = "signaling", event, error = %err, "push event without session");
                return;
            }
        };
        match routed {
            Ok(Some(notification)) => core.notify(notification),
            Ok(None) => {}
            Err(err) => core.report(err),
        }
    }

    fn accepts(&self, _kind: PostKind, body: &str) -> bool {
        body.trim() == self.success_token
    }

    fn bye_url(&self, session: &Session) -> Option<Url> {
        let uid = session.client_id()?;
        append_segments(self.room_url.as_ref()?, &["bye", uid])
    }
}

/// Applies one inbound event to the session and returns the sink notification it owes.
fn route(session: &mut Session, inbound: InboundEvent) -> Result<Option<Notification>, SignalingError> {
    match inbound {
        InboundEvent::UidAssigned { uid, token } => {
            // Loopback sessions always start the negotiation.
            let initiator = session.loopback();
            session
                .resolve(uid, Some(token), initiator)
                .map(|room| Some(Notification::Connected(room)))
                .map_err(|err| SignalingError::unexpected(EVENT_UID, err.to_string()))
        }
        InboundEvent::Offer { peer, offer } => {
            if offer.sdp_type != SdpType::Offer {
                return Err(SignalingError::unexpected(
                    EVENT_OFFER,
                    format!("description typed {}", offer.sdp_type),
                ));
            }
            if let Some(previous) = session.associate_peer(&peer) {
                info!(target = "signaling", previous = %previous, peer = %peer, "remote peer replaced");
            }
            Ok(Some(Notification::Description(offer)))
        }
        InboundEvent::Answer => {
            debug!(target = "signaling", "answer acknowledged");
            Ok(None)
        }
        InboundEvent::IceCandidate { peer, candidate } => {
            if session.peer() != Some(peer.as_str()) {
                warn!(
                    target = "signaling",
                    from = %peer,
                    associated = ?session.peer(),
                    "candidate from unassociated peer"
                );
            }
            Ok(Some(Notification::Candidate(candidate)))
        }
        InboundEvent::PeerLeft { peer } => {
            if session.peer_left(&peer) {
                info!(target = "signaling", peer = %peer, "remote peer left");
            } else {
                debug!(target = "signaling", peer = %peer, "unassociated peer left");
            }
            Ok(None)
        }
        InboundEvent::PeerJoined { peer } => {
            match peer {
                Some(peer) => {
                    session.associate_peer(&peer);
                    info!(target = "signaling", peer = %peer, "remote peer joined");
                }
                None => info!(target = "signaling", "remote peer joined"),
            }
            Ok(None)
        }
        InboundEvent::Unknown(event) => {
            debug!(target = "signaling", event = %event, "ignoring unknown event");
            Ok(None)
        }
    }
}
