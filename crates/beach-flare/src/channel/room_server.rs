use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::worker::{append_segments, Command, Core, Notification, PostKind, Protocol, WorkerHandle};
use super::SignalingChannel;
use crate::config::ChannelConfig;
use crate::error::{Operation, SignalingError, SignalingResult, TransportError};
use crate::session::{Session, SessionError};
use crate::sink::SignalingEvents;
use crate::transport::{EventSourcePush, HttpTransport, PushTransport, ReqwestHttp};
use crate::types::{IceCandidate, SessionDescription};
use crate::wire::room_server::{
    is_success, parse_join_response, parse_push, RoomEvent, RoomMessage, RoomParameters,
};

/// Channel for rooms that hand out parameters on join (`POST <room url>`) and take
/// messages on per-client URLs under the directory that holds the join URL.
///
/// The server decides the role. Receivers get the offer and candidates already waiting
/// in the room right after the connected notification. A loopback join must find the
/// room empty.
pub struct RoomServerChannel {
    worker: WorkerHandle,
}

impl RoomServerChannel {
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
        let protocol = RoomServer {
            base: None,
            endpoints: None,
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

impl SignalingChannel for RoomServerChannel {
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

#[derive(Debug, Clone)]
struct Endpoints {
    message: Url,
    bye: Url,
    events: Url,
}

impl Endpoints {
    fn derive(base: &Url, params: &RoomParameters) -> Result<Self, SignalingError> {
        let per_client = |kind: &str| {
            let segments = [kind, params.room_id.as_str(), params.client_id.as_str()];
            append_segments(base, &segments).ok_or_else(|| {
                SignalingError::RoomJoin(format!("cannot derive {kind} url from {base}"))
            })
        };
        let events = match &params.event_url {
            Some(raw) => base
                .join(raw)
                .map_err(|err| SignalingError::RoomJoin(format!("invalid event url {raw}: {err}")))?,
            None => per_client("events")?,
        };
        Ok(Self {
            message: per_client("message")?,
            bye: per_client("bye")?,
            events,
        })
    }
}

/// Directory the per-client URLs hang off: the join URL without its trailing
/// `join/<room>` (or, failing that, its last segment). Always ends in `/`.
fn room_base(join_url: &Url) -> Url {
    let mut segments: Vec<&str> = join_url
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default();
    let strip = match segments.as_slice() {
        [.., "join", _] => 2,
        [] => 0,
        _ => 1,
    };
    segments.truncate(segments.len() - strip);

    let mut base = join_url.clone();
    if segments.is_empty() {
        base.set_path("/");
    } else {
        base.set_path(&format!("/{}/", segments.join("/")));
    }
    base.set_query(None);
    base.set_fragment(None);
    base
}

struct RoomServer {
    base: Option<Url>,
    endpoints: Option<Endpoints>,
}

impl RoomServer {
    fn post_message(&self, core: &mut Core, kind: PostKind, message: RoomMessage) {
        match &self.endpoints {
            Some(endpoints) => core.post(kind, endpoints.message.clone(), message.encode()),
            None => warn!(target = "signaling", kind = kind.as_str(), "no message url; dropping post"),
        }
    }

    fn join(&mut self, core: &mut Core, body: &str) -> Result<(), SignalingError> {
        let params = parse_join_response(body)?;
        let loopback = core
            .session()
            .map_err(|err| SignalingError::RoomJoin(err.to_string()))?
            .loopback();
        if loopback && (!params.initiator || params.offer.is_some()) {
            return Err(SignalingError::LoopbackBusy);
        }
        if !params.initiator && params.offer.is_none() {
            warn!(target = "signaling", room = %params.room_id, "joined as receiver but no offer is waiting");
        }
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| SignalingError::RoomJoin("join response before join request".into()))?;
        let endpoints = Endpoints::derive(base, &params)?;

        let session = core
            .session_mut()
            .map_err(|err| SignalingError::RoomJoin(err.to_string()))?;
        let room = session
            .adopt_room_id(params.room_id.clone())
            .and_then(|_| session.resolve(params.client_id.clone(), None, params.initiator))
            .map_err(|err| SignalingError::unexpected("join", err.to_string()))?;
        debug!(
            target = "signaling",
            message = %endpoints.message,
            events = %endpoints.events,
            pending_candidates = params.candidates.len(),
            "room parameters resolved"
        );

        core.notify(Notification::Connected(room));
        core.subscribe(&endpoints.events);
        self.endpoints = Some(endpoints);
        if let Some(offer) = params.offer {
            core.notify(Notification::Description(offer));
        }
        for candidate in params.candidates {
            core.notify(Notification::Candidate(candidate));
        }
        Ok(())
    }
}

impl Protocol for RoomServer {
    const NAME: &'static str = "room-server";

    fn start(&mut self, core: &mut Core, room_url: Url) {
        self.base = Some(room_base(&room_url));
        core.request_join(room_url);
    }

    fn on_join_response(&mut self, core: &mut Core, result: Result<String, TransportError>) {
        let outcome = match result {
            Ok(body) => self.join(core, &body),
            Err(err) => Err(SignalingError::transport("room join request failed", err)),
        };
        if let Err(err) = outcome {
            core.report(err);
        }
    }

    fn send_offer(&mut self, core: &mut Core, description: SessionDescription) {
        let Some(session) = core.connected_for(Operation::SendOffer) else {
            return;
        };
        let loopback = session.loopback();
        self.post_message(core, PostKind::Offer, RoomMessage::offer(&description));
        if loopback {
            core.notify(Notification::Description(description.to_answer()));
        }
    }

    fn send_answer(&mut self, core: &mut Core, description: SessionDescription) {
        let checked = core.session().and_then(|session| {
            if session.loopback() {
                return Err(SessionError::LoopbackAnswer);
            }
            session.ensure_connected()
        });
        match checked {
            Ok(()) => self.post_message(core, PostKind::Answer, RoomMessage::answer(&description)),
            Err(err) => core.report(SignalingError::misuse(Operation::SendAnswer, err)),
        }
    }

    fn send_candidate(&mut self, core: &mut Core, candidate: IceCandidate) {
        let Some(session) = core.connected_for(Operation::SendCandidate) else {
            return;
        };
        let loopback = session.loopback();
        self.post_message(core, PostKind::Candidate, RoomMessage::candidate(&candidate));
        if loopback {
            core.notify(Notification::Candidate(candidate));
        }
    }

    fn on_push_message(&mut self, core: &mut Core, event: &str, data: &str) {
        let message = match parse_push(data) {
            Ok(RoomEvent::Message(message)) => message,
            Ok(RoomEvent::ServerError(error)) => {
                core.report(SignalingError::RoomServer(error));
                return;
            }
            Err(err) => {
                core.report(SignalingError::malformed(event, err));
                return;
            }
        };
        let initiator = match core.session() {
            Ok(session) => session.is_initiator(),
            Err(err) => {
                debug!(target = "signaling", event, error = %err, "push message without session");
                return;
            }
        };
        match message {
            RoomMessage::Offer { sdp } if !initiator => {
                core.notify(Notification::Description(SessionDescription::offer(sdp)));
            }
            RoomMessage::Answer { sdp } if initiator => {
                core.notify(Notification::Description(SessionDescription::answer(sdp)));
            }
            RoomMessage::Offer { .. } | RoomMessage::Answer { .. } => {
                let role = if initiator { "initiator" } else { "receiver" };
                core.report(SignalingError::unexpected(
                    event,
                    format!("description not expected by the {role}"),
                ));
            }
            RoomMessage::Candidate {
                label,
                id,
                candidate,
            } => core.notify(Notification::Candidate(IceCandidate::new(id, label, candidate))),
            RoomMessage::Bye => info!(target = "signaling", "remote peer left the room"),
        }
    }

    fn accepts(&self, _kind: PostKind, body: &str) -> bool {
        is_success(body)
    }

    fn bye_url(&self, _session: &Session) -> Option<Url> {
        self.endpoints.as_ref().map(|endpoints| endpoints.bye.clone())
    }
}
