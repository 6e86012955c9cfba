//! Single-consumer worker shared by both room protocols.
//!
//! Every public channel operation becomes a [`Command`] on an unbounded queue. One
//! task drains the queue and is the only code that touches the [`Session`], so state
//! mutations never race. HTTP completions and push items are re-enqueued on the same
//! queue before they can observe or change the session.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ChannelConfig;
use crate::error::{Operation, SignalingError, TransportError};
use crate::session::{Session, SessionError};
use crate::sink::SignalingEvents;
use crate::transport::{HttpTransport, PushItem, PushTransport};
use crate::types::{IceCandidate, RoomIdentity, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostKind {
    Offer,
    Answer,
    Candidate,
    Bye,
}

impl PostKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            PostKind::Offer => "offer",
            PostKind::Answer => "answer",
            PostKind::Candidate => "candidate",
            PostKind::Bye => "bye",
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            PostKind::Offer => "offer post failed",
            PostKind::Answer => "answer post failed",
            PostKind::Candidate => "candidate post failed",
            PostKind::Bye => "bye post failed",
        }
    }
}

pub(crate) enum Command {
    Connect { room_url: String, loopback: bool },
    Disconnect,
    SendOffer(SessionDescription),
    SendAnswer(SessionDescription),
    SendCandidate(IceCandidate),
    Push { generation: u64, item: PushItem },
    PushEnded { generation: u64 },
    Posted {
        kind: PostKind,
        result: Result<String, TransportError>,
    },
    Joined(Result<String, TransportError>),
    Report(SignalingError),
    Inspect(oneshot::Sender<Option<Session>>),
}

/// Sink notification produced while handling a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    Connected(RoomIdentity),
    Description(SessionDescription),
    Candidate(IceCandidate),
}

/// Protocol-specific half of a channel. Implementations run on the worker.
pub(crate) trait Protocol: Send + 'static {
    const NAME: &'static str;

    /// Starts the join flow for the session the worker just created.
    fn start(&mut self, core: &mut Core, room_url: Url);
    fn send_offer(&mut self, core: &mut Core, description: SessionDescription);
    fn send_answer(&mut self, core: &mut Core, description: SessionDescription);
    fn send_candidate(&mut self, core: &mut Core, candidate: IceCandidate);
    fn on_push_message(&mut self, core: &mut Core, event: &str, data: &str);

    fn on_join_response(&mut self, _core: &mut Core, _result: Result<String, TransportError>) {
        debug!(target = "signaling", protocol = Self::NAME, "ignoring join response");
    }

    /// Whether a message post response body signals acceptance.
    fn accepts(&self, kind: PostKind, body: &str) -> bool;

    fn bye_url(&self, session: &Session) -> Option<Url>;
}

struct Subscription {
    generation: u64,
    opened: bool,
    pump: JoinHandle<()>,
}

/// Worker-owned state shared by both protocols.
pub(crate) struct Core {
    events: Arc<dyn SignalingEvents>,
    http: Arc<dyn HttpTransport>,
    push: Arc<dyn PushTransport>,
    config: ChannelConfig,
    queue: mpsc::WeakUnboundedSender<Command>,
    session: Option<Session>,
    subscription: Option<Subscription>,
    generation: u64,
    bye: Option<JoinHandle<()>>,
}

impl Core {
    pub(crate) fn session(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::NotStarted)
    }

    pub(crate) fn session_mut(&mut self) -> Result<&mut Session, SessionError> {
        self.session.as_mut().ok_or(SessionError::NotStarted)
    }

    /// Returns the session if it is connected; otherwise reports `operation` as misuse.
    pub(crate) fn connected_for(&self, operation: Operation) -> Option<&Session> {
        let checked = self
            .session()
            .and_then(|session| session.ensure_connected().map(|_| session));
        match checked {
            Ok(session) => Some(session),
            Err(err) => {
                self.report(SignalingError::misuse(operation, err));
                None
            }
        }
    }

    /// Funnels an error through the worker queue; the duplicate guard runs there.
    pub(crate) fn report(&self, error: SignalingError) {
        let Some(queue) = self.queue.upgrade() else {
            warn!(target = "signaling", error = %error, "channel dropped; dropping error");
            return;
        };
        if queue.send(Command::Report(error)).is_err() {
            warn!(target = "signaling", "worker stopped; dropping error");
        }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        match notification {
            Notification::Connected(room) => {
                info!(
                    target = "signaling",
                    room = %room.room_id,
                    client = %room.client_id,
                    initiator = room.initiator,
                    "connected to room"
                );
                self.events.on_connected_to_room(&room);
            }
            Notification::Description(description) => {
                debug!(
                    target = "signaling",
                    sdp_type = %description.sdp_type,
                    len = description.sdp.len(),
                    "remote description received"
                );
                self.events.on_remote_description(&description);
            }
            Notification::Candidate(candidate) => {
                debug!(
                    target = "signaling",
                    sdp_mid = %candidate.sdp_mid,
                    sdp_mline_index = candidate.sdp_mline_index,
                    "remote candidate received"
                );
                self.events.on_remote_ice_candidate(&candidate);
            }
        }
    }

    /// Spawns a POST; its completion comes back as [`Command::Posted`].
    pub(crate) fn post(&mut self, kind: PostKind, url: Url, body: String) {
        if kind == PostKind::Bye {
            debug!(target = "signaling", url = %url, "C->room: bye");
        } else {
            debug!(target = "signaling", url = %url, kind = kind.as_str(), body = %body, "C->room");
        }
        let http = Arc::clone(&self.http);
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            let result = http.post(&url, body).await;
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Command::Posted { kind, result });
            }
        });
        if kind == PostKind::Bye {
            self.bye = Some(handle);
        }
    }

    /// Spawns the join request; its completion comes back as [`Command::Joined`].
    pub(crate) fn request_join(&self, url: Url) {
        debug!(target = "signaling", url = %url, "requesting room parameters");
        let http = Arc::clone(&self.http);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = http.post(&url, String::new()).await;
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Command::Joined(result));
            }
        });
    }

    /// Opens the push subscription, replacing any previous one.
    pub(crate) fn subscribe(&mut self, url: &Url) {
        self.release_subscription();
        self.generation += 1;
        let generation = self.generation;
        let mut stream = match self.push.subscribe(url) {
            Ok(stream) => stream,
            Err(err) => {
                self.report(SignalingError::SubscriptionFailed(err.to_string()));
                return;
            }
        };
        debug!(target = "signaling", url = %url, generation, "push subscription requested");
        let queue = self.queue.clone();
        let pump = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let Some(queue) = queue.upgrade() else {
                    return;
                };
                if queue.send(Command::Push { generation, item }).is_err() {
                    return;
                }
            }
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Command::PushEnded { generation });
            }
        });
        self.subscription = Some(Subscription {
            generation,
            opened: false,
            pump,
        });
    }

    fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.pump.abort();
            debug!(
                target = "signaling",
                generation = subscription.generation,
                "push subscription released"
            );
        }
    }

    fn current_subscription(&mut self, generation: u64) -> Option<&mut Subscription> {
        self.subscription
            .as_mut()
            .filter(|subscription| subscription.generation == generation)
    }

    fn is_terminal(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.phase().is_terminal())
    }
}

pub(crate) struct Worker<P: Protocol> {
    protocol: P,
    core: Core,
}

impl<P: Protocol> Worker<P> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        self.core.release_subscription();
        if let Some(bye) = self.core.bye.take() {
            if tokio::time::timeout(self.core.config.request_timeout, bye)
                .await
                .is_err()
            {
                warn!(target = "signaling", "bye still in flight at shutdown");
            }
        }
        debug!(target = "signaling", protocol = P::NAME, "signaling worker stopped");
    }

    fn handle(&mut self, command: Command) {
        let Worker { protocol, core } = self;
        match command {
            Command::Connect { room_url, loopback } => Self::connect(protocol, core, room_url, loopback),
            Command::Disconnect => Self::disconnect(protocol, core),
            Command::SendOffer(description) => protocol.send_offer(core, description),
            Command::SendAnswer(description) => protocol.send_answer(core, description),
            Command::SendCandidate(candidate) => protocol.send_candidate(core, candidate),
            Command::Push { generation, item } => Self::on_push(protocol, core, generation, item),
            Command::PushEnded { generation } => {
                if core.current_subscription(generation).is_some() {
                    info!(target = "signaling", generation, "push subscription closed by transport");
                    core.subscription = None;
                }
            }
            Command::Posted { kind, result } => Self::on_posted(protocol, core, kind, result),
            Command::Joined(result) => {
                if core.is_terminal() {
                    debug!(target = "signaling", "dropping join response for finished session");
                } else {
                    protocol.on_join_response(core, result);
                }
            }
            Command::Report(error) => Self::on_report(core, error),
            Command::Inspect(reply) => {
                let _ = reply.send(core.session.clone());
            }
        }
    }

    fn connect(protocol: &mut P, core: &mut Core, room_url: String, loopback: bool) {
        if let Some(existing) = &core.session {
            let err = SessionError::AlreadyStarted(existing.room_id().to_string());
            core.report(SignalingError::misuse(Operation::Connect, err));
            return;
        }
        match Url::parse(&room_url) {
            Ok(url) => {
                let room_id = room_id_from_url(&url);
                info!(
                    target = "signaling",
                    protocol = P::NAME,
                    room = %room_id,
                    url = %url,
                    loopback,
                    "connecting to room"
                );
                core.session = Some(Session::new(room_id, loopback));
                protocol.start(core, url);
            }
            Err(err) => {
                core.session = Some(Session::new(room_url.clone(), loopback));
                core.report(SignalingError::InvalidRoomUrl {
                    url: room_url,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn disconnect(protocol: &mut P, core: &mut Core) {
        let Some(session) = core.session.as_mut() else {
            debug!(target = "signaling", "disconnect before connect; nothing to release");
            return;
        };
        let previous = session.phase();
        if session.close() {
            match protocol.bye_url(session) {
                Some(url) => core.post(PostKind::Bye, url, String::new()),
                None => warn!(target = "signaling", "no bye url for connected session"),
            }
        }
        core.release_subscription();
        info!(target = "signaling", previous = %previous, "disconnected from room");
    }

    fn on_push(protocol: &mut P, core: &mut Core, generation: u64, item: PushItem) {
        if core.current_subscription(generation).is_none() {
            trace!(target = "signaling", generation, "dropping item from released subscription");
            return;
        }
        if core.is_terminal() {
            debug!(target = "signaling", "dropping push item for finished session");
            return;
        }
        match item {
            PushItem::Open => {
                if let Some(subscription) = core.current_subscription(generation) {
                    subscription.opened = true;
                }
                info!(target = "signaling", generation, "push subscription open");
            }
            PushItem::Message { event, data } => {
                debug!(target = "signaling", event = %event, len = data.len(), "room->C");
                protocol.on_push_message(core, &event, &data);
            }
            PushItem::Error(err) => {
                let opened = core
                    .current_subscription(generation)
                    .is_some_and(|subscription| subscription.opened);
                if opened {
                    warn!(
                        target = "signaling",
                        error = %err,
                        "push stream error; transport will reconnect"
                    );
                } else {
                    core.report(SignalingError::SubscriptionFailed(err));
                }
            }
        }
    }

    fn on_posted(
        protocol: &mut P,
        core: &mut Core,
        kind: PostKind,
        result: Result<String, TransportError>,
    ) {
        if kind == PostKind::Bye {
            match result {
                Ok(_) => debug!(target = "signaling", "bye delivered"),
                Err(err) => warn!(target = "signaling", error = %err, "bye failed"),
            }
            return;
        }
        if core.is_terminal() {
            debug!(
                target = "signaling",
                kind = kind.as_str(),
                "dropping post completion for finished session"
            );
            return;
        }
        match result {
            Ok(body) if protocol.accepts(kind, &body) => {
                trace!(target = "signaling", kind = kind.as_str(), "post accepted");
            }
            Ok(body) => core.report(SignalingError::Rejected {
                kind: kind.as_str(),
                body,
            }),
            Err(err) => core.report(SignalingError::transport(kind.failure_context(), err)),
        }
    }

    fn on_report(core: &mut Core, error: SignalingError) {
        let kind = error.kind();
        if kind.is_fatal() {
            let first = core.session.as_mut().map_or(true, Session::fail);
            if !first {
                debug!(target = "signaling", error = %error, "suppressing repeated channel error");
                return;
            }
            warn!(target = "signaling", error = %error, "channel error");
            core.release_subscription();
        } else {
            warn!(target = "signaling", kind = ?kind, error = %error, "signaling error");
        }
        core.events.on_channel_error(&error);
    }
}

/// Caller-side handle: enqueues commands for the worker.
pub(crate) struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns the worker on the current tokio runtime.
    pub(crate) fn spawn<P: Protocol>(
        protocol: P,
        events: Arc<dyn SignalingEvents>,
        http: Arc<dyn HttpTransport>,
        push: Arc<dyn PushTransport>,
        config: ChannelConfig,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let core = Core {
            events,
            http,
            push,
            config,
            queue: commands.downgrade(),
            session: None,
            subscription: None,
            generation: 0,
            bye: None,
        };
        let worker = tokio::spawn(Worker { protocol, core }.run(rx));
        Self { commands, worker }
    }

    pub(crate) fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(target = "signaling", "signaling worker stopped; dropping command");
        }
    }

    /// Snapshot of the session after every previously enqueued command ran.
    pub(crate) async fn session(&self) -> Option<Session> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Inspect(tx));
        rx.await.ok().flatten()
    }

    /// Disconnects, then waits for the worker to drain, including an in-flight bye.
    pub(crate) async fn close(self) {
        let WorkerHandle { commands, worker } = self;
        let _ = commands.send(Command::Disconnect);
        drop(commands);
        if let Err(err) = worker.await {
            warn!(target = "signaling", error = %err, "signaling worker panicked");
        }
    }
}

/// Last non-empty path segment, falling back to the host.
pub(crate) fn room_id_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// `base` with `segments` appended to its path.
pub(crate) fn append_segments(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().ok()?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_last_segment() {
        let url = Url::parse("https://signal.example/api/room1").unwrap();
        assert_eq!(room_id_from_url(&url), "room1");
        let url = Url::parse("https://signal.example/api/room1/").unwrap();
        assert_eq!(room_id_from_url(&url), "room1");
        let url = Url::parse("https://signal.example/").unwrap();
        assert_eq!(room_id_from_url(&url), "signal.example");
    }

    #[test]
    fn appends_segments() {
        let base = Url::parse("https://signal.example/api/room1").unwrap();
        let url = append_segments(&base, &["bye", "u1"]).unwrap();
        assert_eq!(url.as_str(), "https://signal.example/api/room1/bye/u1");

        let root = Url::parse("https://signal.example/").unwrap();
        let url = append_segments(&root, &["message", "room1", "c1"]).unwrap();
        assert_eq!(url.as_str(), "https://signal.example/message/room1/c1");
    }
}
