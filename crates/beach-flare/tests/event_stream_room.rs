use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::debug;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use beach_flare::wire::room_server::RoomMessage;
use beach_flare::{
    ChannelConfig, ErrorKind, EventForwarder, IceCandidate, Phase, RoomServerChannel,
    SessionDescription, SignalingChannel, SignalingEvent, SmokeSignalChannel,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    pushes: broadcast::Sender<(Option<String>, String)>,
    posts: mpsc::UnboundedSender<(String, String)>,
    subscribed: mpsc::UnboundedSender<String>,
}

struct Server {
    addr: SocketAddr,
    pushes: broadcast::Sender<(Option<String>, String)>,
    posts: mpsc::UnboundedReceiver<(String, String)>,
    subscribed: mpsc::UnboundedReceiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    async fn start() -> Self {
        let _ = SubscriberBuilder::default()
            .with_test_writer()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();

        let (pushes, _) = broadcast::channel(16);
        let (posts_tx, posts) = mpsc::unbounded_channel();
        let (subscribed_tx, subscribed) = mpsc::unbounded_channel();
        let state = AppState {
            pushes: pushes.clone(),
            posts: posts_tx,
            subscribed: subscribed_tx,
        };
        let router = Router::new()
            .route("/rooms/:room", get(smoke_events).post(smoke_message))
            .route("/rooms/:room/bye/:uid", post(smoke_bye))
            .route("/join/:room", post(join_room))
            .route("/events/:room/:client", get(room_events))
            .route("/message/:room/:client", post(room_message))
            .route("/bye/:room/:client", post(room_bye))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener bind");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            pushes,
            posts,
            subscribed,
            shutdown: Some(shutdown_tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn push(&self, event: Option<&str>, data: String) {
        self.pushes
            .send((event.map(str::to_string), data))
            .expect("an event stream is subscribed");
    }

    async fn next_post(&mut self) -> (String, String) {
        timeout(WAIT, self.posts.recv())
            .await
            .expect("post before timeout")
            .expect("server alive")
    }

    async fn next_subscriber(&mut self) -> String {
        timeout(WAIT, self.subscribed.recv())
            .await
            .expect("subscriber before timeout")
            .expect("server alive")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn relay(
    state: &AppState,
    path: String,
    first: Option<Event>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pushes.subscribe();
    let _ = state.subscribed.send(path);
    let relayed = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok((name, data)) => {
                    let event = Event::default().data(data);
                    let event = match name {
                        Some(name) => event.event(name),
                        None => event,
                    };
                    return Some((Ok::<Event, Infallible>(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let stream = stream::iter(first.map(Ok::<Event, Infallible>)).chain(relayed);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn smoke_events(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("stub: event stream opened for {room}");
    let uid = Event::default()
        .event("uid")
        .data(json!({"uid": "u1", "token": "t1"}).to_string());
    relay(&state, format!("/rooms/{room}"), Some(uid))
}

async fn smoke_message(
    State(state): State<AppState>,
    Path(room): Path<String>,
    body: String,
) -> &'static str {
    let _ = state.posts.send((format!("/rooms/{room}"), body));
    "ok\n"
}

async fn smoke_bye(
    State(state): State<AppState>,
    Path((room, uid)): Path<(String, String)>,
    body: String,
) -> &'static str {
    let _ = state.posts.send((format!("/rooms/{room}/bye/{uid}"), body));
    "ok"
}

async fn join_room(Path(room): Path<String>) -> Result<String, StatusCode> {
    if room == "full" {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(json!({
        "result": "SUCCESS",
        "params": {
            "room_id": room,
            "client_id": "c1",
            "is_initiator": "true",
            "messages": [],
        }
    })
    .to_string())
}

async fn room_events(
    State(state): State<AppState>,
    Path((room, client)): Path<(String, String)>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    relay(&state, format!("/events/{room}/{client}"), None)
}

async fn room_message(
    State(state): State<AppState>,
    Path((room, client)): Path<(String, String)>,
    body: String,
) -> String {
    let _ = state.posts.send((format!("/message/{room}/{client}"), body));
    json!({"result": "SUCCESS"}).to_string()
}

async fn room_bye(
    State(state): State<AppState>,
    Path((room, client)): Path<(String, String)>,
) -> StatusCode {
    let _ = state.posts.send((format!("/bye/{room}/{client}"), String::new()));
    StatusCode::OK
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event before timeout")
        .expect("event channel open")
}

fn config() -> ChannelConfig {
    ChannelConfig::default().with_reconnect_interval(Duration::from_millis(100))
}

#[tokio::test]
async fn smoke_signal_room_over_http() {
    let mut server = Server::start().await;
    let (forwarder, mut events) = EventForwarder::channel();
    let channel = SmokeSignalChannel::new(Arc::new(forwarder), config()).expect("channel");

    channel.connect(&server.url("/rooms/room1"), false);
    assert_eq!(server.next_subscriber().await, "/rooms/room1");
    match next_event(&mut events).await {
        SignalingEvent::ConnectedToRoom(room) => {
            assert_eq!(room.room_id, "room1");
            assert_eq!(room.client_id, "u1");
            assert_eq!(room.token.as_deref(), Some("t1"));
        }
        other => panic!("expected connected, got {other:?}"),
    }

    server.push(
        Some("offer"),
        json!({"peer": "p1", "offer": {"type": "offer", "sdp": "v=0\r\n"}}).to_string(),
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::RemoteDescription(SessionDescription::offer("v=0\r\n"))
    );
    server.push(
        Some("icecandidate"),
        json!({
            "peer": "p1",
            "candidate": {"candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0}
        })
        .to_string(),
    );
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::RemoteIceCandidate(IceCandidate::new("0", 0, "candidate:1"))
    );

    channel.send_answer(SessionDescription::answer("v=1\r\n"));
    let (path, body) = server.next_post().await;
    assert_eq!(path, "/rooms/room1");
    let body: Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(body["type"], "answer");
    assert_eq!(body["peer"], "p1");
    assert_eq!(body["token"], "t1");
    assert_eq!(body["payload"]["answer"]["sdp"], "v=1\r\n");

    assert_eq!(channel.session().await.expect("session").phase(), Phase::Connected);
    channel.close().await;
    let (path, body) = server.next_post().await;
    assert_eq!(path, "/rooms/room1/bye/u1");
    assert!(body.is_empty());
}

#[tokio::test]
async fn room_server_loopback_over_http() {
    let mut server = Server::start().await;
    let (forwarder, mut events) = EventForwarder::channel();
    let channel = RoomServerChannel::new(Arc::new(forwarder), config()).expect("channel");

    channel.connect(&server.url("/join/room7"), true);
    match next_event(&mut events).await {
        SignalingEvent::ConnectedToRoom(room) => {
            assert_eq!(room.room_id, "room7");
            assert!(room.initiator);
            assert!(room.token.is_none());
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(server.next_subscriber().await, "/events/room7/c1");

    channel.send_offer(SessionDescription::offer("v=loop"));
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::RemoteDescription(SessionDescription::answer("v=loop"))
    );
    let (path, body) = server.next_post().await;
    assert_eq!(path, "/message/room7/c1");
    let body: Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(body, json!({"type": "offer", "sdp": "v=loop"}));

    let candidate = RoomMessage::candidate(&IceCandidate::new("audio", 0, "candidate:9"));
    server.push(None, json!({"msg": candidate.encode(), "error": ""}).to_string());
    assert_eq!(
        next_event(&mut events).await,
        SignalingEvent::RemoteIceCandidate(IceCandidate::new("audio", 0, "candidate:9"))
    );

    channel.close().await;
    let (path, _) = server.next_post().await;
    assert_eq!(path, "/bye/room7/c1");
}

#[tokio::test]
async fn room_server_error_status_fails_the_session() {
    let server = Server::start().await;
    let (forwarder, mut events) = EventForwarder::channel();
    let channel = RoomServerChannel::new(Arc::new(forwarder), config()).expect("channel");

    channel.connect(&server.url("/join/full"), false);
    match next_event(&mut events).await {
        SignalingEvent::ChannelError { kind, message } => {
            assert_eq!(kind, ErrorKind::Transport);
            assert!(message.contains("503"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(channel.session().await.expect("session").phase(), Phase::Error);
}
