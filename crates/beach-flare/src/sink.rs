use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ErrorKind, SignalingError};
use crate::types::{IceCandidate, RoomIdentity, SessionDescription};

/// Callback surface a channel drives as the negotiation progresses.
///
/// Callbacks run on the channel worker. Implementations must return quickly or hand
/// work off to their own task; a blocked callback stalls the whole channel.
pub trait SignalingEvents: Send + Sync {
    fn on_connected_to_room(&self, room: &RoomIdentity);
    fn on_remote_description(&self, description: &SessionDescription);
    fn on_remote_ice_candidate(&self, candidate: &IceCandidate);
    fn on_channel_error(&self, error: &SignalingError);
}

/// Owned copy of a sink notification, for consumers that prefer a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    ConnectedToRoom(RoomIdentity),
    RemoteDescription(SessionDescription),
    RemoteIceCandidate(IceCandidate),
    ChannelError { kind: ErrorKind, message: String },
}

/// Sink that forwards every notification onto an unbounded queue.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

impl EventForwarder {
    pub fn new(tx: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: SignalingEvent) {
        if self.tx.send(event).is_err() {
            debug!(target = "signaling", "event receiver dropped; discarding notification");
        }
    }
}

impl SignalingEvents for EventForwarder {
    fn on_connected_to_room(&self, room: &RoomIdentity) {
        self.forward(SignalingEvent::ConnectedToRoom(room.clone()));
    }

    fn on_remote_description(&self, description: &SessionDescription) {
        self.forward(SignalingEvent::RemoteDescription(description.clone()));
    }

    fn on_remote_ice_candidate(&self, candidate: &IceCandidate) {
        self.forward(SignalingEvent::RemoteIceCandidate(candidate.clone()));
    }

    fn on_channel_error(&self, error: &SignalingError) {
        self.forward(SignalingEvent::ChannelError {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}
