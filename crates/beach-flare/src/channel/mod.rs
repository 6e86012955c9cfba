//! Signaling channels: one worker per channel, one protocol per variant.

mod room_server;
mod smoke_signal;
mod worker;

pub use room_server::RoomServerChannel;
pub use smoke_signal::SmokeSignalChannel;

use crate::types::{IceCandidate, SessionDescription};

/// Outbound surface shared by both room protocols.
///
/// Every method enqueues work for the channel worker and returns immediately.
/// Outcomes, failures included, arrive through the channel's [`crate::SignalingEvents`].
pub trait SignalingChannel: Send + Sync {
    /// Creates the session and starts joining `room_url`. A channel joins at most once.
    ///
    /// `room_url` must be an absolute URL. Anything else, a bare room id included, fails
    /// the session with a transport error and performs no I/O.
    fn connect(&self, room_url: &str, loopback: bool);

    /// Sends a best-effort bye when connected and releases the push subscription.
    fn disconnect(&self);

    fn send_offer(&self, description: SessionDescription);

    fn send_answer(&self, description: SessionDescription);

    fn send_local_candidate(&self, candidate: IceCandidate);
}
