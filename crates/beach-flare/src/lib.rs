//! Beach Flare: room signaling client for peer-to-peer media sessions.
//!
//! Responsibilities:
//! - joining a signaling room over HTTP plus a server-sent event stream
//! - relaying offers, answers and ICE candidates between the two participants
//! - tracking the room session (identity, remote peer, phase) on a single worker task
//! - reporting every outcome through the [`SignalingEvents`] sink
//!
//! Two room protocols are supported: [`SmokeSignalChannel`] for rooms that push named
//! events and take peer/token addressed posts, and [`RoomServerChannel`] for rooms that
//! hand out parameters on join.

pub mod channel;
pub mod config;
pub mod error;
pub mod session;
pub mod sink;
pub mod transport;
pub mod types;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use channel::{RoomServerChannel, SignalingChannel, SmokeSignalChannel};
pub use config::ChannelConfig;
pub use error::{ErrorKind, Operation, SignalingError, SignalingResult, TransportError};
pub use session::{Phase, Session, SessionError};
pub use sink::{EventForwarder, SignalingEvent, SignalingEvents};
pub use transport::{EventSourcePush, HttpTransport, PushItem, PushStream, PushTransport, ReqwestHttp};
pub use types::{IceCandidate, RoomIdentity, SdpType, SessionDescription};
