use std::fmt;

use thiserror::Error;

use crate::session::SessionError;

/// Failures raised by the HTTP and push primitives.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("push subscription failed: {0}")]
    Subscribe(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Outbound operations a caller can request from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    SendOffer,
    SendAnswer,
    SendCandidate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Connect => "connect",
            Operation::SendOffer => "send offer",
            Operation::SendAnswer => "send answer",
            Operation::SendCandidate => "send candidate",
        };
        f.write_str(label)
    }
}

/// Everything the channel reports through [`crate::SignalingEvents::on_channel_error`].
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("server rejected {kind} post: {body}")]
    Rejected { kind: &'static str, body: String },
    #[error("invalid room url {url}: {reason}")]
    InvalidRoomUrl { url: String, reason: String },
    #[error("room join failed: {0}")]
    RoomJoin(String),
    #[error("room server error: {0}")]
    RoomServer(String),
    #[error("loopback room is busy")]
    LoopbackBusy,
    #[error("failed to open push subscription: {0}")]
    SubscriptionFailed(String),
    #[error("malformed {event} event: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected {event} event: {reason}")]
    Unexpected { event: String, reason: String },
    #[error("{operation} rejected: {source}")]
    Misuse {
        operation: Operation,
        #[source]
        source: SessionError,
    },
}

/// Coarse error class; decides whether the session moves to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    MalformedMessage,
    ProtocolMisuse,
}

impl ErrorKind {
    /// Fatal errors move the session to `Error`; the channel cannot be reused.
    pub fn is_fatal(self) -> bool {
        self == ErrorKind::Transport
    }
}

impl SignalingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalingError::Transport { .. }
            | SignalingError::Rejected { .. }
            | SignalingError::InvalidRoomUrl { .. }
            | SignalingError::RoomJoin(_)
            | SignalingError::RoomServer(_)
            | SignalingError::LoopbackBusy
            | SignalingError::SubscriptionFailed(_) => ErrorKind::Transport,
            SignalingError::Malformed { .. } | SignalingError::Unexpected { .. } => {
                ErrorKind::MalformedMessage
            }
            SignalingError::Misuse { .. } => ErrorKind::ProtocolMisuse,
        }
    }

    pub(crate) fn transport(context: &'static str, source: TransportError) -> Self {
        SignalingError::Transport { context, source }
    }

    pub(crate) fn malformed(event: &str, source: serde_json::Error) -> Self {
        SignalingError::Malformed {
            event: event.to_string(),
            source,
        }
    }

    pub(crate) fn unexpected(event: &str, reason: impl Into<String>) -> Self {
        SignalingError::Unexpected {
            event: event.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn misuse(operation: Operation, source: SessionError) -> Self {
        SignalingError::Misuse { operation, source }
    }
}

pub type SignalingResult<T> = Result<T, SignalingError>;
