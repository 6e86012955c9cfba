//! Room-server protocol: a join request returns room parameters, messages are posted
//! to per-client URLs and answered with `{"result": "SUCCESS"}`.

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::SignalingError;
use crate::types::{IceCandidate, SessionDescription};

pub const RESULT_SUCCESS: &str = "SUCCESS";

/// Message exchanged with the room, both posted and pushed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoomMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { label: u16, id: String, candidate: String },
    Bye,
}

impl RoomMessage {
    pub fn offer(description: &SessionDescription) -> Self {
        RoomMessage::Offer {
            sdp: description.sdp.clone(),
        }
    }

    pub fn answer(description: &SessionDescription) -> Self {
        RoomMessage::Answer {
            sdp: description.sdp.clone(),
        }
    }

    pub fn candidate(candidate: &IceCandidate) -> Self {
        RoomMessage::Candidate {
            label: candidate.sdp_mline_index,
            id: candidate.sdp_mid.clone(),
            candidate: candidate.candidate.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let value = match self {
            RoomMessage::Offer { sdp } => json!({"sdp": sdp, "type": "offer"}),
            RoomMessage::Answer { sdp } => json!({"sdp": sdp, "type": "answer"}),
            RoomMessage::Candidate {
                label,
                id,
                candidate,
            } => json!({
                "type": "candidate",
                "label": label,
                "id": id,
                "candidate": candidate,
            }),
            RoomMessage::Bye => json!({"type": "bye"}),
        };
        value.to_string()
    }
}

/// Parameters the room server hands out on join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomParameters {
    pub room_id: String,
    pub client_id: String,
    pub initiator: bool,
    /// Offer already waiting in the room (receiver role).
    pub offer: Option<SessionDescription>,
    /// Candidates already waiting in the room (receiver role).
    pub candidates: Vec<IceCandidate>,
    pub event_url: Option<String>,
}

#[derive(Deserialize)]
struct JoinResponse {
    result: String,
    #[serde(default)]
    params: Option<RawParams>,
}

#[derive(Deserialize)]
struct RawParams {
    room_id: String,
    client_id: String,
    is_initiator: Flag,
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    event_url: Option<String>,
}

// Room servers send the initiator flag either as a JSON bool or as "true"/"false".
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn value(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Text(text) => text.eq_ignore_ascii_case("true"),
        }
    }
}

pub fn parse_join_response(body: &str) -> Result<RoomParameters, SignalingError> {
    let response: JoinResponse = serde_json::from_str(body)
        .map_err(|err| SignalingError::RoomJoin(format!("invalid room response: {err}")))?;
    if response.result != RESULT_SUCCESS {
        return Err(SignalingError::RoomJoin(format!(
            "room response error: {}",
            response.result
        )));
    }
    let params = response
        .params
        .ok_or_else(|| SignalingError::RoomJoin("room response missing params".into()))?;

    let mut offer = None;
    let mut candidates = Vec::new();
    for raw in &params.messages {
        let message: RoomMessage = serde_json::from_str(raw)
            .map_err(|err| SignalingError::RoomJoin(format!("invalid pending message: {err}")))?;
        match message {
            RoomMessage::Offer { sdp } => offer = Some(SessionDescription::offer(sdp)),
            RoomMessage::Candidate {
                label,
                id,
                candidate,
            } => candidates.push(IceCandidate::new(id, label, candidate)),
            stale => {
                warn!(target = "signaling", message = ?stale, "skipping stale pending message");
            }
        }
    }

    Ok(RoomParameters {
        room_id: params.room_id,
        client_id: params.client_id,
        initiator: params.is_initiator.value(),
        offer,
        candidates,
        event_url: params.event_url,
    })
}

/// Decoded push event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Message(RoomMessage),
    ServerError(String),
}

#[derive(Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    msg: String,
    #[serde(default)]
    error: String,
}

pub fn parse_push(data: &str) -> Result<RoomEvent, serde_json::Error> {
    let envelope: PushEnvelope = serde_json::from_str(data)?;
    if !envelope.error.is_empty() {
        return Ok(RoomEvent::ServerError(envelope.error));
    }
    let message = serde_json::from_str(&envelope.msg)?;
    Ok(RoomEvent::Message(message))
}

/// `{"result": "SUCCESS"}` marks an accepted message post.
pub fn is_success(body: &str) -> bool {
    #[derive(Deserialize)]
    struct PostResult {
        result: String,
    }
    serde_json::from_str::<PostResult>(body)
        .map(|parsed| parsed.result == RESULT_SUCCESS)
        .unwrap_or(false)
}
