//! Smoke-signal rooms: push events named by kind, peer/token addressed posts.

use serde::Deserialize;
use serde_json::json;

use crate::types::{IceCandidate, SessionDescription};

pub const EVENT_UID: &str = "uid";
pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ICE_CANDIDATE: &str = "icecandidate";
pub const EVENT_BUDDY_LEFT: &str = "buddyleft";
pub const EVENT_NEW_BUDDY: &str = "newbuddy";

/// Decoded push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    UidAssigned { uid: String, token: String },
    Offer { peer: String, offer: SessionDescription },
    /// Acknowledgment of a posted answer; carries nothing we act on.
    Answer,
    IceCandidate { peer: String, candidate: IceCandidate },
    PeerLeft { peer: String },
    PeerJoined { peer: Option<String> },
    Unknown(String),
}

#[derive(Deserialize)]
struct UidPayload {
    uid: String,
    token: String,
}

#[derive(Deserialize)]
struct OfferPayload {
    peer: String,
    offer: SessionDescription,
}

#[derive(Deserialize)]
struct CandidatePayload {
    peer: String,
    candidate: IceCandidate,
}

#[derive(Deserialize)]
struct PeerPayload {
    peer: String,
}

#[derive(Deserialize)]
struct BuddyPayload {
    #[serde(default)]
    peer: Option<String>,
}

impl InboundEvent {
    pub fn parse(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        let parsed = match event {
            EVENT_UID => {
                let payload: UidPayload = serde_json::from_str(data)?;
                InboundEvent::UidAssigned {
                    uid: payload.uid,
                    token: payload.token,
                }
            }
            EVENT_OFFER => {
                let payload: OfferPayload = serde_json::from_str(data)?;
                InboundEvent::Offer {
                    peer: payload.peer,
                    offer: payload.offer,
                }
            }
            EVENT_ANSWER => InboundEvent::Answer,
            EVENT_ICE_CANDIDATE => {
                let payload: CandidatePayload = serde_json::from_str(data)?;
                InboundEvent::IceCandidate {
                    peer: payload.peer,
                    candidate: payload.candidate,
                }
            }
            EVENT_BUDDY_LEFT => {
                let payload: PeerPayload = serde_json::from_str(data)?;
                InboundEvent::PeerLeft { peer: payload.peer }
            }
            // newbuddy payloads are informational and not always JSON; objects must decode.
            EVENT_NEW_BUDDY => {
                let peer = if data.trim_start().starts_with('{') {
                    serde_json::from_str::<BuddyPayload>(data)?.peer
                } else {
                    None
                };
                InboundEvent::PeerJoined { peer }
            }
            other => InboundEvent::Unknown(other.to_string()),
        };
        Ok(parsed)
    }
}

/// Offers go to the room unaddressed.
pub fn offer_body(description: &SessionDescription) -> String {
    json!({
        "sdp": description.sdp,
        "type": "offer",
    })
    .to_string()
}

pub fn answer_envelope(peer: &str, token: &str, description: &SessionDescription) -> String {
    json!({
        "type": "answer",
        "peer": peer,
        "token": token,
        "payload": {
            "answer": {
                "type": "answer",
                "sdp": description.sdp,
            }
        }
    })
    .to_string()
}

pub fn candidate_envelope(peer: &str, token: &str, candidate: &IceCandidate) -> String {
    json!({
        "type": "icecandidate",
        "peer": peer,
        "token": token,
        "payload": {
            "candidate": {
                "candidate": candidate.candidate,
                "sdpMid": candidate.sdp_mid,
                "sdpMLineIndex": candidate.sdp_mline_index,
            }
        }
    })
    .to_string()
}
