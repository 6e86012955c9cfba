use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a session description in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated media/transport parameters exchanged as offer or answer.
///
/// Serializes as `{"type": "...", "sdp": "..."}`, the shape both room protocols use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Same SDP re-tagged as an answer. Loopback rooms feed this back to the caller.
    pub fn to_answer(&self) -> Self {
        Self::answer(self.sdp.clone())
    }
}

/// A network path proposed for the peer-to-peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        }
    }
}

/// Identity the server assigned once the room join completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIdentity {
    pub room_id: String,
    pub client_id: String,
    /// Auth token addressed envelopes must carry. Room-server joins have none.
    pub token: Option<String>,
    pub initiator: bool,
}

#[cfg(feature = "webrtc-interop")]
mod interop {
    use super::{IceCandidate, SessionDescription};
    use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    impl SessionDescription {
        /// Converts a description produced by the media engine. Fails for
        /// `RTCSdpType::Unspecified`.
        pub fn from_rtc(description: &RTCSessionDescription) -> Result<Self, serde_json::Error> {
            serde_json::to_value(description).and_then(serde_json::from_value)
        }

        pub fn to_rtc(&self) -> Result<RTCSessionDescription, serde_json::Error> {
            serde_json::to_value(self).and_then(serde_json::from_value)
        }
    }

    impl IceCandidate {
        /// Returns `None` when the engine did not attach a media line to the candidate.
        pub fn from_rtc_init(init: RTCIceCandidateInit) -> Option<Self> {
            Some(Self {
                candidate: init.candidate,
                sdp_mid: init.sdp_mid?,
                sdp_mline_index: init.sdp_mline_index?,
            })
        }

        pub fn to_rtc_init(&self) -> RTCIceCandidateInit {
            RTCIceCandidateInit {
                candidate: self.candidate.clone(),
                sdp_mid: Some(self.sdp_mid.clone()),
                sdp_mline_index: Some(self.sdp_mline_index),
                ..Default::default()
            }
        }
    }

}
