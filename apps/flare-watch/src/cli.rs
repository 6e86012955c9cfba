use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "flare-watch")]
#[command(about = "Join a signaling room and log every notification")]
pub struct Cli {
    /// Room URL (smoke-signal: the room itself; room-server: the join endpoint)
    #[arg(env = "FLARE_ROOM_URL")]
    pub room_url: String,

    /// Room protocol spoken by the server
    #[arg(short, long, value_enum, default_value_t = Protocol::SmokeSignal, env = "FLARE_PROTOCOL")]
    pub protocol: Protocol,

    /// Answer our own offer locally instead of waiting for a remote peer
    #[arg(long)]
    pub loopback: bool,

    /// File holding an SDP offer to send once connected
    #[arg(long, value_name = "PATH")]
    pub offer_sdp: Option<PathBuf>,

    /// Disconnect after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    SmokeSignal,
    RoomServer,
}
