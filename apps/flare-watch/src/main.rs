mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beach_flare::{
    ChannelConfig, EventForwarder, RoomServerChannel, SessionDescription, SignalingChannel,
    SignalingEvent, SmokeSignalChannel,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Protocol};

enum Channel {
    SmokeSignal(SmokeSignalChannel),
    RoomServer(RoomServerChannel),
}

impl Channel {
    fn signaling(&self) -> &dyn SignalingChannel {
        match self {
            Channel::SmokeSignal(channel) => channel,
            Channel::RoomServer(channel) => channel,
        }
    }

    async fn close(self) {
        match self {
            Channel::SmokeSignal(channel) => channel.close().await,
            Channel::RoomServer(channel) => channel.close().await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let offer = match &cli.offer_sdp {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading offer sdp from {}", path.display()))?,
        ),
        None => None,
    };

    let config = ChannelConfig::from_env();
    let (events, rx) = EventForwarder::channel();
    let events = Arc::new(events);
    let channel = match cli.protocol {
        Protocol::SmokeSignal => Channel::SmokeSignal(SmokeSignalChannel::new(events, config)?),
        Protocol::RoomServer => Channel::RoomServer(RoomServerChannel::new(events, config)?),
    };

    info!(room = %cli.room_url, protocol = ?cli.protocol, loopback = cli.loopback, "joining room");
    channel.signaling().connect(&cli.room_url, cli.loopback);

    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = watch(channel.signaling(), rx, offer) => {
            warn!("stopped watching the room");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!(error = %err, "failed to listen for ctrl-c");
            }
            info!("interrupted; leaving room");
        }
        _ = deadline => {
            info!("duration elapsed; leaving room");
        }
    }

    channel.close().await;
    info!("disconnected");
    Ok(())
}

/// Logs every notification and sends `offer` once the room is joined.
async fn watch(
    channel: &dyn SignalingChannel,
    mut rx: mpsc::UnboundedReceiver<SignalingEvent>,
    mut offer: Option<String>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SignalingEvent::ConnectedToRoom(room) => {
                info!(
                    room = %room.room_id,
                    client = %room.client_id,
                    initiator = room.initiator,
                    "connected"
                );
                if let Some(sdp) = offer.take() {
                    channel.send_offer(SessionDescription::offer(sdp));
                }
            }
            SignalingEvent::RemoteDescription(description) => {
                info!(sdp_type = %description.sdp_type, sdp = %description.sdp, "remote description");
            }
            SignalingEvent::RemoteIceCandidate(candidate) => {
                info!(
                    sdp_mid = %candidate.sdp_mid,
                    sdp_mline_index = candidate.sdp_mline_index,
                    candidate = %candidate.candidate,
                    "remote candidate"
                );
            }
            SignalingEvent::ChannelError { kind, message } => {
                error!(kind = ?kind, %message, "channel error");
                if kind.is_fatal() {
                    return;
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
