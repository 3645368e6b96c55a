use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{CallError, Result};
use crate::media::{LocalTrack, MediaKind};
use crate::peer::transport::{ConnectionState, MediaTransport, TransportEvent, TransportFactory};
use crate::peer::types::{IceCandidate, RemoteStream, SdpType, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;

/// Creates one webrtc-rs peer connection per remote participant.
pub struct RtcTransportFactory {
    api: Arc<API>,
    config: RTCConfiguration,
}

impl RtcTransportFactory {
    pub fn new(servers: &[ServerConfig]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            api: Arc::new(api),
            config: rtc_config(servers),
        })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>> {
        let pc = open_connection(&self.api, &self.config, peer_id, events.clone()).await?;
        Ok(Arc::new(RtcTransport {
            api: self.api.clone(),
            config: self.config.clone(),
            peer_id: peer_id.to_owned(),
            events,
            pc: RwLock::new(pc),
            tracks: Mutex::new(Vec::new()),
        }))
    }
}

async fn open_connection(
    api: &API,
    config: &RTCConfiguration,
    peer_id: &str,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<Arc<RTCPeerConnection>> {
    let pc = Arc::new(api.new_peer_connection(config.clone()).await?);
    wire_callbacks(&pc, peer_id, events);
    Ok(pc)
}

fn wire_callbacks(
    pc: &RTCPeerConnection,
    peer_id: &str,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand.map(|c| c.to_json()) {
            Some(Ok(init)) => {
                let _ = candidate_events.send(TransportEvent::CandidateGathered(init.into()));
            }
            Some(Err(err)) => debug!(error = %err, "unserializable local candidate"),
            // None marks the end of gathering
            None => debug!("ICE candidate gathering completed"),
        }
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            let _ = track_events.send(TransportEvent::TrackReceived(RemoteStream {
                stream_id: track.stream_id(),
                track_id: track.id(),
                kind,
            }));
            Box::pin(async {})
        },
    ));

    let state_events = events;
    pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
        let mapped = match st {
            RTCIceConnectionState::Checking => ConnectionState::Checking,
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                ConnectionState::Connected
            }
            RTCIceConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCIceConnectionState::Failed => ConnectionState::Failed,
            RTCIceConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        };
        let _ = state_events.send(TransportEvent::ConnectionStateChanged(mapped));
        Box::pin(async {})
    }));

    let peer = peer_id.to_owned();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(peer_id = %peer, state = ?st, "peer connection state changed");
        Box::pin(async {})
    }));
}

/// Stops a discarded connection from reporting into the peer's lane.
fn mute_callbacks(pc: &RTCPeerConnection) {
    pc.on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
    pc.on_track(Box::new(
        |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            Box::pin(async {})
        },
    ));
    pc.on_ice_connection_state_change(Box::new(|_: RTCIceConnectionState| Box::pin(async {})));
    pc.on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| Box::pin(async {})));
}

/// [`MediaTransport`] over an `RTCPeerConnection`.
pub struct RtcTransport {
    api: Arc<API>,
    config: RTCConfiguration,
    peer_id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    pc: RwLock<Arc<RTCPeerConnection>>,
    tracks: Mutex<Vec<Arc<dyn TrackLocal + Send + Sync>>>,
}

impl RtcTransport {
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().clone()
    }

    /// A new connection carrying the tracks added so far.
    async fn reopen(&self) -> Result<Arc<RTCPeerConnection>> {
        let pc =
            open_connection(&self.api, &self.config, &self.peer_id, self.events.clone()).await?;
        let tracks = self.tracks.lock().clone();
        for track in tracks {
            pc.add_track(track).await?;
        }
        Ok(pc)
    }
}

#[async_trait]
impl MediaTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(self.peer_connection().create_offer(None).await?.into())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(self.peer_connection().create_answer(None).await?.into())
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection().set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection().set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection()
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        match track.rtc() {
            Some(rtc) => {
                self.peer_connection().add_track(rtc.clone()).await?;
                self.tracks.lock().push(rtc);
            }
            None => debug!(track = track.id(), "track has no RTP sink, not added"),
        }
        Ok(())
    }

    /// webrtc-rs has no local rollback out of have-local-offer, so the pending offer is
    /// discarded together with its connection.
    async fn rollback(&self) -> Result<()> {
        let stale = self.peer_connection();
        let state = stale.signaling_state();
        if state != RTCSignalingState::HaveLocalOffer {
            return Err(CallError::Transport(format!(
                "no local offer to roll back ({state})"
            )));
        }
        let fresh = self.reopen().await?;
        *self.pc.write() = fresh;
        mute_callbacks(&stale);
        if let Err(err) = stale.close().await {
            debug!(peer_id = %self.peer_id, error = %err, "stale connection close failed");
        }
        info!(peer_id = %self.peer_id, "local offer rolled back");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection().close().await?;
        Ok(())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback
        }
    })
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            _ => SdpType::Offer,
        };
        SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

/// Peer connection settings for the given ICE servers
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}
