use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::LocalTrack;
use crate::peer::types::{IceCandidate, RemoteStream, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Notifications a transport raises on its own schedule.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CandidateGathered(IceCandidate),
    TrackReceived(RemoteStream),
    ConnectionStateChanged(ConnectionState),
}

/// Negotiation primitives of one peer connection.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;
    /// Drops a local offer that has not been answered.
    async fn rollback(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// New connection for `peer_id`; its notifications go to `events`.
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>>;
}
