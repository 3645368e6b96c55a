use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::events::EventHub;
use crate::media::LocalMedia;
use crate::peer::state::{PeerCommand, PeerSession};
use crate::peer::transport::{TransportEvent, TransportFactory};
use crate::relay::Outbox;

/// Serial executor for one peer: queued commands and transport notifications are handled
/// one at a time, so handlers for the same peer never overlap.
struct PeerLane {
    commands: mpsc::UnboundedSender<PeerCommand>,
    task: JoinHandle<()>,
}

impl PeerLane {
    fn spawn(
        session: Arc<PeerSession>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_lane(session, queue, transport_events));
        Self { commands, task }
    }
}

async fn run_lane(
    session: Arc<PeerSession>,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut transport_open = true;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => session.execute(command).await,
                None => break,
            },
            event = transport_events.recv(), if transport_open => match event {
                Some(event) => session.observe(event),
                None => transport_open = false,
            },
        }
    }
    debug!(peer_id = %session.peer_id(), "peer lane finished");
}

struct PeerEntry {
    session: Arc<PeerSession>,
    lane: PeerLane,
}

/// Peer sessions keyed by relay session id, in first-seen order.
pub struct PeerRegistry {
    peers: IndexMap<String, PeerEntry>,
    factory: Arc<dyn TransportFactory>,
    outbox: Outbox,
    events: Arc<EventHub>,
    media: Option<LocalMedia>,
}

impl PeerRegistry {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        outbox: Outbox,
        events: Arc<EventHub>,
        media: Option<LocalMedia>,
    ) -> Self {
        Self {
            peers: IndexMap::new(),
            factory,
            outbox,
            events,
            media,
        }
    }

    /// Existing session for `peer_id`, or a new one with its transport wired and local
    /// tracks attached.
    pub async fn get_or_create(&mut self, peer_id: &str) -> Result<Arc<PeerSession>> {
        if let Some(entry) = self.peers.get(peer_id) {
            return Ok(entry.session.clone());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(peer_id, events_tx).await?;
        if let Some(media) = &self.media {
            for track in media.tracks() {
                if let Err(err) = transport.add_track(track.clone()).await {
                    warn!(peer_id, track = track.id(), error = %err, "failed to add local track");
                }
            }
        }

        let session = Arc::new(PeerSession::new(
            peer_id,
            transport,
            self.outbox.clone(),
            self.events.clone(),
        ));
        let lane = PeerLane::spawn(session.clone(), events_rx);
        self.peers.insert(
            peer_id.to_owned(),
            PeerEntry {
                session: session.clone(),
                lane,
            },
        );
        info!(peer_id, total = self.peers.len(), "peer session created");
        Ok(session)
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.peers.get(peer_id).map(|entry| entry.session.clone())
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<PeerSession>> {
        self.peers.values().map(|entry| &entry.session)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub(crate) fn submit(&self, peer_id: &str, command: PeerCommand) -> Result<()> {
        let entry = self
            .peers
            .get(peer_id)
            .ok_or_else(|| CallError::protocol(format!("no session for {peer_id}")))?;
        entry
            .lane
            .commands
            .send(command)
            .map_err(|_| CallError::ChannelClosed)
    }

    /// Cancels in-flight negotiation and closes every session, in insertion order.
    pub async fn close_all(&mut self) {
        for (_, entry) in self.peers.drain(..) {
            entry.lane.task.abort();
            entry.session.close().await;
        }
    }
}

impl Drop for PeerRegistry {
    fn drop(&mut self) {
        for entry in self.peers.values() {
            entry.lane.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LocalTrack, MediaKind};
    use crate::peer::types::{IceCandidate, NegotiationState, RemoteStream};
    use crate::protocol::CommandKind;
    use crate::relay::RelayClient;
    use crate::testing::{MockFactory, TransportCall};
    use std::time::Duration;

    fn registry(factory: Arc<MockFactory>, media: Option<LocalMedia>) -> PeerRegistry {
        let (client, _relay) = RelayClient::in_memory();
        PeerRegistry::new(factory, Outbox::new(client.handle()), EventHub::new(), media)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let factory = MockFactory::new();
        let mut registry = registry(factory.clone(), None);

        let first = registry.get_or_create("B1").await.unwrap();
        let second = registry.get_or_create("B1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.created(), 1);
        assert!(Arc::ptr_eq(&registry.get("B1").unwrap(), &first));
        assert!(registry.get("C1").is_none());
    }

    #[tokio::test]
    async fn iteration_follows_insertion_order() {
        let mut registry = registry(MockFactory::new(), None);
        for id in ["C1", "A1", "B1"] {
            registry.get_or_create(id).await.unwrap();
        }
        let order: Vec<_> = registry.all().map(|s| s.peer_id().to_owned()).collect();
        assert_eq!(order, vec!["C1", "A1", "B1"]);
    }

    #[tokio::test]
    async fn new_sessions_get_local_tracks() {
        let factory = MockFactory::new();
        let media = LocalMedia::new("local")
            .with_track(LocalTrack::detached("mic", MediaKind::Audio))
            .with_track(LocalTrack::detached("cam", MediaKind::Video));
        let mut registry = registry(factory.clone(), Some(media));

        registry.get_or_create("B1").await.unwrap();
        assert_eq!(
            factory.transport("B1").calls(),
            vec![
                TransportCall::AddTrack("mic".into()),
                TransportCall::AddTrack("cam".into())
            ]
        );
    }

    #[tokio::test]
    async fn failed_transport_creation_registers_nothing() {
        let factory = MockFactory::new();
        factory.refuse();
        let mut registry = registry(factory, None);
        assert!(registry.get_or_create("B1").await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_closes_every_session() {
        let factory = MockFactory::new();
        let mut registry = registry(factory.clone(), None);
        let b = registry.get_or_create("B1").await.unwrap();
        let c = registry.get_or_create("C1").await.unwrap();

        registry.close_all().await;

        assert!(registry.is_empty());
        assert_eq!(b.state(), NegotiationState::Closed);
        assert_eq!(c.state(), NegotiationState::Closed);
        assert!(factory.transport("B1").calls().contains(&TransportCall::Close));
    }

    #[tokio::test]
    async fn submit_to_unknown_peer_is_rejected() {
        let registry = registry(MockFactory::new(), None);
        let err = registry.submit("B1", PeerCommand::SendOffer).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn lane_relays_candidates_and_connects_on_first_track() {
        let factory = MockFactory::new();
        let (client, mut relay) = RelayClient::in_memory();
        let outbox = Outbox::new(client.handle());
        outbox.set_local_id("A1");
        let events = EventHub::new();
        let (opened_tx, mut opened) = mpsc::unbounded_channel();
        events.on_remote_open(move |peer| {
            let _ = opened_tx.send(peer.peer_id.clone());
        });
        let mut registry = PeerRegistry::new(factory.clone(), outbox, events, None);
        let session = registry.get_or_create("B1").await.unwrap();

        factory.raise(
            "B1",
            TransportEvent::CandidateGathered(IceCandidate::new(
                "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host",
            )),
        );
        factory.raise(
            "B1",
            TransportEvent::TrackReceived(RemoteStream {
                stream_id: "remote".into(),
                track_id: "cam".into(),
                kind: MediaKind::Video,
            }),
        );

        let sent = tokio::time::timeout(Duration::from_secs(1), relay.next_sent())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.kind(), CommandKind::Candidate);
        assert_eq!(sent.to.as_deref(), Some("B1"));
        assert_eq!(sent.from.as_deref(), Some("A1"));

        let peer = tokio::time::timeout(Duration::from_secs(1), opened.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, "B1");
        assert_eq!(session.state(), NegotiationState::Connected);
    }
}
