#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use vcall::media::LocalTrack;
use vcall::peer::types::SdpType;
use vcall::relay::RelayInjector;
use vcall::{
    Call, CallError, Command, ControlMessage, IceCandidate, LocalMedia, MediaKind,
    MediaTransport, RelayClient, RemoteStream, Result, SessionDescription, TransportEvent,
    TransportFactory,
};

/// Routes frames the way the signaling server does: Begin is answered with a fresh session
/// id, directed frames go to one member, broadcasts to everyone else in the room.
#[derive(Clone, Default)]
pub struct Room {
    members: Arc<Mutex<Vec<(String, RelayInjector)>>>,
    joined: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<ControlMessage>>>,
    closed: Arc<Mutex<Vec<(String, Arc<AtomicBool>)>>>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay connection for the next endpoint, and the session id it will be given.
    pub fn join(&self) -> (RelayClient, String) {
        let n = self.joined.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}1", (b'A' + n as u8) as char);
        let (client, mut relay) = RelayClient::in_memory();
        self.closed.lock().push((id.clone(), relay.closed_flag()));

        let room = self.clone();
        let member = id.clone();
        tokio::spawn(async move {
            while let Some(message) = relay.next_sent().await {
                room.log.lock().push(message.clone());
                if let Command::Begin { .. } = message.command {
                    room.members.lock().push((member.clone(), relay.injector()));
                    relay.deliver(ControlMessage::new(Command::Begin {
                        room_id: None,
                        connection_id: Some(member.clone()),
                    }));
                    continue;
                }
                room.route(&member, message);
            }
        });
        (client, id)
    }

    fn route(&self, sender: &str, message: ControlMessage) {
        let members = self.members.lock();
        match message.to.as_deref() {
            Some(to) => {
                if let Some((_, inbox)) = members.iter().find(|(id, _)| id == to) {
                    inbox.deliver(message.clone());
                }
            }
            None => {
                for (_, inbox) in members.iter().filter(|(id, _)| id != sender) {
                    inbox.deliver(message.clone());
                }
            }
        }
    }

    pub fn sent_by(&self, sender: &str) -> Vec<ControlMessage> {
        self.log
            .lock()
            .iter()
            .filter(|m| m.from.as_deref() == Some(sender))
            .cloned()
            .collect()
    }

    pub fn relay_closed(&self, id: &str) -> bool {
        self.closed
            .lock()
            .iter()
            .any(|(member, flag)| member == id && flag.load(Ordering::SeqCst))
    }
}

/// Transport that gathers one host candidate per local description and "receives" remote
/// media once the answer is in place on either side.
pub struct LoopbackTransport {
    peer_id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    candidates: Mutex<Vec<String>>,
    local_offer: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn track_received(&self) {
        let _ = self.events.send(TransportEvent::TrackReceived(RemoteStream {
            stream_id: format!("stream-{}", self.peer_id),
            track_id: "cam".into(),
            kind: MediaKind::Video,
        }));
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("v=0 offer to {}", self.peer_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("v=0 answer to {}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let _ = self.events.send(TransportEvent::CandidateGathered(IceCandidate::new(
            "candidate:1 1 udp 2122260223 192.0.2.10 50000 typ host",
        )));
        self.local_offer
            .store(desc.sdp_type == SdpType::Offer, Ordering::SeqCst);
        if desc.sdp_type == SdpType::Answer {
            self.track_received();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp_type == SdpType::Answer {
            self.local_offer.store(false, Ordering::SeqCst);
            self.track_received();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate.candidate);
        Ok(())
    }

    async fn add_track(&self, _track: Arc<LocalTrack>) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.local_offer.swap(false, Ordering::SeqCst) {
            return Err(CallError::Transport("no local offer to roll back".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct LoopbackFactory {
    transports: Mutex<Vec<(String, Arc<LoopbackTransport>)>>,
}

impl LoopbackFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(&self, peer_id: &str) -> Option<Arc<LoopbackTransport>> {
        self.transports
            .lock()
            .iter()
            .find(|(id, _)| id == peer_id)
            .map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>> {
        let transport = Arc::new(LoopbackTransport {
            peer_id: peer_id.to_owned(),
            events,
            candidates: Mutex::new(Vec::new()),
            local_offer: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.transports
            .lock()
            .push((peer_id.to_owned(), transport.clone()));
        Ok(transport)
    }
}

pub fn camera_and_mic() -> LocalMedia {
    LocalMedia::new("local")
        .with_track(LocalTrack::detached("mic", MediaKind::Audio))
        .with_track(LocalTrack::detached("cam", MediaKind::Video))
}

/// Waits until the relay assigned the call its session id.
pub async fn joined(call: &Call) -> String {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(id) = call.local_id() {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("never joined")
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}
