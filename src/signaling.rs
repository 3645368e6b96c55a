use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::events::{CallEvent, ErrorReport, EventHub};
use crate::peer::registry::PeerRegistry;
use crate::peer::state::PeerCommand;
use crate::peer::types::PeerSnapshot;
use crate::protocol::{Command, CommandKind, ControlMessage};
use crate::relay::Outbox;

/// Routes inbound control messages; negotiation is handed to the peer's lane.
pub struct Dispatcher {
    registry: PeerRegistry,
    outbox: Outbox,
    events: Arc<EventHub>,
    identifier: String,
}

impl Dispatcher {
    pub fn new(
        registry: PeerRegistry,
        outbox: Outbox,
        events: Arc<EventHub>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            outbox,
            events,
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.registry.all().map(|session| session.snapshot()).collect()
    }

    pub async fn close_all(&mut self) {
        self.registry.close_all().await;
    }

    /// Handles one inbound message. Failures stay here: they are logged, and reported through
    /// the Error event unless the message was simply out of protocol.
    pub async fn dispatch(&mut self, message: ControlMessage) {
        let kind = message.kind();
        let from = message.from.clone();
        debug!(command = ?kind, from = ?from, to = ?message.to, "ws_recv");
        if let Err(err) = self.handle(message).await {
            if err.is_protocol_violation() {
                warn!(command = ?kind, from = ?from, error = %err, "rejected control message");
                return;
            }
            warn!(command = ?kind, from = ?from, error = %err, "control message failed");
            let report = match from {
                Some(peer_id) => ErrorReport::peer(&peer_id, err),
                None => ErrorReport::call(err),
            };
            self.events.emit(CallEvent::Error(report));
        }
    }

    async fn handle(&mut self, message: ControlMessage) -> Result<()> {
        let ControlMessage { from, command, .. } = message;
        let kind = command.kind();
        match command {
            Command::Begin { connection_id, .. } => {
                let id = connection_id
                    .ok_or_else(|| CallError::protocol("begin ack without connectionId"))?;
                info!(local_id = %id, "joined room");
                self.outbox.set_local_id(id);
                self.outbox.broadcast(Command::Request)
            }
            Command::Request => {
                let Some(peer_id) = self.remote_sender(from, kind)? else {
                    return Ok(());
                };
                self.registry.get_or_create(&peer_id).await?;
                self.send_identifier(&peer_id)?;
                self.registry.submit(&peer_id, PeerCommand::SendOffer)
            }
            Command::Offer { sdp } => {
                let Some(peer_id) = self.remote_sender(from, kind)? else {
                    return Ok(());
                };
                self.send_identifier(&peer_id)?;
                self.registry.get_or_create(&peer_id).await?;
                self.registry.submit(&peer_id, PeerCommand::RemoteOffer(sdp))
            }
            Command::Answer { sdp } => {
                let peer_id = sender(from, kind)?;
                if self.registry.get(&peer_id).is_none() {
                    return Err(CallError::protocol(format!(
                        "answer from {peer_id} without a session"
                    )));
                }
                self.registry.submit(&peer_id, PeerCommand::RemoteAnswer(sdp))
            }
            Command::Candidate { ice } => {
                let Some(peer_id) = self.remote_sender(from, kind)? else {
                    return Ok(());
                };
                self.registry.get_or_create(&peer_id).await?;
                self.registry.submit(&peer_id, PeerCommand::RemoteCandidate(ice))
            }
            Command::Identifier { identifier } => {
                let Some(peer_id) = self.remote_sender(from, kind)? else {
                    return Ok(());
                };
                let session = self.registry.get_or_create(&peer_id).await?;
                debug!(peer_id = %peer_id, %identifier, "peer identified");
                session.set_identifier(identifier);
                Ok(())
            }
            Command::Closed => {
                let peer_id = sender(from, kind)?;
                match self.registry.get(&peer_id) {
                    Some(session) => {
                        info!(peer_id = %peer_id, "peer left");
                        self.events.emit(CallEvent::RemoteClosed(session.snapshot()));
                    }
                    None => debug!(peer_id = %peer_id, "closed notice for unknown peer"),
                }
                Ok(())
            }
            Command::Message { message } => {
                self.events.emit(CallEvent::Message(message));
                Ok(())
            }
            Command::VideoEnable { status } => {
                let peer = self.known_peer(from.as_deref());
                self.events
                    .emit(CallEvent::RemoteVideoChangeStatus { status, peer });
                Ok(())
            }
            Command::AudioEnable { status } => {
                let peer = self.known_peer(from.as_deref());
                self.events
                    .emit(CallEvent::RemoteAudioChangeStatus { status, peer });
                Ok(())
            }
        }
    }

    /// Sender of a peer-addressed command; `None` when the relay echoed our own frame.
    fn remote_sender(&self, from: Option<String>, kind: CommandKind) -> Result<Option<String>> {
        let peer_id = sender(from, kind)?;
        if self.outbox.is_self(&peer_id) {
            debug!(command = ?kind, "ignoring own frame");
            return Ok(None);
        }
        Ok(Some(peer_id))
    }

    fn known_peer(&self, from: Option<&str>) -> Option<PeerSnapshot> {
        from.and_then(|peer_id| self.registry.get(peer_id))
            .map(|session| session.snapshot())
    }

    fn send_identifier(&self, peer_id: &str) -> Result<()> {
        self.outbox.send_to(
            Command::Identifier {
                identifier: self.identifier.clone(),
            },
            peer_id,
        )
    }
}

fn sender(from: Option<String>, kind: CommandKind) -> Result<String> {
    from.ok_or_else(|| CallError::protocol(format!("{kind:?} without sender")))
}
