use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::events::{CallEvent, ErrorReport, EventHub};
use crate::logger::dump_candidate;
use crate::peer::ice::{apply_pending_candidates, CandidateBuffer, DrainReport};
use crate::peer::transport::{ConnectionState, MediaTransport, TransportEvent};
use crate::peer::types::{
    IceCandidate, NegotiationState, PeerSnapshot, RemoteStream, SessionDescription,
};
use crate::protocol::Command;
use crate::relay::Outbox;

/// Work queued on a peer's lane, executed one at a time.
#[derive(Debug, Clone)]
pub(crate) enum PeerCommand {
    SendOffer,
    RemoteOffer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Answered,
    /// Glare, and our own offer wins the tie-break.
    Ignored,
}

struct SessionState {
    negotiation: NegotiationState,
    candidates: CandidateBuffer,
    stream: Option<RemoteStream>,
}

/// Negotiation state and transport of one remote participant.
pub struct PeerSession {
    peer_id: String,
    identifier: RwLock<Option<String>>,
    state: Mutex<SessionState>,
    transport: Arc<dyn MediaTransport>,
    outbox: Outbox,
    events: Arc<EventHub>,
}

impl PeerSession {
    pub(crate) fn new(
        peer_id: impl Into<String>,
        transport: Arc<dyn MediaTransport>,
        outbox: Outbox,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            identifier: RwLock::new(None),
            state: Mutex::new(SessionState {
                negotiation: NegotiationState::Begin,
                candidates: CandidateBuffer::new(),
                stream: None,
            }),
            transport,
            outbox,
            events,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn identifier(&self) -> Option<String> {
        self.identifier.read().clone()
    }

    pub fn set_identifier(&self, identifier: impl Into<String>) {
        *self.identifier.write() = Some(identifier.into());
    }

    pub fn state(&self) -> NegotiationState {
        self.state.lock().negotiation
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.state.lock().stream.clone()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.state.lock().candidates.len()
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let identifier = self.identifier();
        let state = self.state.lock();
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            identifier,
            state: state.negotiation,
            stream: state.stream.clone(),
        }
    }

    fn require(&self, operation: &'static str, allowed: NegotiationState) -> Result<()> {
        let state = self.state();
        if state == allowed {
            Ok(())
        } else {
            Err(CallError::InvalidState {
                peer_id: self.peer_id.clone(),
                operation,
                state,
            })
        }
    }

    /// Moves `from → to` unless something else (a track, a teardown) moved the session first.
    fn advance(&self, from: NegotiationState, to: NegotiationState) {
        let mut state = self.state.lock();
        if state.negotiation == from {
            debug!(peer_id = %self.peer_id, ?from, ?to, "negotiation state");
            state.negotiation = to;
        }
    }

    pub async fn create_and_send_offer(&self) -> Result<()> {
        self.require("create offer", NegotiationState::Begin)?;
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.outbox
            .send_to(Command::Offer { sdp: offer }, &self.peer_id)?;
        info!(peer_id = %self.peer_id, "offer sent");
        self.advance(NegotiationState::Begin, NegotiationState::Offering);
        Ok(())
    }

    pub async fn apply_remote_offer_and_answer(&self, sdp: SessionDescription) -> Result<()> {
        self.require("answer offer", NegotiationState::Begin)?;
        self.answer(sdp, NegotiationState::Begin).await
    }

    /// Remote offer from any state: answers from `Begin`, resolves glare from `Offering`
    /// (the smaller session id keeps its offer), rejects otherwise.
    pub async fn accept_remote_offer(&self, sdp: SessionDescription) -> Result<OfferOutcome> {
        match self.state() {
            NegotiationState::Begin => {
                self.answer(sdp, NegotiationState::Begin).await?;
                Ok(OfferOutcome::Answered)
            }
            NegotiationState::Offering => {
                let keep_ours = matches!(
                    self.outbox.local_id(),
                    Some(local) if local.as_str() < self.peer_id.as_str()
                );
                if keep_ours {
                    info!(peer_id = %self.peer_id, "glare: keeping local offer");
                    return Ok(OfferOutcome::Ignored);
                }
                info!(peer_id = %self.peer_id, "glare: rolling back local offer");
                self.transport.rollback().await?;
                self.answer(sdp, NegotiationState::Offering).await?;
                Ok(OfferOutcome::Answered)
            }
            state => Err(CallError::InvalidState {
                peer_id: self.peer_id.clone(),
                operation: "answer offer",
                state,
            }),
        }
    }

    async fn answer(&self, sdp: SessionDescription, from: NegotiationState) -> Result<()> {
        self.apply_remote(sdp).await?;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.outbox
            .send_to(Command::Answer { sdp: answer }, &self.peer_id)?;
        info!(peer_id = %self.peer_id, "answer sent");
        self.advance(from, NegotiationState::Answering);
        Ok(())
    }

    pub async fn apply_remote_answer(&self, sdp: SessionDescription) -> Result<DrainReport> {
        self.require("apply answer", NegotiationState::Offering)?;
        let report = self.apply_remote(sdp).await?;
        info!(peer_id = %self.peer_id, "answer applied");
        Ok(report)
    }

    /// Sets the remote description, then flushes the candidate buffer.
    async fn apply_remote(&self, sdp: SessionDescription) -> Result<DrainReport> {
        self.transport.set_remote_description(sdp).await?;
        let pending = self.state.lock().candidates.take();
        if !pending.is_empty() {
            debug!(peer_id = %self.peer_id, count = pending.len(), "draining candidate buffer");
        }
        let report = apply_pending_candidates(
            self.transport.as_ref(),
            &self.peer_id,
            pending,
            |candidate, err| {
                self.events.emit(CallEvent::Error(ErrorReport::peer(
                    &self.peer_id,
                    format!("candidate {}: {err}", candidate.candidate),
                )))
            },
        )
        .await;
        Ok(report)
    }

    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<CandidateOutcome> {
        dump_candidate("REMOTE", &self.peer_id, &candidate);
        let ready = self.state.lock().candidates.defer(candidate);
        match ready {
            Some(candidate) => {
                self.transport.add_ice_candidate(candidate).await?;
                Ok(CandidateOutcome::Applied)
            }
            None => {
                debug!(peer_id = %self.peer_id, "remote description not set yet, queuing candidate");
                Ok(CandidateOutcome::Deferred)
            }
        }
    }

    /// First inbound track connects the session; later ones are ignored.
    pub fn on_remote_track_observed(&self, stream: RemoteStream) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(
                state.negotiation,
                NegotiationState::Connected | NegotiationState::Closed
            ) {
                return false;
            }
            state.stream = Some(stream);
            state.negotiation = NegotiationState::Connected;
        }
        info!(peer_id = %self.peer_id, "remote media open");
        self.events.emit(CallEvent::RemoteOpen(self.snapshot()));
        true
    }

    pub fn on_transport_disconnected(&self) {
        info!(peer_id = %self.peer_id, "transport disconnected");
        self.events.emit(CallEvent::RemoteClosed(self.snapshot()));
    }

    pub fn on_candidate_gathered(&self, candidate: IceCandidate) -> Result<()> {
        dump_candidate("LOCAL", &self.peer_id, &candidate);
        self.outbox
            .send_to(Command::Candidate { ice: candidate }, &self.peer_id)
    }

    /// Tears down the transport and tells the peer; idempotent.
    pub async fn close(&self) {
        let previous = std::mem::replace(
            &mut self.state.lock().negotiation,
            NegotiationState::Closed,
        );
        if previous == NegotiationState::Closed {
            return;
        }
        if let Err(err) = self.transport.close().await {
            warn!(peer_id = %self.peer_id, error = %err, "transport close failed");
        }
        if let Err(err) = self.outbox.send_to(Command::Closed, &self.peer_id) {
            warn!(peer_id = %self.peer_id, error = %err, "closed notice not sent");
        }
        info!(peer_id = %self.peer_id, ?previous, "peer session closed");
    }

    pub(crate) async fn execute(&self, command: PeerCommand) {
        let result = match command {
            PeerCommand::SendOffer => self.create_and_send_offer().await,
            PeerCommand::RemoteOffer(sdp) => self.accept_remote_offer(sdp).await.map(|_| ()),
            PeerCommand::RemoteAnswer(sdp) => self.apply_remote_answer(sdp).await.map(|_| ()),
            PeerCommand::RemoteCandidate(candidate) => {
                self.add_remote_candidate(candidate).await.map(|_| ())
            }
        };
        if let Err(err) = result {
            self.report(err);
        }
    }

    pub(crate) fn observe(&self, event: TransportEvent) {
        match event {
            TransportEvent::CandidateGathered(candidate) => {
                if let Err(err) = self.on_candidate_gathered(candidate) {
                    self.report(err);
                }
            }
            TransportEvent::TrackReceived(stream) => {
                self.on_remote_track_observed(stream);
            }
            TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected) => {
                self.on_transport_disconnected();
            }
            TransportEvent::ConnectionStateChanged(state) => {
                debug!(peer_id = %self.peer_id, ?state, "transport state");
            }
        }
    }

    fn report(&self, err: CallError) {
        if err.is_protocol_violation() {
            warn!(peer_id = %self.peer_id, error = %err, "rejected out-of-protocol message");
            return;
        }
        warn!(peer_id = %self.peer_id, error = %err, "negotiation failed");
        self.events
            .emit(CallEvent::Error(ErrorReport::peer(&self.peer_id, err)));
    }
}
