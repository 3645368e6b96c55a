use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{CallError, Result};
use crate::media::LocalTrack;
use crate::peer::transport::{MediaTransport, TransportEvent, TransportFactory};
use crate::peer::types::{IceCandidate, SdpType, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    AddTrack(String),
    Rollback,
    Close,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    fail_offer: AtomicBool,
    fail_remote: AtomicBool,
    failing_candidates: Mutex<HashSet<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_create_offer(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_set_remote(&self, fail: bool) {
        self.fail_remote.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_candidate(&self, candidate: &str) {
        self.failing_candidates.lock().insert(candidate.to_owned());
    }

    pub(crate) fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    /// An offer was set locally and nothing has settled or discarded it since.
    fn has_local_offer(&self) -> bool {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|call| match call {
                TransportCall::SetLocal(SdpType::Offer) => Some(true),
                TransportCall::SetLocal(_)
                | TransportCall::SetRemote(SdpType::Answer)
                | TransportCall::Rollback => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer);
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(CallError::Transport("offer refused".into()));
        }
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer);
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(TransportCall::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(TransportCall::SetRemote(desc.sdp_type));
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(CallError::Transport("bad remote description".into()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let failing = self.failing_candidates.lock().contains(&candidate.candidate);
        self.record(TransportCall::AddCandidate(candidate.candidate));
        if failing {
            return Err(CallError::Transport("candidate rejected".into()));
        }
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.record(TransportCall::AddTrack(track.id().to_owned()));
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let pending = self.has_local_offer();
        self.record(TransportCall::Rollback);
        if !pending {
            return Err(CallError::Transport("no local offer to roll back".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(TransportCall::Close);
        Ok(())
    }
}

/// Hands out one [`MockTransport`] per peer and keeps its event sender.
#[derive(Default)]
pub(crate) struct MockFactory {
    peers: Mutex<HashMap<String, (Arc<MockTransport>, mpsc::UnboundedSender<TransportEvent>)>>,
    created: AtomicUsize,
    refuse: AtomicBool,
}

impl MockFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn transport(&self, peer_id: &str) -> Arc<MockTransport> {
        self.peers
            .lock()
            .get(peer_id)
            .map(|(t, _)| t.clone())
            .expect("no transport for peer")
    }

    pub(crate) fn raise(&self, peer_id: &str, event: TransportEvent) {
        let tx = self
            .peers
            .lock()
            .get(peer_id)
            .map(|(_, tx)| tx.clone())
            .expect("no transport for peer");
        tx.send(event).expect("lane gone");
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        peer_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CallError::Transport("no more connections".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let transport = MockTransport::new();
        self.peers
            .lock()
            .insert(peer_id.to_owned(), (transport.clone(), events));
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rollback_needs_a_pending_local_offer() {
        let transport = MockTransport::new();
        assert!(transport.rollback().await.is_err());

        transport
            .set_local_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        assert!(transport.rollback().await.is_ok());
        assert!(transport.rollback().await.is_err());

        transport
            .set_local_description(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        transport
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert!(transport.rollback().await.is_err());
    }
}
