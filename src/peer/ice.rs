use tracing::{debug, warn};

use crate::error::CallError;
use crate::peer::transport::MediaTransport;
use crate::peer::types::IceCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateKind {
    pub fn of(candidate: &IceCandidate) -> Self {
        let mut fields = candidate.candidate.split_whitespace();
        while let Some(field) = fields.next() {
            if field == "typ" {
                return match fields.next() {
                    Some("host") => CandidateKind::Host,
                    Some("srflx") => CandidateKind::ServerReflexive,
                    Some("prflx") => CandidateKind::PeerReflexive,
                    Some("relay") => CandidateKind::Relay,
                    _ => CandidateKind::Unknown,
                };
            }
        }
        CandidateKind::Unknown
    }
}

/// Remote candidates that arrived before the remote description.
///
/// Drained once, right after the remote description is applied; afterwards every
/// candidate bypasses the buffer.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `candidate` for later, or hands it back if it can be applied now.
    pub fn defer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.drained {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Empties the buffer for good, returning what it held in arrival order.
    pub fn take(&mut self) -> Vec<IceCandidate> {
        self.drained = true;
        std::mem::take(&mut self.pending)
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[IceCandidate] {
        &self.pending
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
}

/// Applies buffered candidates in order. A failing candidate is reported through
/// `on_failure` and the rest are still applied.
pub async fn apply_pending_candidates<F>(
    transport: &dyn MediaTransport,
    peer_id: &str,
    pending: Vec<IceCandidate>,
    mut on_failure: F,
) -> DrainReport
where
    F: FnMut(&IceCandidate, &CallError),
{
    let mut report = DrainReport::default();
    for candidate in pending {
        debug!(peer_id, kind = ?CandidateKind::of(&candidate), "applying pending candidate");
        match transport.add_ice_candidate(candidate.clone()).await {
            Ok(()) => report.applied += 1,
            Err(err) => {
                warn!(peer_id, error = %err, "failed to apply pending candidate");
                on_failure(&candidate, &err);
                report.failed += 1;
            }
        }
    }
    report
}
