use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::peer::types::PeerSnapshot;
use crate::record::Recording;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    RemoteOpen,
    RemoteClosed,
    Error,
    RecordStart,
    RecordData,
    RecordStopped,
    RecordError,
    RecordResume,
    RemoteVideoChangeStatus,
    RemoteAudioChangeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub peer_id: Option<String>,
    pub message: String,
}

impl ErrorReport {
    pub fn call(message: impl ToString) -> Self {
        Self {
            peer_id: None,
            message: message.to_string(),
        }
    }

    pub fn peer(peer_id: &str, message: impl ToString) -> Self {
        Self {
            peer_id: Some(peer_id.to_owned()),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Relay connection is up.
    Open,
    /// Relay connection is gone, either by `close()` or by the relay.
    Close,
    Message(Value),
    RemoteOpen(PeerSnapshot),
    RemoteClosed(PeerSnapshot),
    Error(ErrorReport),
    RecordStart(Arc<Recording>),
    RecordData(Arc<Recording>, Bytes),
    RecordStopped(Arc<Recording>),
    RecordError(Arc<Recording>, String),
    RecordResume(Arc<Recording>),
    RemoteVideoChangeStatus {
        status: bool,
        peer: Option<PeerSnapshot>,
    },
    RemoteAudioChangeStatus {
        status: bool,
        peer: Option<PeerSnapshot>,
    },
}

impl CallEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CallEvent::Open => EventKind::Open,
            CallEvent::Close => EventKind::Close,
            CallEvent::Message(_) => EventKind::Message,
            CallEvent::RemoteOpen(_) => EventKind::RemoteOpen,
            CallEvent::RemoteClosed(_) => EventKind::RemoteClosed,
            CallEvent::Error(_) => EventKind::Error,
            CallEvent::RecordStart(_) => EventKind::RecordStart,
            CallEvent::RecordData(..) => EventKind::RecordData,
            CallEvent::RecordStopped(_) => EventKind::RecordStopped,
            CallEvent::RecordError(..) => EventKind::RecordError,
            CallEvent::RecordResume(_) => EventKind::RecordResume,
            CallEvent::RemoteVideoChangeStatus { .. } => EventKind::RemoteVideoChangeStatus,
            CallEvent::RemoteAudioChangeStatus { .. } => EventKind::RemoteAudioChangeStatus,
        }
    }
}

pub type Handler = Arc<dyn Fn(&CallEvent) + Send + Sync>;

/// One handler slot per [`EventKind`]; registering again replaces the previous handler.
#[derive(Default)]
pub struct EventHub {
    slots: RwLock<HashMap<EventKind, Handler>>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs `handler` for `kind`; returns `true` if it replaced an earlier one.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(&CallEvent) + Send + Sync + 'static,
    {
        self.slots.write().insert(kind, Arc::new(handler)).is_some()
    }

    pub fn clear(&self, kind: EventKind) {
        self.slots.write().remove(&kind);
    }

    pub fn emit(&self, event: CallEvent) {
        let kind = event.kind();
        // cloned out so handlers may re-register without deadlocking
        let handler = self.slots.read().get(&kind).cloned();
        match handler {
            Some(handler) => handler(&event),
            None => trace!(?kind, "no handler, event dropped"),
        }
    }

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on(EventKind::Open, move |_| f());
    }

    pub fn on_close(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on(EventKind::Close, move |_| f());
    }

    pub fn on_message(&self, f: impl Fn(&Value) + Send + Sync + 'static) {
        self.on(EventKind::Message, move |event| {
            if let CallEvent::Message(message) = event {
                f(message)
            }
        });
    }

    pub fn on_remote_open(&self, f: impl Fn(&PeerSnapshot) + Send + Sync + 'static) {
        self.on(EventKind::RemoteOpen, move |event| {
            if let CallEvent::RemoteOpen(peer) = event {
                f(peer)
            }
        });
    }

    pub fn on_remote_closed(&self, f: impl Fn(&PeerSnapshot) + Send + Sync + 'static) {
        self.on(EventKind::RemoteClosed, move |event| {
            if let CallEvent::RemoteClosed(peer) = event {
                f(peer)
            }
        });
    }

    pub fn on_error(&self, f: impl Fn(&ErrorReport) + Send + Sync + 'static) {
        self.on(EventKind::Error, move |event| {
            if let CallEvent::Error(report) = event {
                f(report)
            }
        });
    }

    pub fn on_record_start(&self, f: impl Fn(&Recording) + Send + Sync + 'static) {
        self.on(EventKind::RecordStart, move |event| {
            if let CallEvent::RecordStart(rec) = event {
                f(rec)
            }
        });
    }

    pub fn on_record_data(&self, f: impl Fn(&Recording, &Bytes) + Send + Sync + 'static) {
        self.on(EventKind::RecordData, move |event| {
            if let CallEvent::RecordData(rec, chunk) = event {
                f(rec, chunk)
            }
        });
    }

    pub fn on_record_stopped(&self, f: impl Fn(&Recording) + Send + Sync + 'static) {
        self.on(EventKind::RecordStopped, move |event| {
            if let CallEvent::RecordStopped(rec) = event {
                f(rec)
            }
        });
    }

    pub fn on_record_error(&self, f: impl Fn(&Recording, &str) + Send + Sync + 'static) {
        self.on(EventKind::RecordError, move |event| {
            if let CallEvent::RecordError(rec, reason) = event {
                f(rec, reason)
            }
        });
    }

    pub fn on_record_resume(&self, f: impl Fn(&Recording) + Send + Sync + 'static) {
        self.on(EventKind::RecordResume, move |event| {
            if let CallEvent::RecordResume(rec) = event {
                f(rec)
            }
        });
    }

    pub fn on_remote_video_change_status(
        &self,
        f: impl Fn(bool, Option<&PeerSnapshot>) + Send + Sync + 'static,
    ) {
        self.on(EventKind::RemoteVideoChangeStatus, move |event| {
            if let CallEvent::RemoteVideoChangeStatus { status, peer } = event {
                f(*status, peer.as_ref())
            }
        });
    }

    pub fn on_remote_audio_change_status(
        &self,
        f: impl Fn(bool, Option<&PeerSnapshot>) + Send + Sync + 'static,
    ) {
        self.on(EventKind::RemoteAudioChangeStatus, move |event| {
            if let CallEvent::RemoteAudioChangeStatus { status, peer } = event {
                f(*status, peer.as_ref())
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_without_handler_is_dropped() {
        let hub = EventHub::new();
        hub.emit(CallEvent::Open);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        hub.on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // nothing was queued from before registration
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        hub.emit(CallEvent::Open);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let hub = EventHub::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        assert!(!hub.on(EventKind::Close, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = second.clone();
        assert!(hub.on(EventKind::Close, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        hub.emit(CallEvent::Close);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_handler_receives_payload() {
        let hub = EventHub::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        hub.on_remote_video_change_status(move |status, peer| {
            *sink.lock() = Some((status, peer.map(|p| p.peer_id.clone())));
        });
        hub.emit(CallEvent::RemoteVideoChangeStatus {
            status: false,
            peer: None,
        });
        assert_eq!(*seen.lock(), Some((false, None)));
    }

    #[test]
    fn handler_may_reregister_from_inside_emit() {
        let hub = EventHub::new();
        let inner = hub.clone();
        hub.on_open(move || {
            inner.on_open(|| {});
        });
        hub.emit(CallEvent::Open);
    }
}
