use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use tracing::{debug, trace, warn};

use crate::error::{CallError, Result};
use crate::protocol::{Command, ControlMessage};

#[derive(Debug)]
pub enum RelayEvent {
    Message(ControlMessage),
    Error(String),
    Closed,
}

#[derive(Debug)]
enum Outgoing {
    Frame(ControlMessage),
    Close,
}

/// Sending half of a relay connection.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl RelayHandle {
    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.tx
            .send(Outgoing::Frame(message))
            .map_err(|_| CallError::ChannelClosed)
    }

    /// Queues a close frame behind everything already sent.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// Websocket to the signaling relay. No reconnection: a dropped socket ends with
/// `RelayEvent::Closed`.
pub struct RelayClient {
    handle: RelayHandle,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|err| CallError::RelayConnect(err.to_string()))?;
        debug!(url = %url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RelayEvent>();

        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                match outgoing {
                    Outgoing::Frame(message) => {
                        let text = match message.encode() {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(error = %err, "dropping unencodable frame");
                                continue;
                            }
                        };
                        trace!(kind = ?message.kind(), len = text.len(), "ws_out");
                        if let Err(err) = ws_write.send(Message::Text(text)).await {
                            let _ = writer_events.send(RelayEvent::Error(err.to_string()));
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(message) => match frame_text(message) {
                        Some(text) => text,
                        None => continue,
                    },
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!("relay websocket closed: {err}");
                            }
                            _ => {
                                warn!("relay websocket error: {err}");
                                let _ = event_tx.send(RelayEvent::Error(err.to_string()));
                            }
                        }
                        break;
                    }
                };
                trace!(len = text.len(), "ws_in");
                match ControlMessage::decode(&text) {
                    Ok(message) => {
                        if event_tx.send(RelayEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "undecodable relay frame"),
                }
            }
            let _ = event_tx.send(RelayEvent::Closed);
        });

        Ok(Self {
            handle: RelayHandle { tx: out_tx },
            events: event_rx,
            tasks: vec![writer, reader],
        })
    }

    /// Relay backed by in-process channels instead of a socket.
    pub fn in_memory() -> (Self, MemoryRelay) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Self {
            handle: RelayHandle { tx: out_tx },
            events: event_rx,
            tasks: Vec::new(),
        };
        let remote = MemoryRelay {
            sent: out_rx,
            inject: RelayInjector { tx: event_tx },
            closed: Arc::new(AtomicBool::new(false)),
        };
        (client, remote)
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn into_parts(self) -> (RelayHandle, mpsc::UnboundedReceiver<RelayEvent>, Vec<JoinHandle<()>>) {
        (self.handle, self.events, self.tasks)
    }
}

/// Far side of [`RelayClient::in_memory`]: sees what the client sent and feeds it events.
pub struct MemoryRelay {
    sent: mpsc::UnboundedReceiver<Outgoing>,
    inject: RelayInjector,
    closed: Arc<AtomicBool>,
}

impl MemoryRelay {
    /// Next frame the client sent; close requests are recorded and skipped.
    pub async fn next_sent(&mut self) -> Option<ControlMessage> {
        loop {
            match self.sent.recv().await? {
                Outgoing::Frame(message) => return Some(message),
                Outgoing::Close => self.closed.store(true, Ordering::SeqCst),
            }
        }
    }

    pub fn try_next_sent(&mut self) -> Option<ControlMessage> {
        loop {
            match self.sent.try_recv().ok()? {
                Outgoing::Frame(message) => return Some(message),
                Outgoing::Close => self.closed.store(true, Ordering::SeqCst),
            }
        }
    }

    pub fn injector(&self) -> RelayInjector {
        self.inject.clone()
    }

    pub fn deliver(&self, message: ControlMessage) {
        self.inject.deliver(message);
    }

    /// Shared flag, set once the client asked to close.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RelayInjector {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayInjector {
    pub fn deliver(&self, message: ControlMessage) {
        let _ = self.tx.send(RelayEvent::Message(message));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(RelayEvent::Error(reason.into()));
    }

    pub fn hang_up(&self) {
        let _ = self.tx.send(RelayEvent::Closed);
    }
}

/// Stamps and sends frames; the single addressing rule for every command kind.
#[derive(Clone)]
pub struct Outbox {
    relay: RelayHandle,
    local_id: Arc<RwLock<Option<String>>>,
}

impl Outbox {
    pub fn new(relay: RelayHandle) -> Self {
        Self {
            relay,
            local_id: Arc::new(RwLock::new(None)),
        }
    }

    pub fn local_id(&self) -> Option<String> {
        self.local_id.read().clone()
    }

    pub fn set_local_id(&self, id: impl Into<String>) {
        *self.local_id.write() = Some(id.into());
    }

    pub fn is_self(&self, peer_id: &str) -> bool {
        self.local_id.read().as_deref() == Some(peer_id)
    }

    pub fn send(&self, command: Command, to: Option<&str>) -> Result<()> {
        let message = ControlMessage {
            from: self.local_id(),
            to: to.map(str::to_owned),
            command,
        };
        self.relay.send(message)
    }

    pub fn send_to(&self, command: Command, peer_id: &str) -> Result<()> {
        self.send(command, Some(peer_id))
    }

    pub fn broadcast(&self, command: Command) -> Result<()> {
        self.send(command, None)
    }

    pub fn close(&self) {
        self.relay.close();
    }
}

/// Payload of a data frame; binary frames are accepted when they hold UTF-8.
fn frame_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(error = %err, "dropping non-utf8 binary relay frame");
                None
            }
        },
        _ => None,
    }
}
