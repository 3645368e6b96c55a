use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallOptions;
use crate::error::Result;
use crate::events::{CallEvent, ErrorReport, EventHub};
use crate::media::{LocalMedia, MediaKind};
use crate::peer::connection::RtcTransportFactory;
use crate::peer::registry::PeerRegistry;
use crate::peer::transport::TransportFactory;
use crate::peer::types::PeerSnapshot;
use crate::protocol::Command;
use crate::record::{RecorderFactory, Recording, Recordings};
use crate::relay::{Outbox, RelayClient, RelayEvent};
use crate::signaling::Dispatcher;
use crate::utils::random_id;

pub struct CallBuilder {
    options: CallOptions,
    media: Option<LocalMedia>,
    recorder: Option<Arc<dyn RecorderFactory>>,
    events: Arc<EventHub>,
}

impl CallBuilder {
    pub fn new(options: CallOptions) -> Self {
        Self {
            options,
            media: None,
            recorder: None,
            events: EventHub::new(),
        }
    }

    pub fn local_media(mut self, media: LocalMedia) -> Self {
        self.media = Some(media);
        self
    }

    pub fn recorder(mut self, factory: Arc<dyn RecorderFactory>) -> Self {
        self.recorder = Some(factory);
        self
    }

    /// Handlers registered here see the Open event fired during start-up.
    pub fn events(&self) -> Arc<EventHub> {
        self.events.clone()
    }

    /// Connects to the configured relay and joins the room over webrtc-rs transports.
    pub async fn connect(self) -> Result<Call> {
        self.options.validate()?;
        let transports = Arc::new(RtcTransportFactory::new(&self.options.ice_servers)?);
        let relay = RelayClient::connect(&self.options.signaling_url).await?;
        self.start(relay, transports)
    }

    /// Joins the room over an already connected relay.
    pub fn start(self, relay: RelayClient, transports: Arc<dyn TransportFactory>) -> Result<Call> {
        self.options.validate()?;
        let CallBuilder {
            options,
            media,
            recorder,
            events,
        } = self;
        let identifier = options.identifier.clone().unwrap_or_else(random_id);

        let (handle, relay_events, relay_tasks) = relay.into_parts();
        let outbox = Outbox::new(handle);
        let registry = PeerRegistry::new(transports, outbox.clone(), events.clone(), media.clone());
        let dispatcher = Dispatcher::new(registry, outbox.clone(), events.clone(), &identifier);
        let recordings = Recordings::new(recorder, media.clone(), events.clone());
        let close_fired = Arc::new(AtomicBool::new(false));

        events.emit(CallEvent::Open);
        outbox.broadcast(Command::Begin {
            room_id: Some(options.room_id.clone()),
            connection_id: None,
        })?;
        info!(room_id = %options.room_id, %identifier, "joining room");

        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(
            dispatcher,
            relay_events,
            control_rx,
            events.clone(),
            close_fired.clone(),
        ));

        Ok(Call {
            identifier,
            outbox,
            events,
            media,
            recordings,
            control,
            close_fired,
            shut_down: AtomicBool::new(false),
            task,
            relay_tasks,
        })
    }
}

enum Control {
    Peers(oneshot::Sender<Vec<PeerSnapshot>>),
    Close(oneshot::Sender<()>),
}

fn fire_close(events: &EventHub, fired: &AtomicBool) {
    if !fired.swap(true, Ordering::SeqCst) {
        info!("call closed");
        events.emit(CallEvent::Close);
    }
}

async fn run(
    mut dispatcher: Dispatcher,
    mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
    events: Arc<EventHub>,
    close_fired: Arc<AtomicBool>,
) {
    let mut relay_open = true;
    loop {
        tokio::select! {
            event = relay_events.recv(), if relay_open => match event {
                Some(RelayEvent::Message(message)) => dispatcher.dispatch(message).await,
                Some(RelayEvent::Error(reason)) => {
                    warn!(%reason, "relay error");
                    events.emit(CallEvent::Error(ErrorReport::call(reason)));
                }
                Some(RelayEvent::Closed) | None => {
                    relay_open = false;
                    fire_close(&events, &close_fired);
                }
            },
            request = control.recv() => match request {
                Some(Control::Peers(reply)) => {
                    let _ = reply.send(dispatcher.snapshots());
                }
                Some(Control::Close(reply)) => {
                    dispatcher.close_all().await;
                    let _ = reply.send(());
                    break;
                }
                None => break,
            },
        }
    }
    debug!("dispatcher finished");
}

/// A joined room.
pub struct Call {
    identifier: String,
    outbox: Outbox,
    events: Arc<EventHub>,
    media: Option<LocalMedia>,
    recordings: Recordings,
    control: mpsc::UnboundedSender<Control>,
    close_fired: Arc<AtomicBool>,
    shut_down: AtomicBool,
    task: JoinHandle<()>,
    relay_tasks: Vec<JoinHandle<()>>,
}

impl Call {
    pub fn builder(options: CallOptions) -> CallBuilder {
        CallBuilder::new(options)
    }

    /// Display identifier announced to peers.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Session id assigned by the relay, once the Begin ack arrived.
    pub fn local_id(&self) -> Option<String> {
        self.outbox.local_id()
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub async fn peers(&self) -> Vec<PeerSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Peers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Sends an application payload to one peer, or to the whole room when `to` is `None`.
    pub fn send_message(&self, message: Value, to: Option<&str>) -> Result<()> {
        self.outbox.send(Command::Message { message }, to)
    }

    pub fn video_enable(&self, status: bool) -> Result<()> {
        self.toggle(MediaKind::Video, status)
    }

    pub fn audio_enable(&self, status: bool) -> Result<()> {
        self.toggle(MediaKind::Audio, status)
    }

    fn toggle(&self, kind: MediaKind, status: bool) -> Result<()> {
        let changed = self
            .media
            .as_ref()
            .map_or(0, |media| media.set_enabled(kind, status));
        if changed == 0 {
            debug!(?kind, "no local track to toggle");
            return Ok(());
        }
        let command = match kind {
            MediaKind::Video => Command::VideoEnable { status },
            MediaKind::Audio => Command::AudioEnable { status },
        };
        self.outbox.broadcast(command)
    }

    pub fn record_start(&self, timeslice: Option<Duration>) -> Result<Arc<Recording>> {
        self.recordings.start(&self.identifier, timeslice)
    }

    /// Stops every recording, or only those owned by `identifier`.
    pub fn record_stop(&self, identifier: Option<&str>) -> usize {
        self.recordings.stop(identifier)
    }

    /// Closes every peer session, releases local media and leaves the relay. Only the first
    /// call does anything.
    pub async fn close(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Close(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(media) = &self.media {
            let stopped = media.stop_all();
            debug!(stopped, "local tracks stopped");
        }
        self.recordings.stop(None);
        self.outbox.close();
        fire_close(&self.events, &self.close_fired);
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        self.task.abort();
        for task in &self.relay_tasks {
            task.abort();
        }
    }
}
