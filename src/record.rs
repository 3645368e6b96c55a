use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::events::{CallEvent, EventHub};
use crate::media::LocalMedia;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Data(Bytes),
    Stopped,
    Error(String),
    Resumed,
}

pub trait MediaRecorder: Send + Sync {
    /// Starts capturing; with a timeslice, chunks are emitted at that interval.
    fn start(&self, timeslice: Option<Duration>) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        media: &LocalMedia,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Result<Box<dyn MediaRecorder>>;
}

/// One recording session and the chunks captured so far.
pub struct Recording {
    owner: String,
    started_at: DateTime<Local>,
    recorder: Box<dyn MediaRecorder>,
    buffer: Mutex<Vec<Bytes>>,
}

impl Recording {
    fn new(owner: impl Into<String>, recorder: Box<dyn MediaRecorder>) -> Self {
        Self {
            owner: owner.into(),
            started_at: Local::now(),
            recorder,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.buffer.lock().clone()
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.lock().iter().map(Bytes::len).sum()
    }

    fn append(&self, chunk: Bytes) {
        self.buffer.lock().push(chunk);
    }
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("owner", &self.owner)
            .field("started_at", &self.started_at)
            .field("chunks", &self.buffer.lock().len())
            .finish()
    }
}

/// Active recordings of a call.
pub struct Recordings {
    factory: Option<Arc<dyn RecorderFactory>>,
    media: Option<LocalMedia>,
    events: Arc<EventHub>,
    active: Mutex<Vec<Arc<Recording>>>,
}

impl Recordings {
    pub fn new(
        factory: Option<Arc<dyn RecorderFactory>>,
        media: Option<LocalMedia>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            factory,
            media,
            events,
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn active(&self) -> Vec<Arc<Recording>> {
        self.active.lock().clone()
    }

    pub fn start(&self, owner: &str, timeslice: Option<Duration>) -> Result<Arc<Recording>> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| CallError::Recorder("no recorder configured".into()))?;
        let media = self
            .media
            .as_ref()
            .ok_or_else(|| CallError::Recorder("no local media to record".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let recording = Arc::new(Recording::new(owner, factory.create(media, tx)?));
        self.events.emit(CallEvent::RecordStart(recording.clone()));
        tokio::spawn(pump(recording.clone(), rx, self.events.clone()));

        recording.recorder.start(timeslice)?;
        self.active.lock().push(recording.clone());
        info!(owner, ?timeslice, "recording started");
        Ok(recording)
    }

    /// Stops every recording, or only those owned by `owner`. Returns how many were stopped.
    pub fn stop(&self, owner: Option<&str>) -> usize {
        let stopping = {
            let mut active = self.active.lock();
            let (stopping, keep): (Vec<_>, Vec<_>) = active
                .drain(..)
                .partition(|rec| owner.map_or(true, |o| rec.owner == o));
            *active = keep;
            stopping
        };
        for recording in &stopping {
            if let Err(err) = recording.recorder.stop() {
                warn!(owner = %recording.owner, error = %err, "recorder stop failed");
            }
        }
        stopping.len()
    }
}

async fn pump(
    recording: Arc<Recording>,
    mut rx: mpsc::UnboundedReceiver<RecorderEvent>,
    events: Arc<EventHub>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            RecorderEvent::Data(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                recording.append(chunk.clone());
                events.emit(CallEvent::RecordData(recording.clone(), chunk));
            }
            RecorderEvent::Stopped => {
                events.emit(CallEvent::RecordStopped(recording.clone()));
                break;
            }
            RecorderEvent::Error(reason) => {
                warn!(owner = %recording.owner, %reason, "recorder error");
                events.emit(CallEvent::RecordError(recording.clone(), reason));
            }
            RecorderEvent::Resumed => events.emit(CallEvent::RecordResume(recording.clone())),
        }
    }
    debug!(owner = %recording.owner, "recorder events finished");
}
