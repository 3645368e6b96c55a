use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// One local capture track, shared by every peer connection of the call.
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Option<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalTrack {
    /// A track with no RTP sink; peers do not get it added.
    pub fn detached(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: None,
        }
    }

    pub fn with_rtc(kind: MediaKind, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            id: track.id().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: Some(track),
        }
    }

    /// Sample-fed track using Opus for audio and VP8 for video.
    pub fn sample(kind: MediaKind, id: &str, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        );
        Self::with_rtc(kind, Arc::new(track))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtc(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        self.rtc.clone()
    }

    /// Capture code checks this before feeding samples.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns `true` only for the call that actually stopped the track.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("rtc", &self.rtc.is_some())
            .finish()
    }
}

/// Local media source: a stream id plus its tracks.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    stream_id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: LocalTrack) -> Self {
        self.tracks.push(Arc::new(track));
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Enables or disables every track of `kind`; returns how many were touched.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> usize {
        let mut touched = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }

    /// Stops every track; returns how many were stopped by this call.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media() -> LocalMedia {
        LocalMedia::new("local")
            .with_track(LocalTrack::detached("mic", MediaKind::Audio))
            .with_track(LocalTrack::detached("cam", MediaKind::Video))
    }

    #[test]
    fn stop_all_stops_each_track_once() {
        let media = media();
        assert_eq!(media.stop_all(), 2);
        assert_eq!(media.stop_all(), 0);
        assert!(media.tracks().iter().all(|t| t.is_stopped()));
    }

    #[test]
    fn set_enabled_only_touches_matching_kind() {
        let media = media();
        assert_eq!(media.set_enabled(MediaKind::Video, false), 1);
        let cam = media.tracks_of(MediaKind::Video).next().unwrap();
        let mic = media.tracks_of(MediaKind::Audio).next().unwrap();
        assert!(!cam.is_enabled());
        assert!(mic.is_enabled());
    }

    #[test]
    fn clones_share_tracks() {
        let media = media();
        let copy = media.clone();
        copy.stop_all();
        assert!(media.tracks().iter().all(|t| t.is_stopped()));
    }
}
