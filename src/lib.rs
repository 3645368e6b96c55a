pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod record;
pub mod relay;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod testing;

pub use call::{Call, CallBuilder};
pub use config::CallOptions;
pub use error::{CallError, Result};
pub use events::{CallEvent, ErrorReport, EventHub, EventKind};
pub use media::{LocalMedia, LocalTrack, MediaKind};
pub use peer::{
    ConnectionState, IceCandidate, MediaTransport, NegotiationState, PeerSnapshot,
    RemoteStream, ServerConfig, SessionDescription, TransportEvent, TransportFactory,
};
pub use protocol::{Command, CommandKind, ControlMessage};
pub use record::{MediaRecorder, RecorderEvent, RecorderFactory, Recording};
pub use relay::{MemoryRelay, RelayClient, RelayEvent};
