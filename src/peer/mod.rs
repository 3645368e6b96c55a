pub mod connection;
pub mod ice;
pub mod registry;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{RtcTransport, RtcTransportFactory};
pub use registry::PeerRegistry;
pub use state::{CandidateOutcome, OfferOutcome, PeerSession};
pub use transport::{ConnectionState, MediaTransport, TransportEvent, TransportFactory};
pub use types::{
    IceCandidate, IceServerKind, NegotiationState, PeerSnapshot, RemoteStream, SdpType,
    ServerConfig, SessionDescription,
};
