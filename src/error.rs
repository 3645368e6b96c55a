use thiserror::Error;

use crate::peer::types::NegotiationState;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("relay connect failed: {0}")]
    RelayConnect(String),
    #[error("relay channel closed")]
    ChannelClosed,
    #[error("malformed control message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("peer {peer_id}: cannot {operation} while {state:?}")]
    InvalidState {
        peer_id: String,
        operation: &'static str,
        state: NegotiationState,
    },
    #[error("media transport: {0}")]
    Media(#[from] webrtc::Error),
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("recorder: {0}")]
    Recorder(String),
}

impl CallError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        CallError::Protocol(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        CallError::Config(reason.into())
    }

    /// Out-of-protocol input; rejected and logged, not surfaced as an Error event.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, CallError::Protocol(_) | CallError::InvalidState { .. })
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
