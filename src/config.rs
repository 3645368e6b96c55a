// Logging is on in debug builds and off in release builds unless `logger::init_with`
// is called explicitly.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CallError, Result};
use crate::peer::types::{IceServerKind, ServerConfig};

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Filter used when `RUST_LOG` is unset
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "vcall=debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "vcall=info";

static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_ICE_SERVERS.clone()
}

/// Everything needed to join a room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallOptions {
    pub room_id: String,
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    /// Display identifier announced to peers; a random token when absent.
    #[serde(default)]
    pub identifier: Option<String>,
}

impl CallOptions {
    pub fn new(room_id: impl Into<String>, signaling_url: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            signaling_url: signaling_url.into(),
            ice_servers: default_ice_servers(),
            identifier: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let options: CallOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(CallError::config("roomId cannot be empty"));
        }
        let url = Url::parse(&self.signaling_url)
            .map_err(|err| CallError::config(format!("signalingUrl: {err}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CallError::config(format!(
                "signalingUrl must be ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        validate_ice_servers(&self.ice_servers)
    }
}

pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    if servers.is_empty() {
        return Err(CallError::config("at least one ICE server is required"));
    }
    for server in servers {
        if server.url.is_empty() {
            return Err(CallError::config("ICE server URL cannot be empty"));
        }
        if server.r#type == IceServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(CallError::config(format!(
                "TURN server {} requires username and credential",
                server.url
            )));
        }
    }
    Ok(())
}
