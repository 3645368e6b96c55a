use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallError;
use crate::peer::types::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Begin = 0,
    Request = 1,
    Offer = 2,
    Answer = 3,
    Candidate = 4,
    Identifier = 5,
    Closed = 6,
    Message = 7,
    VideoEnable = 8,
    AudioEnable = 9,
}

impl TryFrom<u8> for CommandKind {
    type Error = CallError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CommandKind::Begin,
            1 => CommandKind::Request,
            2 => CommandKind::Offer,
            3 => CommandKind::Answer,
            4 => CommandKind::Candidate,
            5 => CommandKind::Identifier,
            6 => CommandKind::Closed,
            7 => CommandKind::Message,
            8 => CommandKind::VideoEnable,
            9 => CommandKind::AudioEnable,
            other => return Err(CallError::protocol(format!("unknown cmd {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Outbound: join `room_id`. Inbound: the relay assigned us `connection_id`.
    Begin {
        room_id: Option<String>,
        connection_id: Option<String>,
    },
    Request,
    Offer { sdp: SessionDescription },
    Answer { sdp: SessionDescription },
    Candidate { ice: IceCandidate },
    Identifier { identifier: String },
    Closed,
    Message { message: Value },
    VideoEnable { status: bool },
    AudioEnable { status: bool },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Begin { .. } => CommandKind::Begin,
            Command::Request => CommandKind::Request,
            Command::Offer { .. } => CommandKind::Offer,
            Command::Answer { .. } => CommandKind::Answer,
            Command::Candidate { .. } => CommandKind::Candidate,
            Command::Identifier { .. } => CommandKind::Identifier,
            Command::Closed => CommandKind::Closed,
            Command::Message { .. } => CommandKind::Message,
            Command::VideoEnable { .. } => CommandKind::VideoEnable,
            Command::AudioEnable { .. } => CommandKind::AudioEnable,
        }
    }
}

/// A relay frame: command plus addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct ControlMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub command: Command,
}

impl ControlMessage {
    pub fn new(command: Command) -> Self {
        Self {
            from: None,
            to: None,
            command,
        }
    }

    pub fn from_peer(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn to_peer(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    pub fn encode(&self) -> Result<String, CallError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, CallError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    cmd: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ice: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<bool>,
}

fn required<T>(field: Option<T>, kind: CommandKind, name: &str) -> Result<T, CallError> {
    field.ok_or_else(|| CallError::protocol(format!("{kind:?} without `{name}`")))
}

impl TryFrom<WireMessage> for ControlMessage {
    type Error = CallError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = CommandKind::try_from(wire.cmd)?;
        let command = match kind {
            CommandKind::Begin => Command::Begin {
                room_id: wire.room_id,
                connection_id: wire.connection_id,
            },
            CommandKind::Request => Command::Request,
            CommandKind::Offer => Command::Offer {
                sdp: required(wire.sdp, kind, "sdp")?,
            },
            CommandKind::Answer => Command::Answer {
                sdp: required(wire.sdp, kind, "sdp")?,
            },
            CommandKind::Candidate => Command::Candidate {
                ice: required(wire.ice, kind, "ice")?,
            },
            CommandKind::Identifier => Command::Identifier {
                identifier: required(wire.identifier, kind, "identifier")?,
            },
            CommandKind::Closed => Command::Closed,
            CommandKind::Message => Command::Message {
                message: wire.message.unwrap_or(Value::Null),
            },
            CommandKind::VideoEnable => Command::VideoEnable {
                status: required(wire.status, kind, "status")?,
            },
            CommandKind::AudioEnable => Command::AudioEnable {
                status: required(wire.status, kind, "status")?,
            },
        };
        Ok(ControlMessage {
            from: wire.from,
            to: wire.to,
            command,
        })
    }
}

impl From<ControlMessage> for WireMessage {
    fn from(msg: ControlMessage) -> Self {
        let mut wire = WireMessage {
            cmd: msg.kind() as u8,
            from: msg.from,
            to: msg.to,
            ..Default::default()
        };
        match msg.command {
            Command::Begin {
                room_id,
                connection_id,
            } => {
                wire.room_id = room_id;
                wire.connection_id = connection_id;
            }
            Command::Request | Command::Closed => {}
            Command::Offer { sdp } | Command::Answer { sdp } => wire.sdp = Some(sdp),
            Command::Candidate { ice } => wire.ice = Some(ice),
            Command::Identifier { identifier } => wire.identifier = Some(identifier),
            Command::Message { message } => wire.message = Some(message),
            Command::VideoEnable { status } | Command::AudioEnable { status } => {
                wire.status = Some(status)
            }
        }
        wire
    }
}
