use crate::error::Error;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier a client announces for itself with a `user_join` envelope.
pub type UserId = String;

/// One wire-level event, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Binds a client's identity. Client to hub only, never broadcast.
    #[serde(rename = "user_join")]
    UserJoin(UserJoin),
    /// Chat line fanned out to every registered client, including its sender.
    #[serde(rename = "message")]
    ChatMessage(ChatMessage),
    /// Presence snapshot generated by the hub after every registry change.
    #[serde(rename = "client_info")]
    ClientInfo(ClientInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoin {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_id: String,
    /// RFC3339, filled in by the hub when the sender leaves it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ChatMessage {
    /// Fills a missing or empty timestamp with the current time.
    pub fn stamp(mut self) -> Self {
        if self.timestamp.as_deref().map_or(true, str::is_empty) {
            self.timestamp = Some(now_rfc3339());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub total_clients: usize,
    pub online_users: Vec<UserId>,
}

/// The variant named by an envelope's `type` tag, decoded on its own before
/// the rest of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    UserJoin,
    ChatMessage,
    ClientInfo,
    Unknown,
}

impl EnvelopeKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "user_join" => EnvelopeKind::UserJoin,
            "message" => EnvelopeKind::ChatMessage,
            "client_info" => EnvelopeKind::ClientInfo,
            _ => EnvelopeKind::Unknown,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnvelopeKind::UserJoin => write!(f, "user_join"),
            EnvelopeKind::ChatMessage => write!(f, "message"),
            EnvelopeKind::ClientInfo => write!(f, "client_info"),
            EnvelopeKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::UserJoin(_) => EnvelopeKind::UserJoin,
            Envelope::ChatMessage(_) => EnvelopeKind::ChatMessage,
            Envelope::ClientInfo(_) => EnvelopeKind::ClientInfo,
        }
    }
}

/// Outcome of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Well-formed frame a client is not allowed to send, or an unknown tag.
    Ignored { tag: String },
}

#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type")]
    tag: String,
}

/// Decodes a client frame: the `type` tag first, then the payload of the
/// variant it names.
pub fn decode(text: &str) -> Result<Inbound, Error> {
    let Tag { tag } = serde_json::from_str(text)?;

    match EnvelopeKind::from_tag(&tag) {
        EnvelopeKind::UserJoin => Ok(Inbound::Envelope(Envelope::UserJoin(
            serde_json::from_str(text)?,
        ))),
        EnvelopeKind::ChatMessage => Ok(Inbound::Envelope(Envelope::ChatMessage(
            serde_json::from_str(text)?,
        ))),
        // Presence is produced by the hub only
        EnvelopeKind::ClientInfo => Ok(Inbound::Ignored { tag }),
        EnvelopeKind::Unknown => Ok(Inbound::Ignored { tag }),
    }
}

pub fn encode(envelope: &Envelope) -> Result<String, Error> {
    Ok(serde_json::to_string(envelope)?)
}

/// Registry snapshot: how many clients are registered and which user ids
/// the hub knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub total_clients: usize,
    pub online_users: Vec<UserId>,
}

impl From<Presence> for Envelope {
    fn from(presence: Presence) -> Self {
        Envelope::ClientInfo(ClientInfo {
            total_clients: presence.total_clients,
            online_users: presence.online_users,
        })
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
