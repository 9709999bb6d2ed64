//! Event types exchanged between chat clients and the relay.
//!
//! Events are adjacently tagged: `{"event": "<name>", "data": <payload>}`.
//! Payload strings are carried verbatim.

use serde::{Deserialize, Serialize};

/// Event names as they appear on the wire.
pub mod names {
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const CHAT_MESSAGE: &str = "chatMessage";
    pub const MESSAGE: &str = "message";
    pub const ROOM_USERS: &str = "roomUsers";
}

/// Payload of a `joinRoom` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Display name the client wants to use.
    pub username: String,
    /// Room identifier.
    pub room: String,
}

/// An event sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Enter a room under a display name.
    #[serde(rename = "joinRoom")]
    JoinRoom(JoinRoom),

    /// Send a chat line to the current room.
    #[serde(rename = "chatMessage")]
    ChatMessage(String),
}

impl ClientEvent {
    /// Create a `joinRoom` event.
    #[must_use]
    pub fn join(username: impl Into<String>, room: impl Into<String>) -> Self {
        ClientEvent::JoinRoom(JoinRoom {
            username: username.into(),
            room: room.into(),
        })
    }

    /// Create a `chatMessage` event.
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        ClientEvent::ChatMessage(text.into())
    }

    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => names::JOIN_ROOM,
            ClientEvent::ChatMessage(_) => names::CHAT_MESSAGE,
        }
    }
}

/// A chat line, welcome, or notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender display name.
    pub username: String,
    /// Message text.
    pub text: String,
    /// Time of day the message was produced.
    pub time: String,
}

/// Current roster of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUsers {
    /// Room identifier.
    pub room: String,
    /// Display names of the members, in join order.
    pub users: Vec<String>,
}

/// An event sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A chat message or bot notice.
    #[serde(rename = "message")]
    Message(ChatMessage),

    /// Roster update for a room.
    #[serde(rename = "roomUsers")]
    RoomUsers(RoomUsers),
}

impl ServerEvent {
    /// Create a `message` event.
    #[must_use]
    pub fn message(
        username: impl Into<String>,
        text: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        ServerEvent::Message(ChatMessage {
            username: username.into(),
            text: text.into(),
            time: time.into(),
        })
    }

    /// Create a `roomUsers` event.
    #[must_use]
    pub fn room_users(room: impl Into<String>, users: Vec<String>) -> Self {
        ServerEvent::RoomUsers(RoomUsers {
            room: room.into(),
            users,
        })
    }

    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => names::MESSAGE,
            ServerEvent::RoomUsers(_) => names::ROOM_USERS,
        }
    }

    /// The chat message carried by this event, if any.
    #[must_use]
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            ServerEvent::Message(msg) => Some(msg),
            ServerEvent::RoomUsers(_) => None,
        }
    }

    /// The roster carried by this event, if any.
    #[must_use]
    pub fn as_room_users(&self) -> Option<&RoomUsers> {
        match self {
            ServerEvent::RoomUsers(users) => Some(users),
            ServerEvent::Message(_) => None,
        }
    }
}
