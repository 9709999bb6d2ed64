//! # huddle-protocol
//!
//! Wire events for the Huddle chat relay.
//!
//! Clients and the server exchange named events. Each event is carried
//! either as a JSON text frame (what the browser client speaks) or as a
//! length-prefixed MessagePack binary frame.
//!
//! ## Events
//!
//! - `joinRoom` / `chatMessage` - client to server
//! - `message` / `roomUsers` - server to client
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode_text(r#"{"event":"chatMessage","data":"hi"}"#).unwrap();
//! assert_eq!(event, ClientEvent::chat("hi"));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode_text, encode, Encoded, Encoding, ProtocolError};
pub use events::{ChatMessage, ClientEvent, JoinRoom, RoomUsers, ServerEvent};
