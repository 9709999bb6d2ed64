//! Event fan-out for joins, chat lines, and disconnects.
//!
//! Audience rules:
//!
//! | Trigger    | Event                          | Audience                         |
//! |------------|--------------------------------|----------------------------------|
//! | join       | welcome                        | the joiner only                  |
//! | join       | `<name> has joined the chat`   | rest of the room                 |
//! | join       | roster                         | whole room, joiner included      |
//! | chat       | the line, under sender's name  | whole room, sender included      |
//! | disconnect | `A user has left the chat`     | every connection on the server   |
//!
//! The disconnect notice is server-wide and no roster follows it. Both can be
//! narrowed to the departed connection's room through [`BroadcasterConfig`].

use crate::clock::{Clock, SystemClock};
use crate::connection::{ConnectionId, Outbox};
use crate::registry::{Registry, RegistryConfig, RegistryError, RegistryStats};
use huddle_protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default name of the synthetic sender of notices.
pub const DEFAULT_BOT_NAME: &str = "Chat Bot";

/// Text sent to a connection that has just joined.
pub const WELCOME_TEXT: &str = "Welcome to the chat";

/// Text sent when a connection disconnects.
pub const LEAVE_TEXT: &str = "A user has left the chat";

/// Broadcaster errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The connection sent a chat line before joining a room.
    #[error("Connection has not joined a room: {0}")]
    NotJoined(ConnectionId),

    /// Registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Audience of the disconnect notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveScope {
    /// Every connection on the server.
    #[default]
    Global,
    /// Only the members of the room the connection was in.
    Room,
}

/// Broadcaster configuration.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Sender name on welcome and join/leave notices.
    pub bot_name: String,
    /// Who hears about a disconnect.
    pub leave_scope: LeaveScope,
    /// Send the room an updated roster after a disconnect.
    pub roster_on_leave: bool,
    /// Registry configuration.
    pub registry: RegistryConfig,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            bot_name: DEFAULT_BOT_NAME.to_string(),
            leave_scope: LeaveScope::Global,
            roster_on_leave: false,
            registry: RegistryConfig::default(),
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// Room that was joined.
    pub room: String,
    /// Members that received the join notice.
    pub notified: usize,
    /// Roster sent to the room.
    pub roster: Vec<String>,
}

/// Result of a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveReport {
    /// Room the connection was in, if it had joined one.
    pub room: Option<String>,
    /// Connections that received the leave notice.
    pub notified: usize,
}

/// Applies the audience rules on top of a [`Registry`].
pub struct Broadcaster {
    registry: Registry,
    clock: Arc<dyn Clock>,
    config: BroadcasterConfig,
}

impl Broadcaster {
    /// Create a broadcaster with default configuration and the local clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BroadcasterConfig::default())
    }

    /// Create a broadcaster with custom configuration and the local clock.
    #[must_use]
    pub fn with_config(config: BroadcasterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::default()))
    }

    /// Create a broadcaster with custom configuration and clock.
    #[must_use]
    pub fn with_clock(config: BroadcasterConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            bot = %config.bot_name,
            leave_scope = ?config.leave_scope,
            roster_on_leave = config.roster_on_leave,
            "Creating broadcaster"
        );
        Self {
            registry: Registry::with_config(config.registry.clone()),
            clock,
            config,
        }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a new connection and return its handle.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        self.registry.register(connection_id.clone(), outbox);
        connection_id
    }

    /// Handle a `joinRoom` request.
    ///
    /// The joiner gets a welcome, the rest of the room a join notice, and
    /// everyone in the room (joiner included) the new roster. Membership is
    /// held stable for all three.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn join(
        &self,
        connection_id: &ConnectionId,
        username: &str,
        room: &str,
    ) -> Result<JoinReport, BroadcastError> {
        let entry = self.registry.bind(connection_id, username, room)?;

        entry.send_to(connection_id, self.notice(WELCOME_TEXT));

        let notified = entry.publish(
            self.notice(format!("{} has joined the chat", username)),
            Some(connection_id),
        );

        let roster = entry.roster();
        entry.publish(ServerEvent::room_users(room, roster.clone()), None);

        debug!(
            connection = %connection_id,
            room = %room,
            members = roster.len(),
            "Joined"
        );

        Ok(JoinReport {
            room: room.to_string(),
            notified,
            roster,
        })
    }

    /// Relay a chat line to every member of the sender's room, sender included.
    ///
    /// The text is passed through untouched. Returns the number of recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not joined a room.
    pub fn chat(&self, connection_id: &ConnectionId, text: &str) -> Result<usize, BroadcastError> {
        let binding = self
            .registry
            .binding(connection_id)
            .ok_or_else(|| BroadcastError::NotJoined(connection_id.clone()))?;

        let event = ServerEvent::message(&binding.display_name, text, self.clock.time_of_day());
        let recipients = match self.registry.room(&binding.room) {
            Some(entry) => entry.publish(event, None),
            None => {
                warn!(connection = %connection_id, room = %binding.room, "Bound room is missing");
                0
            }
        };

        debug!(
            connection = %connection_id,
            room = %binding.room,
            recipients,
            "Chat relayed"
        );

        Ok(recipients)
    }

    /// Handle the end of a session.
    ///
    /// The connection is forgotten first, then the leave notice goes out to
    /// the configured audience. Disconnecting an unknown connection is a
    /// no-op apart from the notice.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> LeaveReport {
        let binding = self.registry.deregister(connection_id);
        let room = binding.map(|b| b.room);

        let notice = self.notice(LEAVE_TEXT);
        let notified = match (self.config.leave_scope, room.as_deref()) {
            (LeaveScope::Global, _) => self.registry.broadcast_all(notice, None),
            (LeaveScope::Room, Some(room)) => self
                .registry
                .room(room)
                .map(|entry| entry.publish(notice, None))
                .unwrap_or(0),
            (LeaveScope::Room, None) => 0,
        };

        if self.config.roster_on_leave {
            if let Some(room) = room.as_deref() {
                if let Some(entry) = self.registry.room(room) {
                    entry.publish(ServerEvent::room_users(room, entry.roster()), None);
                }
            }
        }

        debug!(
            connection = %connection_id,
            room = room.as_deref().unwrap_or("-"),
            notified,
            "Disconnected"
        );

        LeaveReport { room, notified }
    }

    /// Display names of everyone in `room`.
    #[must_use]
    pub fn users_in_room(&self, room: &str) -> Vec<String> {
        self.registry.users_in_room(room)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    fn notice(&self, text: impl Into<String>) -> ServerEvent {
        ServerEvent::message(&self.config.bot_name, text, self.clock.time_of_day())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::connection::{outbox, Inbox};
    use chrono::NaiveTime;
    use huddle_protocol::ChatMessage;

    fn broadcaster(config: BroadcasterConfig) -> Broadcaster {
        let clock = FixedClock::new(NaiveTime::from_hms_opt(15, 4, 5).unwrap());
        Broadcaster::with_clock(config, Arc::new(clock))
    }

    fn connect(broadcaster: &Broadcaster) -> (ConnectionId, Inbox) {
        let (tx, rx) = outbox();
        (broadcaster.connect(tx), rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn messages(events: &[ServerEvent]) -> Vec<&ChatMessage> {
        events.iter().filter_map(ServerEvent::as_message).collect()
    }

    #[test]
    fn test_join_welcomes_joiner_once() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut rx) = connect(&b);

        b.join(&a, "bob", "lobby").unwrap();

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::message("Chat Bot", "Welcome to the chat", "3:04:05 PM"),
                ServerEvent::room_users("lobby", vec!["bob".into()]),
            ]
        );
    }

    #[test]
    fn test_join_notifies_room_only() {
        let b = broadcaster(BroadcasterConfig::default());
        let (bob, mut bob_rx) = connect(&b);
        let (dave, mut dave_rx) = connect(&b);
        let (alice, mut alice_rx) = connect(&b);

        b.join(&bob, "bob", "general").unwrap();
        b.join(&dave, "dave", "random").unwrap();
        drain(&mut bob_rx);
        drain(&mut dave_rx);

        let report = b.join(&alice, "Alice", "general").unwrap();
        assert_eq!(report.notified, 1);

        let bob_events = drain(&mut bob_rx);
        assert_eq!(
            messages(&bob_events)
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>(),
            vec!["Alice has joined the chat"]
        );
        assert!(drain(&mut dave_rx).is_empty());

        // The joiner does not get its own join notice
        let alice_events = drain(&mut alice_rx);
        assert!(messages(&alice_events)
            .iter()
            .all(|m| m.text != "Alice has joined the chat"));
    }

    #[test]
    fn test_join_roster_to_whole_room() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (c, mut c_rx) = connect(&b);

        b.join(&a, "bob", "lobby").unwrap();
        drain(&mut a_rx);
        let report = b.join(&c, "carol", "lobby").unwrap();

        let expected = ServerEvent::room_users("lobby", vec!["bob".into(), "carol".into()]);
        assert_eq!(report.roster, vec!["bob", "carol"]);
        assert!(drain(&mut a_rx).contains(&expected));
        assert!(drain(&mut c_rx).contains(&expected));
        assert_eq!(b.users_in_room("lobby"), vec!["bob", "carol"]);
    }

    #[test]
    fn test_rejoin_moves_silently() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (m, mut m_rx) = connect(&b);
        let (c, mut c_rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();
        b.join(&m, "mallory", "lobby").unwrap();
        b.join(&c, "carol", "kitchen").unwrap();
        drain(&mut a_rx);
        drain(&mut m_rx);
        drain(&mut c_rx);

        let report = b.join(&m, "mallory", "kitchen").unwrap();
        assert_eq!(report.notified, 1);

        // The old room hears nothing: no notice, no roster
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(b.users_in_room("lobby"), vec!["bob"]);

        let kitchen = ServerEvent::room_users("kitchen", vec!["carol".into(), "mallory".into()]);
        assert_eq!(
            drain(&mut c_rx),
            vec![
                ServerEvent::message("Chat Bot", "mallory has joined the chat", "3:04:05 PM"),
                kitchen.clone(),
            ]
        );
        assert_eq!(
            drain(&mut m_rx),
            vec![
                ServerEvent::message("Chat Bot", WELCOME_TEXT, "3:04:05 PM"),
                kitchen,
            ]
        );
    }

    #[test]
    fn test_concurrent_joins_serialize_roster() {
        const JOINERS: usize = 16;

        let b = broadcaster(BroadcasterConfig::default());
        let joined: Vec<(JoinReport, Inbox)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..JOINERS)
                .map(|i| {
                    let b = &b;
                    scope.spawn(move || {
                        let (id, rx) = connect(b);
                        let report = b.join(&id, &format!("user-{}", i), "lobby").unwrap();
                        (report, rx)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Each roster extends the one emitted before it
        let mut reports: Vec<&JoinReport> = joined.iter().map(|(report, _)| report).collect();
        reports.sort_by_key(|r| r.roster.len());
        for (i, pair) in reports.windows(2).enumerate() {
            assert_eq!(pair[0].roster.len(), i + 1);
            assert_eq!(pair[1].roster.len(), i + 2);
            assert!(pair[1].roster.starts_with(&pair[0].roster));
        }

        let mut users = b.users_in_room("lobby");
        assert_eq!(users.len(), JOINERS);
        users.sort();
        users.dedup();
        assert_eq!(users.len(), JOINERS);
    }

    #[test]
    fn test_join_unknown_connection() {
        let b = broadcaster(BroadcasterConfig::default());
        let result = b.join(&ConnectionId::from("ghost"), "bob", "lobby");
        assert!(matches!(result, Err(BroadcastError::Registry(_))));
    }

    #[test]
    fn test_chat_reaches_room_including_sender() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (c, mut c_rx) = connect(&b);
        let (d, mut d_rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();
        b.join(&c, "carol", "lobby").unwrap();
        b.join(&d, "dave", "elsewhere").unwrap();
        drain(&mut a_rx);
        drain(&mut c_rx);
        drain(&mut d_rx);

        let text = "  <i>hi</i> 🎉  ";
        assert_eq!(b.chat(&c, text).unwrap(), 2);

        let expected = ServerEvent::message("carol", text, "3:04:05 PM");
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut c_rx), vec![expected]);
        assert!(drain(&mut d_rx).is_empty());
    }

    #[test]
    fn test_chat_before_join() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut rx) = connect(&b);

        assert!(matches!(b.chat(&a, "hi"), Err(BroadcastError::NotJoined(_))));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_notifies_every_connection() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (c, _c_rx) = connect(&b);
        let (d, mut d_rx) = connect(&b);
        let (_idle, mut idle_rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();
        b.join(&c, "carol", "lobby").unwrap();
        b.join(&d, "dave", "kitchen").unwrap();
        drain(&mut a_rx);
        drain(&mut d_rx);

        let report = b.disconnect(&c);
        assert_eq!(report.room.as_deref(), Some("lobby"));
        assert_eq!(report.notified, 3);

        let leave = ServerEvent::message("Chat Bot", "A user has left the chat", "3:04:05 PM");
        // No roster follows the notice
        assert_eq!(drain(&mut a_rx), vec![leave.clone()]);
        assert_eq!(drain(&mut d_rx), vec![leave.clone()]);
        assert_eq!(drain(&mut idle_rx), vec![leave]);
        assert_eq!(b.users_in_room("lobby"), vec!["bob"]);
    }

    #[test]
    fn test_disconnect_before_join_still_notifies() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (idle, _idle_rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();
        drain(&mut a_rx);

        let report = b.disconnect(&idle);
        assert_eq!(report.room, None);
        assert_eq!(messages(&drain(&mut a_rx))[0].text, LEAVE_TEXT);
    }

    #[test]
    fn test_room_scoped_leave_with_roster() {
        let b = broadcaster(BroadcasterConfig {
            leave_scope: LeaveScope::Room,
            roster_on_leave: true,
            ..BroadcasterConfig::default()
        });
        let (a, mut a_rx) = connect(&b);
        let (c, _c_rx) = connect(&b);
        let (d, mut d_rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();
        b.join(&c, "carol", "lobby").unwrap();
        b.join(&d, "dave", "kitchen").unwrap();
        drain(&mut a_rx);
        drain(&mut d_rx);

        let report = b.disconnect(&c);
        assert_eq!(report.notified, 1);

        assert_eq!(
            drain(&mut a_rx),
            vec![
                ServerEvent::message("Chat Bot", LEAVE_TEXT, "3:04:05 PM"),
                ServerEvent::room_users("lobby", vec!["bob".into()]),
            ]
        );
        assert!(drain(&mut d_rx).is_empty());
    }

    #[test]
    fn test_custom_bot_name() {
        let b = broadcaster(BroadcasterConfig {
            bot_name: "Relay".into(),
            ..BroadcasterConfig::default()
        });
        let (a, mut rx) = connect(&b);
        b.join(&a, "bob", "lobby").unwrap();

        assert_eq!(messages(&drain(&mut rx))[0].username, "Relay");
    }

    #[test]
    fn test_lobby_scenario() {
        let b = broadcaster(BroadcasterConfig::default());
        let (a, mut a_rx) = connect(&b);
        let (c, mut c_rx) = connect(&b);
        let (_other, mut other_rx) = connect(&b);

        // bob joins
        b.join(&a, "bob", "lobby").unwrap();
        let a_events = drain(&mut a_rx);
        assert_eq!(messages(&a_events)[0].text, WELCOME_TEXT);
        assert_eq!(b.users_in_room("lobby"), vec!["bob"]);

        // carol joins
        b.join(&c, "carol", "lobby").unwrap();
        let roster = ServerEvent::room_users("lobby", vec!["bob".into(), "carol".into()]);
        let a_events = drain(&mut a_rx);
        assert_eq!(messages(&a_events)[0].text, "carol has joined the chat");
        assert!(a_events.contains(&roster));
        assert!(drain(&mut c_rx).contains(&roster));

        // carol says hi
        b.chat(&c, "hi").unwrap();
        for rx in [&mut a_rx, &mut c_rx] {
            let events = drain(rx);
            let msg = messages(&events)[0];
            assert_eq!((msg.username.as_str(), msg.text.as_str()), ("carol", "hi"));
        }

        // carol leaves
        b.disconnect(&c);
        for rx in [&mut a_rx, &mut other_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert_eq!(messages(&events)[0].text, LEAVE_TEXT);
        }
    }
}
