//! Connection registry.
//!
//! The registry is the sole owner of per-connection state: the outbox of
//! every live session and, once it has joined, its display name and room.
//! Rooms are kept as a derived index from room id to members.

use crate::connection::{ConnectionId, Outbox};
use crate::room::{Member, Room};
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection was never registered, or has already disconnected.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Drop a room from the index when its last member leaves.
    pub prune_empty_rooms: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_empty_rooms: true,
        }
    }
}

/// Identity a connection takes on when it joins a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Display name, accepted verbatim.
    pub display_name: String,
    /// Room identifier, accepted verbatim.
    pub room: String,
}

/// A live session.
#[derive(Debug)]
struct Session {
    outbox: Outbox,
    binding: Option<Binding>,
}

/// Tracks live connections and the room each one is bound to.
///
/// No method holds a guard on the session map while locking the room map,
/// or the other way round.
pub struct Registry {
    /// Live sessions.
    sessions: DashMap<ConnectionId, Session>,
    /// Room index (room id -> members).
    rooms: DashMap<String, Room>,
    /// Configuration.
    config: RegistryConfig,
}

impl Registry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            config,
        }
    }

    /// Record a new live session with no room yet.
    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) {
        debug!(connection = %connection_id, "Connection registered");
        self.sessions.insert(
            connection_id,
            Session {
                outbox,
                binding: None,
            },
        );
    }

    /// Bind a connection to a display name and room.
    ///
    /// Both strings are accepted verbatim. A connection that was already in
    /// a room is moved out of it first, silently. Returns a write guard on the
    /// room so the caller can fan out while membership is held stable; the
    /// caller must not touch the registry again until the guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn bind(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
        room: &str,
    ) -> Result<RefMut<'_, String, Room>, RegistryError> {
        let (outbox, previous) = {
            let mut session = self
                .sessions
                .get_mut(connection_id)
                .ok_or_else(|| RegistryError::UnknownConnection(connection_id.clone()))?;
            let previous = session.binding.replace(Binding {
                display_name: display_name.to_string(),
                room: room.to_string(),
            });
            (session.outbox.clone(), previous)
        };

        if let Some(previous) = previous {
            debug!(
                connection = %connection_id,
                from = %previous.room,
                to = %room,
                "Moving connection to another room"
            );
            self.leave_room(connection_id, &previous.room);
        }

        let mut entry = self.rooms.entry(room.to_string()).or_insert_with(|| {
            debug!(room = %room, "Creating room");
            Room::new(room)
        });
        entry.add(Member::new(connection_id.clone(), display_name, outbox));

        debug!(
            connection = %connection_id,
            room = %room,
            members = entry.len(),
            "Bound"
        );

        Ok(entry)
    }

    /// Remove a connection from its room, keeping the session live.
    ///
    /// Returns the binding it had, if any.
    pub fn unbind(&self, connection_id: &ConnectionId) -> Option<Binding> {
        let binding = self
            .sessions
            .get_mut(connection_id)
            .and_then(|mut session| session.binding.take())?;
        self.leave_room(connection_id, &binding.room);
        Some(binding)
    }

    /// Forget a connection entirely.
    ///
    /// Returns the binding it had, if any.
    pub fn deregister(&self, connection_id: &ConnectionId) -> Option<Binding> {
        let (_, session) = self.sessions.remove(connection_id)?;
        debug!(connection = %connection_id, "Connection deregistered");

        let binding = session.binding?;
        self.leave_room(connection_id, &binding.room);
        Some(binding)
    }

    /// Current binding of a connection.
    #[must_use]
    pub fn binding(&self, connection_id: &ConnectionId) -> Option<Binding> {
        self.sessions
            .get(connection_id)
            .and_then(|session| session.binding.clone())
    }

    /// Read guard on a room, if it has members.
    #[must_use]
    pub fn room(&self, room: &str) -> Option<Ref<'_, String, Room>> {
        self.rooms.get(room)
    }

    /// Display names of everyone bound to `room`, in join order.
    ///
    /// Empty if the room has no members or does not exist.
    #[must_use]
    pub fn users_in_room(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|entry| entry.roster())
            .unwrap_or_default()
    }

    /// Deliver an event to every live session, optionally skipping one.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn broadcast_all(&self, event: ServerEvent, except: Option<&ConnectionId>) -> usize {
        let event = Arc::new(event);
        let delivered = self
            .sessions
            .iter()
            .filter(|entry| Some(entry.key()) != except)
            .filter(|entry| entry.outbox.send(Arc::clone(&event)).is_ok())
            .count();
        trace!(event = event.name(), recipients = delivered, "Broadcast to all");
        delivered
    }

    /// Names of all non-empty rooms.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connection_count: self.sessions.len(),
            bound_count: self
                .sessions
                .iter()
                .filter(|s| s.binding.is_some())
                .count(),
            room_count: self.rooms.len(),
        }
    }

    fn leave_room(&self, connection_id: &ConnectionId, room: &str) -> Option<Member> {
        let mut entry = self.rooms.get_mut(room)?;
        let member = entry.remove(connection_id);

        if self.config.prune_empty_rooms && entry.is_empty() {
            drop(entry);
            // Another connection may have joined since the guard was released
            if self.rooms.remove_if(room, |_, r| r.is_empty()).is_some() {
                debug!(room = %room, "Pruned empty room");
            }
        }

        member
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of connections bound to a room.
    pub bound_count: usize,
    /// Number of non-empty rooms.
    pub room_count: usize,
}
