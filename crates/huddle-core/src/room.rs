//! Rooms.
//!
//! A room is the set of live connections bound to the same room id. It has
//! no lifecycle of its own: the registry creates it on first join and drops
//! it when the last member leaves.

use crate::connection::{ConnectionId, Outbox};
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tracing::{debug, trace};

/// A connection bound to a room.
#[derive(Debug, Clone)]
pub struct Member {
    /// Connection handle.
    pub connection_id: ConnectionId,
    /// Display name given at join.
    pub display_name: String,
    /// Event queue of the connection.
    pub outbox: Outbox,
}

impl Member {
    /// Create a new member.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        display_name: impl Into<String>,
        outbox: Outbox,
    ) -> Self {
        Self {
            connection_id,
            display_name: display_name.into(),
            outbox,
        }
    }

    /// Queue an event for this member.
    ///
    /// Returns `false` if the connection has already gone away.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        self.outbox.send(event).is_ok()
    }
}

/// Members of one room, in join order.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: Vec<Member>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Room identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Get a member by connection.
    #[must_use]
    pub fn member(&self, connection_id: &ConnectionId) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| &m.connection_id == connection_id)
    }

    /// Add a member.
    ///
    /// A connection appears at most once; adding it again replaces the
    /// previous entry in place.
    pub fn add(&mut self, member: Member) {
        debug!(room = %self.name, connection = %member.connection_id, "Member added");
        match self
            .members
            .iter_mut()
            .find(|m| m.connection_id == member.connection_id)
        {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }

    /// Remove a member, returning it if it was present.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        let index = self
            .members
            .iter()
            .position(|m| &m.connection_id == connection_id)?;
        let member = self.members.remove(index);
        debug!(room = %self.name, connection = %connection_id, "Member removed");
        Some(member)
    }

    /// Display names of all members, in join order.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.display_name.clone())
            .collect()
    }

    /// Deliver an event to every member, optionally skipping one.
    ///
    /// Returns the number of members the event was queued for.
    pub fn publish(&self, event: ServerEvent, except: Option<&ConnectionId>) -> usize {
        let event = Arc::new(event);
        let delivered = self
            .members
            .iter()
            .filter(|m| Some(&m.connection_id) != except)
            .filter(|m| m.send(Arc::clone(&event)))
            .count();
        trace!(room = %self.name, event = event.name(), recipients = delivered, "Published");
        delivered
    }

    /// Deliver an event to a single member.
    ///
    /// Returns `false` if the connection is not a member or has gone away.
    pub fn send_to(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.member(connection_id)
            .is_some_and(|m| m.send(Arc::new(event)))
    }
}
