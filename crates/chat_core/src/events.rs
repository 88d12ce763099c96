//! crates/chat_core/src/events.rs
//!
//! Push events and the group addressing scheme used to deliver them.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Message, Room};

/// A logical broadcast group. The three kinds never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Every connection of a user, across devices.
    User(Uuid),
    /// Connections authenticated under one session; only `SessionRevoked` goes here.
    Session(Uuid),
    /// Connections that explicitly subscribed to a room's ambient traffic.
    Room(Uuid),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::User(id) => write!(f, "user:{id}"),
            GroupKey::Session(id) => write!(f, "session:{id}"),
            GroupKey::Room(id) => write!(f, "room:{id}"),
        }
    }
}

/// An event pushed from the server to live connections.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    MessageReceived(Message),
    MessageEdited {
        room_id: Uuid,
        message_id: i64,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        room_id: Uuid,
        message_id: i64,
    },
    /// Sent to the sender's own session so it can reconcile its optimistic copy.
    MessageAck {
        client_message_id: Option<String>,
        server_message_id: i64,
        room_id: Uuid,
        sent_at: DateTime<Utc>,
    },
    /// The receiving connection must log out immediately.
    SessionRevoked {
        session_id: Uuid,
    },
    RoomJoined {
        room_id: Uuid,
    },
    RoomLeft {
        room_id: Uuid,
    },
    RoomUpdated(Room),
    RoomDeleted {
        room_id: Uuid,
    },
    PresenceChanged {
        user_id: Uuid,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    },
}

impl BrokerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerEvent::MessageReceived(_) => "message_received",
            BrokerEvent::MessageEdited { .. } => "message_edited",
            BrokerEvent::MessageDeleted { .. } => "message_deleted",
            BrokerEvent::MessageAck { .. } => "message_ack",
            BrokerEvent::SessionRevoked { .. } => "session_revoked",
            BrokerEvent::RoomJoined { .. } => "room_joined",
            BrokerEvent::RoomLeft { .. } => "room_left",
            BrokerEvent::RoomUpdated(_) => "room_updated",
            BrokerEvent::RoomDeleted { .. } => "room_deleted",
            BrokerEvent::PresenceChanged { .. } => "presence_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_keys_render_with_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            GroupKey::User(id).to_string(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert!(GroupKey::Session(id).to_string().starts_with("session:"));
        assert!(GroupKey::Room(id).to_string().starts_with("room:"));
    }

    #[test]
    fn group_kinds_are_disjoint_for_same_id() {
        let id = Uuid::new_v4();
        assert_ne!(GroupKey::User(id), GroupKey::Session(id));
        assert_ne!(GroupKey::User(id), GroupKey::Room(id));
    }
}
