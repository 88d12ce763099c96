//! crates/chat_core/src/domain.rs
//!
//! Defines the pure, core data structures for the chat broker.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Users and Sessions
//=========================================================================================

/// A registered user as seen by everyone else. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub username: String,
    pub hashed_password: String,
}

/// A server-side session record. The token is opaque; the record is the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The identity a validated token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Rooms and Membership
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    Global,
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    pub room_type: RoomType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub is_global: bool,
    /// `None` only for the seeded Global room.
    pub created_by_user_id: Option<Uuid>,
    pub pinned_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Only Group rooms can be renamed or deleted by their members.
    pub fn is_mutable(&self) -> bool {
        self.room_type == RoomType::Group
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemberRole {
    Member,
    Admin,
    Owner,
}

impl MemberRole {
    /// Owners and Admins may add/remove members, rename, delete and pin.
    pub fn can_manage(self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

/// Soft-leave state of a membership row. The row itself is never deleted on leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Active,
    Left { left_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub state: MembershipState,
    pub is_muted: bool,
}

impl RoomMember {
    pub fn is_active(&self) -> bool {
        self.state == MembershipState::Active
    }

    pub fn left_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            MembershipState::Active => None,
            MembershipState::Left { left_at } => Some(left_at),
        }
    }
}

/// A room as listed for one user, with that user's standing in it.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub room: Room,
    /// `None` for the Global room, where access is implicit.
    pub role: Option<MemberRole>,
    pub is_muted: bool,
}

//=========================================================================================
// Messages
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    UserJoined,
    UserLeft,
    RoomRenamed,
    MemberRoleChanged,
    OwnershipTransferred,
}

/// A message with its current state derived from the edit and deletion logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub room_id: Uuid,
    pub sender_user_id: Option<Uuid>,
    pub sender_username: Option<String>,
    pub message_type: MessageType,
    pub service_action: Option<ServiceAction>,
    pub reply_to_message_id: Option<i64>,
    /// Content of the latest edit, or the original content if never edited.
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }
}

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub sender_user_id: Option<Uuid>,
    pub message_type: MessageType,
    pub service_action: Option<ServiceAction>,
    pub reply_to_message_id: Option<i64>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn text(room_id: Uuid, sender: Uuid, content: String, reply_to: Option<i64>) -> Self {
        Self {
            room_id,
            sender_user_id: Some(sender),
            message_type: MessageType::Text,
            service_action: None,
            reply_to_message_id: reply_to,
            content,
            sent_at: Utc::now(),
        }
    }

    pub fn service(room_id: Uuid, action: ServiceAction, content: String) -> Self {
        Self {
            room_id,
            sender_user_id: None,
            message_type: MessageType::Service,
            service_action: Some(action),
            reply_to_message_id: None,
            content,
            sent_at: Utc::now(),
        }
    }
}

/// One append-only entry in a message's edit history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdit {
    pub id: i64,
    pub message_id: i64,
    pub edited_by_user_id: Uuid,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

//=========================================================================================
// Relationships
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One row per unordered pair, stored as `(min, max)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friendship {
    pub id: Uuid,
    pub user_low: Uuid,
    pub user_high: Uuid,
    pub status: FriendshipStatus,
    pub initiator_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Friendship {
    /// Orders a pair of user ids the way friendship rows store them.
    pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn other(&self, user_id: Uuid) -> Uuid {
        if self.user_low == user_id {
            self.user_high
        } else {
            self.user_low
        }
    }
}

/// Directional: `blocker` has blocked `blocked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedUser {
    pub blocker_user_id: Uuid,
    pub blocked_user_id: Uuid,
    pub blocked_at: DateTime<Utc>,
}

//=========================================================================================
// Text representations (used by storage adapters)
//=========================================================================================

/// Error returned when a stored enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($ty::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

text_enum!(RoomType, "room type", {
    Global => "global",
    Direct => "direct",
    Group => "group",
});

text_enum!(MemberRole, "member role", {
    Owner => "owner",
    Admin => "admin",
    Member => "member",
});

text_enum!(MessageType, "message type", {
    Text => "text",
    Service => "service",
});

text_enum!(ServiceAction, "service action", {
    UserJoined => "user_joined",
    UserLeft => "user_left",
    RoomRenamed => "room_renamed",
    MemberRoleChanged => "member_role_changed",
    OwnershipTransferred => "ownership_transferred",
});

text_enum!(FriendshipStatus, "friendship status", {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(Friendship::canonical_pair(a, b), Friendship::canonical_pair(b, a));
    }

    #[test]
    fn enum_labels_parse_back() {
        assert_eq!("group".parse::<RoomType>(), Ok(RoomType::Group));
        assert_eq!("owner".parse::<MemberRole>(), Ok(MemberRole::Owner));
        assert_eq!(
            "member_role_changed".parse::<ServiceAction>(),
            Ok(ServiceAction::MemberRoleChanged)
        );
        assert!("moderator".parse::<MemberRole>().is_err());
    }

    #[test]
    fn only_owner_and_admin_manage() {
        assert!(MemberRole::Owner.can_manage());
        assert!(MemberRole::Admin.can_manage());
        assert!(!MemberRole::Member.can_manage());
    }

    #[test]
    fn left_member_reports_left_at() {
        let now = Utc::now();
        let member = RoomMember {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role: MemberRole::Member,
            joined_at: now,
            state: MembershipState::Left { left_at: now },
            is_muted: false,
        };
        assert!(!member.is_active());
        assert_eq!(member.left_at(), Some(now));
    }
}
