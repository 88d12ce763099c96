//! crates/chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) the broker depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database and password hashing implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    BlockedUser, Friendship, MemberRole, Message, MessageEdit, NewMessage, Room, RoomMember,
    Session, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Port
//=========================================================================================

/// The transactional store behind the broker.
///
/// Every method is atomic on its own. Methods that take a `notice` persist the
/// membership/room change and the service message together or not at all.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users ---
    /// Fails with `Conflict` when the username is taken (case-insensitive).
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_users(&self, user_ids: &[Uuid]) -> PortResult<Vec<User>>;

    /// Case-insensitive lookup.
    async fn get_credentials_by_username(&self, username: &str) -> PortResult<UserCredentials>;

    async fn search_users(&self, query: &str, limit: u32) -> PortResult<Vec<User>>;

    async fn set_user_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    // --- Sessions ---
    async fn create_session(&self, session: &Session) -> PortResult<()>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session>;

    /// All sessions of a user, most recently active first.
    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>>;

    /// Slides the expiry window. Fails with `NotFound` if the session was revoked.
    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<Session>;

    async fn update_session_device(
        &self,
        session_id: Uuid,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> PortResult<()>;

    /// Deletes the given sessions of `user_id` and returns the rows actually removed.
    async fn delete_sessions(&self, user_id: Uuid, session_ids: &[Uuid]) -> PortResult<Vec<Session>>;

    /// Deletes every session of `user_id` except `keep`.
    async fn delete_sessions_except(&self, user_id: Uuid, keep: Uuid) -> PortResult<Vec<Session>>;

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<Vec<Session>>;

    // --- Rooms ---
    /// Returns the single Global room, creating it if missing.
    async fn ensure_global_room(&self) -> PortResult<Room>;

    async fn get_room(&self, room_id: Uuid) -> PortResult<Room>;

    /// Inserts the room, its initial membership rows and their service messages.
    async fn create_room(
        &self,
        room: &Room,
        members: &[RoomMember],
        notices: &[NewMessage],
    ) -> PortResult<Vec<Message>>;

    async fn update_room(&self, room: &Room, notice: Option<&NewMessage>) -> PortResult<Option<Message>>;

    /// Removes the room along with its memberships and messages.
    async fn delete_room(&self, room_id: Uuid) -> PortResult<()>;

    async fn find_direct_room(&self, a: Uuid, b: Uuid) -> PortResult<Option<Room>>;

    /// Rooms where `user_id` is an active member, with that membership.
    async fn list_rooms_for_user(&self, user_id: Uuid) -> PortResult<Vec<(Room, RoomMember)>>;

    // --- Membership ---
    async fn get_member(&self, room_id: Uuid, user_id: Uuid) -> PortResult<Option<RoomMember>>;

    async fn list_active_members(&self, room_id: Uuid) -> PortResult<Vec<RoomMember>>;

    /// Inserts the membership row, or revives the existing one with `role`.
    async fn activate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)>;

    /// Soft leave: stamps `left_at`, keeps the row.
    async fn deactivate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)>;

    async fn set_member_role(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)>;

    /// Demotes `from` to Admin and promotes `to` to Owner in one unit.
    async fn swap_owner(
        &self,
        room_id: Uuid,
        from: Uuid,
        to: Uuid,
        notice: &NewMessage,
    ) -> PortResult<Message>;

    async fn set_member_muted(&self, room_id: Uuid, user_id: Uuid, is_muted: bool) -> PortResult<RoomMember>;

    // --- Messages ---
    async fn insert_message(&self, message: &NewMessage) -> PortResult<Message>;

    /// Returns the message with its current content and deletion flag.
    async fn get_message(&self, message_id: i64) -> PortResult<Message>;

    /// Non-deleted messages of a room, newest first, with ids below `before` if given.
    async fn list_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<i64>,
    ) -> PortResult<Vec<Message>>;

    async fn insert_edit(
        &self,
        message_id: i64,
        edited_by: Uuid,
        content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<MessageEdit>;

    /// Fails with `Conflict` if the message already carries a deletion record.
    async fn insert_deletion(&self, message_id: i64, deleted_by: Uuid, at: DateTime<Utc>) -> PortResult<()>;

    /// Edit history in the order the edits were made.
    async fn list_edits(&self, message_id: i64) -> PortResult<Vec<MessageEdit>>;

    // --- Relationships ---
    async fn get_friendship(&self, a: Uuid, b: Uuid) -> PortResult<Option<Friendship>>;

    /// Inserts or replaces the row for the friendship's pair.
    async fn save_friendship(&self, friendship: &Friendship) -> PortResult<()>;

    async fn delete_friendship(&self, a: Uuid, b: Uuid) -> PortResult<bool>;

    async fn list_friendships(&self, user_id: Uuid) -> PortResult<Vec<Friendship>>;

    /// Idempotent.
    async fn block_user(&self, blocker: Uuid, blocked: Uuid, at: DateTime<Utc>) -> PortResult<()>;

    async fn unblock_user(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool>;

    async fn is_blocked(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool>;

    async fn list_blocked(&self, blocker: Uuid) -> PortResult<Vec<BlockedUser>>;
}

//=========================================================================================
// Credential Hashing Port
//=========================================================================================

pub trait CredentialHasher: Send + Sync {
    /// Produces a self-describing hash string (algorithm, salt and digest).
    fn hash_password(&self, password: &str) -> PortResult<String>;

    /// Returns `false` on mismatch; errors only if the stored hash is unreadable.
    fn verify_password(&self, password: &str, hashed: &str) -> PortResult<bool>;
}
