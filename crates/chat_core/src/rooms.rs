//! crates/chat_core/src/rooms.rs
//!
//! Room lifecycle and the per-(room, user) membership state machine:
//! `NotMember -> Member -> Left -> Member -> ...`, with `Owner` a sub-state of
//! `Member` that can only be left through an ownership transfer.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    MemberRole, MembershipState, Message, NewMessage, Room, RoomMember, RoomSummary, RoomType,
    ServiceAction, User,
};
use crate::error::{ChatError, ChatResult};
use crate::ports::DatabaseService;
use crate::relationships::RelationshipGate;

pub const MAX_ROOM_NAME_LENGTH: usize = 100;
pub const MAX_ROOM_DESCRIPTION_LENGTH: usize = 500;

//=========================================================================================
// Supporting Types
//=========================================================================================

/// How a user reaches a room.
#[derive(Debug, Clone)]
pub enum RoomAccess {
    /// The Global room: every authenticated user, no membership row.
    Implicit,
    Member(RoomMember),
}

impl RoomAccess {
    pub fn role(&self) -> Option<MemberRole> {
        match self {
            RoomAccess::Implicit => None,
            RoomAccess::Member(member) => Some(member.role),
        }
    }
}

/// Who is notified about something that happened in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected user (Global room).
    Everyone,
    Users(Vec<Uuid>),
}

/// Optional changes to a room. `Some("")` clears description/avatar.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// A membership row change and the service message committed with it.
#[derive(Debug, Clone)]
pub struct MembershipChange {
    pub member: RoomMember,
    pub notice: Message,
}

fn normalize_name(name: &str) -> ChatResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("Room name cannot be empty"));
    }
    if name.chars().count() > MAX_ROOM_NAME_LENGTH {
        return Err(ChatError::validation(format!(
            "Room name cannot exceed {MAX_ROOM_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

fn normalize_optional(value: Option<String>, limit: usize, field: &str) -> ChatResult<Option<String>> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v.chars().count() > limit => Err(ChatError::validation(format!(
            "{field} cannot exceed {limit} characters"
        ))),
        other => Ok(other),
    }
}

fn require_group(room: &Room, action: &str) -> ChatResult<()> {
    match room.room_type {
        RoomType::Group => Ok(()),
        RoomType::Global => Err(ChatError::forbidden(format!("Cannot {action} the global room"))),
        RoomType::Direct => Err(ChatError::forbidden(format!(
            "Cannot {action} a direct conversation"
        ))),
    }
}

//=========================================================================================
// RoomEngine
//=========================================================================================

#[derive(Clone)]
pub struct RoomEngine {
    db: Arc<dyn DatabaseService>,
    gate: RelationshipGate,
}

impl RoomEngine {
    pub fn new(db: Arc<dyn DatabaseService>, gate: RelationshipGate) -> Self {
        Self { db, gate }
    }

    pub async fn global_room(&self) -> ChatResult<Room> {
        Ok(self.db.ensure_global_room().await?)
    }

    pub async fn get_room(&self, room_id: Uuid) -> ChatResult<Room> {
        match self.db.get_room(room_id).await {
            Ok(room) => Ok(room),
            Err(crate::ports::PortError::NotFound(_)) => Err(ChatError::not_found("Room not found")),
            Err(e) => Err(e.into()),
        }
    }

    /// Read/write access check shared by sending and reading.
    pub async fn access(&self, room: &Room, user_id: Uuid) -> ChatResult<RoomAccess> {
        if room.is_global {
            return Ok(RoomAccess::Implicit);
        }
        match self.db.get_member(room.id, user_id).await? {
            Some(member) if member.is_active() => Ok(RoomAccess::Member(member)),
            _ => Err(ChatError::forbidden("You are not a member of this room")),
        }
    }

    async fn require_manager(&self, room: &Room, user_id: Uuid) -> ChatResult<RoomMember> {
        match self.access(room, user_id).await? {
            RoomAccess::Member(member) if member.role.can_manage() => Ok(member),
            _ => Err(ChatError::forbidden(
                "Only the room owner or an admin can do this",
            )),
        }
    }

    async fn require_owner(&self, room: &Room, user_id: Uuid) -> ChatResult<RoomMember> {
        match self.access(room, user_id).await? {
            RoomAccess::Member(member) if member.role == MemberRole::Owner => Ok(member),
            _ => Err(ChatError::forbidden("Only the room owner can do this")),
        }
    }

    async fn require_active_member(&self, room: &Room, user_id: Uuid) -> ChatResult<RoomMember> {
        self.db
            .get_member(room.id, user_id)
            .await?
            .filter(RoomMember::is_active)
            .ok_or_else(|| ChatError::not_found("User is not a member of this room"))
    }

    async fn username(&self, user_id: Uuid) -> ChatResult<String> {
        Ok(self.db.get_user(user_id).await?.username)
    }

    /// Resolves every id to a user, failing if any is unknown.
    async fn users(&self, user_ids: &[Uuid]) -> ChatResult<Vec<User>> {
        let users = self.db.get_users(user_ids).await?;
        if users.len() != user_ids.len() {
            return Err(ChatError::not_found("User not found"));
        }
        Ok(users)
    }

    /// Everyone who should hear about activity in `room`.
    pub async fn audience(&self, room: &Room) -> ChatResult<Audience> {
        if room.is_global {
            return Ok(Audience::Everyone);
        }
        let members = self.db.list_active_members(room.id).await?;
        Ok(Audience::Users(members.into_iter().map(|m| m.user_id).collect()))
    }

    /// The Global room first, then the user's rooms by most recent update.
    pub async fn accessible_rooms(&self, user_id: Uuid) -> ChatResult<Vec<RoomSummary>> {
        let global = self.global_room().await?;
        let mut joined = self.db.list_rooms_for_user(user_id).await?;
        joined.sort_by(|(a, _), (b, _)| b.updated_at.cmp(&a.updated_at));

        let mut rooms = vec![RoomSummary {
            room: global,
            role: None,
            is_muted: false,
        }];
        rooms.extend(joined.into_iter().map(|(room, member)| RoomSummary {
            room,
            role: Some(member.role),
            is_muted: member.is_muted,
        }));
        Ok(rooms)
    }

    /// Active members of a non-global room with their profiles.
    pub async fn members(&self, room_id: Uuid, user_id: Uuid) -> ChatResult<Vec<(RoomMember, User)>> {
        let room = self.get_room(room_id).await?;
        if room.is_global {
            return Err(ChatError::validation("The global room has no member list"));
        }
        self.access(&room, user_id).await?;

        let members = self.db.list_active_members(room.id).await?;
        let ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();
        let users = self.db.get_users(&ids).await?;
        Ok(members
            .into_iter()
            .filter_map(|member| {
                users
                    .iter()
                    .find(|u| u.id == member.user_id)
                    .cloned()
                    .map(|user| (member, user))
            })
            .collect())
    }

    //=====================================================================================
    // Creation, update, deletion
    //=====================================================================================

    /// Creates a Group room owned by `creator`, with `member_ids` joined as Members.
    pub async fn create_group(
        &self,
        creator: Uuid,
        name: &str,
        description: Option<String>,
        member_ids: &[Uuid],
    ) -> ChatResult<(Room, Vec<MembershipChange>)> {
        let name = normalize_name(name)?;
        let description =
            normalize_optional(description, MAX_ROOM_DESCRIPTION_LENGTH, "Description")?;

        let mut seen = HashSet::from([creator]);
        let invited: Vec<Uuid> = member_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let invited_users = self.users(&invited).await?;

        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_type: RoomType::Group,
            name: Some(name),
            description,
            avatar_url: None,
            is_global: false,
            created_by_user_id: Some(creator),
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        };

        let member_row = |user_id: Uuid, role: MemberRole| RoomMember {
            id: Uuid::new_v4(),
            room_id: room.id,
            user_id,
            role,
            joined_at: now,
            state: MembershipState::Active,
            is_muted: false,
        };
        let mut members = vec![member_row(creator, MemberRole::Owner)];
        let mut notices = Vec::with_capacity(invited.len());
        for user_id in &invited {
            members.push(member_row(*user_id, MemberRole::Member));
            let username = invited_users
                .iter()
                .find(|u| u.id == *user_id)
                .map(|u| u.username.clone())
                .unwrap_or_default();
            notices.push(NewMessage::service(
                room.id,
                ServiceAction::UserJoined,
                format!("{username} joined the room"),
            ));
        }

        let messages = self.db.create_room(&room, &members, &notices).await?;
        info!(room = %room.id, creator = %creator, members = members.len(), "group room created");

        let changes = members
            .into_iter()
            .skip(1)
            .zip(messages)
            .map(|(member, notice)| MembershipChange { member, notice })
            .collect();
        Ok((room, changes))
    }

    /// Returns the Direct room between the two users, creating it if needed.
    /// The flag is `true` when a new room was created.
    pub async fn open_direct(&self, creator: Uuid, other: Uuid) -> ChatResult<(Room, bool)> {
        if creator == other {
            return Err(ChatError::validation(
                "Cannot start a direct conversation with yourself",
            ));
        }
        self.users(&[other]).await?;
        self.gate.ensure_not_blocked(creator, other).await?;

        if let Some(existing) = self.db.find_direct_room(creator, other).await? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_type: RoomType::Direct,
            name: None,
            description: None,
            avatar_url: None,
            is_global: false,
            created_by_user_id: Some(creator),
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        };
        let members = [(creator, MemberRole::Owner), (other, MemberRole::Member)].map(
            |(user_id, role)| RoomMember {
                id: Uuid::new_v4(),
                room_id: room.id,
                user_id,
                role,
                joined_at: now,
                state: MembershipState::Active,
                is_muted: false,
            },
        );
        self.db.create_room(&room, &members, &[]).await?;
        info!(room = %room.id, "direct room created");
        Ok((room, true))
    }

    /// Applies a patch to a Group room. Returns the service message when renamed.
    pub async fn update(
        &self,
        actor: Uuid,
        room_id: Uuid,
        patch: RoomPatch,
    ) -> ChatResult<(Room, Option<Message>)> {
        let room = self.get_room(room_id).await?;
        require_group(&room, "modify")?;
        self.require_manager(&room, actor).await?;

        let mut updated = room.clone();
        if let Some(name) = patch.name.as_deref() {
            updated.name = Some(normalize_name(name)?);
        }
        if patch.description.is_some() {
            updated.description =
                normalize_optional(patch.description, MAX_ROOM_DESCRIPTION_LENGTH, "Description")?;
        }
        if patch.avatar_url.is_some() {
            updated.avatar_url = normalize_optional(patch.avatar_url, 2048, "Avatar URL")?;
        }
        if updated == room {
            return Ok((room, None));
        }
        updated.updated_at = Utc::now();

        let notice = if updated.name != room.name {
            let actor_name = self.username(actor).await?;
            Some(NewMessage::service(
                room.id,
                ServiceAction::RoomRenamed,
                format!(
                    "{actor_name} renamed the room to \"{}\"",
                    updated.name.as_deref().unwrap_or_default()
                ),
            ))
        } else {
            None
        };

        let message = self.db.update_room(&updated, notice.as_ref()).await?;
        info!(room = %room.id, actor = %actor, "room updated");
        Ok((updated, message))
    }

    /// Deletes a Group room. Returns it with the users who were active members.
    pub async fn delete(&self, actor: Uuid, room_id: Uuid) -> ChatResult<(Room, Vec<Uuid>)> {
        let room = self.get_room(room_id).await?;
        require_group(&room, "delete")?;
        self.require_manager(&room, actor).await?;

        let former: Vec<Uuid> = self
            .db
            .list_active_members(room.id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        self.db.delete_room(room.id).await?;
        info!(room = %room.id, actor = %actor, "room deleted");
        Ok((room, former))
    }

    //=====================================================================================
    // Membership transitions
    //=====================================================================================

    /// Joins (or re-joins) a Group room. The Global room needs no join, so the
    /// change is `None` there.
    pub async fn join(&self, user_id: Uuid, room_id: Uuid) -> ChatResult<(Room, Option<MembershipChange>)> {
        let room = self.get_room(room_id).await?;
        match room.room_type {
            RoomType::Global => return Ok((room, None)),
            RoomType::Direct => {
                return Err(ChatError::forbidden("Direct conversations cannot be joined"))
            }
            RoomType::Group => {}
        }

        if let Some(existing) = self.db.get_member(room.id, user_id).await? {
            if existing.is_active() {
                return Err(ChatError::validation("Already a member of this room"));
            }
        }

        let username = self.username(user_id).await?;
        let notice = NewMessage::service(
            room.id,
            ServiceAction::UserJoined,
            format!("{username} joined the room"),
        );
        let (member, notice) = self
            .db
            .activate_member(room.id, user_id, MemberRole::Member, Utc::now(), &notice)
            .await?;
        info!(room = %room.id, user = %user_id, "user joined room");
        Ok((room, Some(MembershipChange { member, notice })))
    }

    pub async fn leave(&self, user_id: Uuid, room_id: Uuid) -> ChatResult<(Room, MembershipChange)> {
        let room = self.get_room(room_id).await?;
        match room.room_type {
            RoomType::Global => return Err(ChatError::validation("Cannot leave the global room")),
            RoomType::Direct => {
                return Err(ChatError::validation("Cannot leave a direct conversation"))
            }
            RoomType::Group => {}
        }

        let member = self
            .db
            .get_member(room.id, user_id)
            .await?
            .filter(RoomMember::is_active)
            .ok_or_else(|| ChatError::validation("You are not a member of this room"))?;
        if member.role == MemberRole::Owner {
            return Err(ChatError::validation(
                "The owner must transfer ownership before leaving",
            ));
        }

        let username = self.username(user_id).await?;
        let notice = NewMessage::service(
            room.id,
            ServiceAction::UserLeft,
            format!("{username} left the room"),
        );
        let (member, notice) = self
            .db
            .deactivate_member(room.id, user_id, Utc::now(), &notice)
            .await?;
        info!(room = %room.id, user = %user_id, "user left room");
        Ok((room, MembershipChange { member, notice }))
    }

    /// Adds users to a Group room. Users already active are skipped.
    pub async fn add_members(
        &self,
        actor: Uuid,
        room_id: Uuid,
        user_ids: &[Uuid],
    ) -> ChatResult<(Room, Vec<MembershipChange>)> {
        if user_ids.is_empty() {
            return Err(ChatError::validation("No users specified"));
        }
        let room = self.get_room(room_id).await?;
        require_group(&room, "add members to")?;
        self.require_manager(&room, actor).await?;

        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = user_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let users = self.users(&unique).await?;

        let mut changes = Vec::new();
        for user in users {
            if let Some(existing) = self.db.get_member(room.id, user.id).await? {
                if existing.is_active() {
                    continue;
                }
            }
            let notice = NewMessage::service(
                room.id,
                ServiceAction::UserJoined,
                format!("{} joined the room", user.username),
            );
            let (member, notice) = self
                .db
                .activate_member(room.id, user.id, MemberRole::Member, Utc::now(), &notice)
                .await?;
            changes.push(MembershipChange { member, notice });
        }
        info!(room = %room.id, actor = %actor, added = changes.len(), "members added");
        Ok((room, changes))
    }

    /// Removes members from a Group room. Admins may remove Members; only the
    /// Owner may remove Admins; the Owner cannot be removed.
    pub async fn remove_members(
        &self,
        actor: Uuid,
        room_id: Uuid,
        user_ids: &[Uuid],
    ) -> ChatResult<(Room, Vec<MembershipChange>)> {
        if user_ids.is_empty() {
            return Err(ChatError::validation("No users specified"));
        }
        let room = self.get_room(room_id).await?;
        require_group(&room, "remove members from")?;
        let actor_member = self.require_manager(&room, actor).await?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for user_id in user_ids.iter().copied().filter(|id| seen.insert(*id)) {
            if user_id == actor {
                return Err(ChatError::validation(
                    "Use leave to remove yourself from a room",
                ));
            }
            let Some(target) = self
                .db
                .get_member(room.id, user_id)
                .await?
                .filter(RoomMember::is_active)
            else {
                continue;
            };
            match target.role {
                MemberRole::Owner => {
                    return Err(ChatError::forbidden("The room owner cannot be removed"))
                }
                MemberRole::Admin if actor_member.role != MemberRole::Owner => {
                    return Err(ChatError::forbidden("Only the room owner can remove an admin"))
                }
                _ => targets.push(target),
            }
        }

        let mut changes = Vec::with_capacity(targets.len());
        for target in targets {
            let username = self.username(target.user_id).await?;
            let notice = NewMessage::service(
                room.id,
                ServiceAction::UserLeft,
                format!("{username} was removed from the room"),
            );
            let (member, notice) = self
                .db
                .deactivate_member(room.id, target.user_id, Utc::now(), &notice)
                .await?;
            changes.push(MembershipChange { member, notice });
        }
        info!(room = %room.id, actor = %actor, removed = changes.len(), "members removed");
        Ok((room, changes))
    }

    /// Changes a member's role between Admin and Member. Owner only.
    pub async fn change_role(
        &self,
        actor: Uuid,
        room_id: Uuid,
        target: Uuid,
        role: MemberRole,
    ) -> ChatResult<(Room, MembershipChange)> {
        let room = self.get_room(room_id).await?;
        require_group(&room, "change roles in")?;
        self.require_owner(&room, actor).await?;

        if role == MemberRole::Owner {
            return Err(ChatError::validation(
                "Use ownership transfer to change the room owner",
            ));
        }
        if target == actor {
            return Err(ChatError::validation("Cannot change your own role"));
        }
        let member = self.require_active_member(&room, target).await?;
        if member.role == role {
            return Err(ChatError::validation(format!("Member is already {role}")));
        }

        let username = self.username(target).await?;
        let notice = NewMessage::service(
            room.id,
            ServiceAction::MemberRoleChanged,
            format!("{username} is now {role}"),
        );
        let (member, notice) = self.db.set_member_role(room.id, target, role, &notice).await?;
        info!(room = %room.id, target = %target, role = %role, "member role changed");
        Ok((room, MembershipChange { member, notice }))
    }

    /// Hands ownership to another active member; the old Owner becomes Admin.
    pub async fn transfer_ownership(
        &self,
        actor: Uuid,
        room_id: Uuid,
        target: Uuid,
    ) -> ChatResult<(Room, Message)> {
        let room = self.get_room(room_id).await?;
        require_group(&room, "transfer ownership of")?;
        self.require_owner(&room, actor).await?;
        if target == actor {
            return Err(ChatError::validation("You already own this room"));
        }
        self.require_active_member(&room, target).await?;

        let actor_name = self.username(actor).await?;
        let target_name = self.username(target).await?;
        let notice = NewMessage::service(
            room.id,
            ServiceAction::OwnershipTransferred,
            format!("{actor_name} transferred ownership to {target_name}"),
        );
        let message = self.db.swap_owner(room.id, actor, target, &notice).await?;
        info!(room = %room.id, from = %actor, to = %target, "ownership transferred");
        Ok((room, message))
    }

    pub async fn set_muted(&self, user_id: Uuid, room_id: Uuid, is_muted: bool) -> ChatResult<RoomMember> {
        let room = self.get_room(room_id).await?;
        if room.is_global {
            return Err(ChatError::validation("The global room cannot be muted"));
        }
        self.access(&room, user_id).await?;
        Ok(self.db.set_member_muted(room.id, user_id, is_muted).await?)
    }

    /// Sets or clears the room's pinned message.
    pub async fn set_pinned(
        &self,
        actor: Uuid,
        room_id: Uuid,
        message_id: Option<i64>,
    ) -> ChatResult<Room> {
        let room = self.get_room(room_id).await?;
        self.require_manager(&room, actor).await?;

        if let Some(message_id) = message_id {
            let message = match self.db.get_message(message_id).await {
                Ok(message) => message,
                Err(crate::ports::PortError::NotFound(_)) => {
                    return Err(ChatError::validation("Message to pin not found"))
                }
                Err(e) => return Err(e.into()),
            };
            if message.room_id != room.id || message.is_deleted {
                return Err(ChatError::validation("Message to pin not found in this room"));
            }
        }

        let updated = Room {
            pinned_message_id: message_id,
            updated_at: Utc::now(),
            ..room
        };
        self.db.update_room(&updated, None).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_are_trimmed_and_bounded() {
        assert_eq!(normalize_name("  Team  ").unwrap(), "Team");
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name(&"x".repeat(MAX_ROOM_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn empty_optional_fields_clear() {
        assert_eq!(normalize_optional(Some("  ".into()), 10, "Field").unwrap(), None);
        assert_eq!(
            normalize_optional(Some(" hi ".into()), 10, "Field").unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(normalize_optional(None, 10, "Field").unwrap(), None);
        assert!(normalize_optional(Some("x".repeat(11)), 10, "Field").is_err());
    }

    #[test]
    fn access_role_reflects_membership() {
        assert_eq!(RoomAccess::Implicit.role(), None);
    }
}
