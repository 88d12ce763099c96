//! services/api/src/adapters/memory.rs
//!
//! A process-local implementation of the `DatabaseService` port. All state sits
//! behind one `tokio::sync::Mutex`, so each port call is applied as a unit just
//! like a database transaction. Used by the test-suite and for
//! `DATABASE_URL=memory://` runs.

use async_trait::async_trait;
use chat_core::domain::{
    BlockedUser, Friendship, MemberRole, MembershipState, Message, MessageEdit, NewMessage, Room,
    RoomMember, RoomType, Session, User, UserCredentials,
};
use chat_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

struct UserRow {
    user: User,
    hashed_password: String,
}

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, UserRow>,
    sessions: HashMap<Uuid, Session>,
    rooms: HashMap<Uuid, Room>,
    members: HashMap<(Uuid, Uuid), RoomMember>,
    messages: BTreeMap<i64, NewMessage>,
    edits: Vec<MessageEdit>,
    deletions: HashMap<i64, (Uuid, DateTime<Utc>)>,
    friendships: HashMap<(Uuid, Uuid), Friendship>,
    blocks: HashMap<(Uuid, Uuid), BlockedUser>,
    last_message_id: i64,
    last_edit_id: i64,
}

impl Store {
    fn user(&self, user_id: Uuid) -> PortResult<&UserRow> {
        self.users
            .get(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    fn room(&self, room_id: Uuid) -> PortResult<&Room> {
        self.rooms
            .get(&room_id)
            .ok_or_else(|| PortError::NotFound(format!("Room {} not found", room_id)))
    }

    fn member_mut(&mut self, room_id: Uuid, user_id: Uuid) -> PortResult<&mut RoomMember> {
        self.members.get_mut(&(room_id, user_id)).ok_or_else(|| {
            PortError::NotFound(format!("Membership of {} in {} not found", user_id, room_id))
        })
    }

    /// Builds the current view of a message from its edit and deletion logs.
    fn message(&self, message_id: i64) -> PortResult<Message> {
        let row = self
            .messages
            .get(&message_id)
            .ok_or_else(|| PortError::NotFound(format!("Message {} not found", message_id)))?;
        let latest_edit = self.edits.iter().rev().find(|e| e.message_id == message_id);
        Ok(Message {
            id: message_id,
            room_id: row.room_id,
            sender_user_id: row.sender_user_id,
            sender_username: row
                .sender_user_id
                .and_then(|id| self.users.get(&id))
                .map(|u| u.user.username.clone()),
            message_type: row.message_type,
            service_action: row.service_action,
            reply_to_message_id: row.reply_to_message_id,
            content: latest_edit
                .map(|e| e.content.clone())
                .unwrap_or_else(|| row.content.clone()),
            sent_at: row.sent_at,
            edited_at: latest_edit.map(|e| e.edited_at),
            is_deleted: self.deletions.contains_key(&message_id),
        })
    }

    fn insert_message(&mut self, message: &NewMessage) -> PortResult<Message> {
        self.room(message.room_id)?;
        self.last_message_id += 1;
        let id = self.last_message_id;
        self.messages.insert(id, message.clone());
        self.message(id)
    }

    fn sessions_where<F>(&mut self, predicate: F) -> Vec<Session>
    where
        F: Fn(&Session) -> bool,
    {
        let ids: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| predicate(*s))
            .map(|s| s.id)
            .collect();
        ids.iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }
}

//=========================================================================================
// The Adapter
//=========================================================================================

#[derive(Default)]
pub struct InMemoryDb {
    store: Mutex<Store>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseService for InMemoryDb {
    // --- Users ---
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        let mut store = self.store.lock().await;
        let lowered = username.to_lowercase();
        if store
            .users
            .values()
            .any(|row| row.user.username.to_lowercase() == lowered)
        {
            return Err(PortError::Conflict(format!("Username {} is taken", username)));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            is_online: false,
            last_seen_at: None,
            created_at: Utc::now(),
        };
        store.users.insert(
            user.id,
            UserRow {
                user: user.clone(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let store = self.store.lock().await;
        Ok(store.user(user_id)?.user.clone())
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> PortResult<Vec<User>> {
        let store = self.store.lock().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| store.users.get(id))
            .map(|row| row.user.clone())
            .collect())
    }

    async fn get_credentials_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let store = self.store.lock().await;
        let lowered = username.to_lowercase();
        store
            .users
            .values()
            .find(|row| row.user.username.to_lowercase() == lowered)
            .map(|row| UserCredentials {
                user_id: row.user.id,
                username: row.user.username.clone(),
                hashed_password: row.hashed_password.clone(),
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", username)))
    }

    async fn search_users(&self, query: &str, limit: u32) -> PortResult<Vec<User>> {
        let store = self.store.lock().await;
        let needle = query.to_lowercase();
        let mut found: Vec<User> = store
            .users
            .values()
            .filter(|row| row.user.username.to_lowercase().contains(&needle))
            .map(|row| row.user.clone())
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn set_user_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut store = self.store.lock().await;
        let row = store
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        row.user.is_online = is_online;
        row.user.last_seen_at = Some(at);
        Ok(())
    }

    // --- Sessions ---
    async fn create_session(&self, session: &Session) -> PortResult<()> {
        let mut store = self.store.lock().await;
        store.user(session.user_id)?;
        if store.sessions.values().any(|s| s.token == session.token) {
            return Err(PortError::Conflict("Session token already exists".to_string()));
        }
        store.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let store = self.store.lock().await;
        store
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session> {
        let store = self.store.lock().await;
        store
            .sessions
            .values()
            .find(|s| s.token == token)
            .cloned()
            .ok_or_else(|| PortError::NotFound("Session not found".to_string()))
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let store = self.store.lock().await;
        let mut sessions: Vec<Session> = store
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<Session> {
        let mut store = self.store.lock().await;
        let session = store
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        session.last_activity_at = last_activity_at;
        session.expires_at = expires_at;
        Ok(session.clone())
    }

    async fn update_session_device(
        &self,
        session_id: Uuid,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> PortResult<()> {
        let mut store = self.store.lock().await;
        let session = store
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        if let Some(device_info) = device_info {
            session.device_info = Some(device_info.to_string());
        }
        if let Some(ip_address) = ip_address {
            session.ip_address = Some(ip_address.to_string());
        }
        Ok(())
    }

    async fn delete_sessions(&self, user_id: Uuid, session_ids: &[Uuid]) -> PortResult<Vec<Session>> {
        let mut store = self.store.lock().await;
        Ok(store.sessions_where(|s| s.user_id == user_id && session_ids.contains(&s.id)))
    }

    async fn delete_sessions_except(&self, user_id: Uuid, keep: Uuid) -> PortResult<Vec<Session>> {
        let mut store = self.store.lock().await;
        Ok(store.sessions_where(|s| s.user_id == user_id && s.id != keep))
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<Vec<Session>> {
        let mut store = self.store.lock().await;
        Ok(store.sessions_where(|s| s.is_expired_at(now)))
    }

    // --- Rooms ---
    async fn ensure_global_room(&self) -> PortResult<Room> {
        let mut store = self.store.lock().await;
        if let Some(room) = store.rooms.values().find(|r| r.is_global) {
            return Ok(room.clone());
        }
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_type: RoomType::Global,
            name: Some("Global".to_string()),
            description: None,
            avatar_url: None,
            is_global: true,
            created_by_user_id: None,
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        };
        store.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: Uuid) -> PortResult<Room> {
        let store = self.store.lock().await;
        store.room(room_id).cloned()
    }

    async fn create_room(
        &self,
        room: &Room,
        members: &[RoomMember],
        notices: &[NewMessage],
    ) -> PortResult<Vec<Message>> {
        let mut store = self.store.lock().await;
        if store.rooms.contains_key(&room.id) {
            return Err(PortError::Conflict(format!("Room {} already exists", room.id)));
        }
        for member in members {
            store.user(member.user_id)?;
        }
        store.rooms.insert(room.id, room.clone());
        for member in members {
            store
                .members
                .insert((member.room_id, member.user_id), member.clone());
        }
        notices
            .iter()
            .map(|notice| store.insert_message(notice))
            .collect()
    }

    async fn update_room(&self, room: &Room, notice: Option<&NewMessage>) -> PortResult<Option<Message>> {
        let mut store = self.store.lock().await;
        store.room(room.id)?;
        store.rooms.insert(room.id, room.clone());
        notice.map(|n| store.insert_message(n)).transpose()
    }

    async fn delete_room(&self, room_id: Uuid) -> PortResult<()> {
        let mut store = self.store.lock().await;
        if store.rooms.remove(&room_id).is_none() {
            return Err(PortError::NotFound(format!("Room {} not found", room_id)));
        }
        store.members.retain(|(room, _), _| *room != room_id);
        let doomed: Vec<i64> = store
            .messages
            .iter()
            .filter(|(_, m)| m.room_id == room_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            store.messages.remove(id);
            store.deletions.remove(id);
        }
        store.edits.retain(|e| !doomed.contains(&e.message_id));
        Ok(())
    }

    async fn find_direct_room(&self, a: Uuid, b: Uuid) -> PortResult<Option<Room>> {
        let store = self.store.lock().await;
        Ok(store
            .rooms
            .values()
            .filter(|r| r.room_type == RoomType::Direct)
            .find(|r| {
                store.members.contains_key(&(r.id, a)) && store.members.contains_key(&(r.id, b))
            })
            .cloned())
    }

    async fn list_rooms_for_user(&self, user_id: Uuid) -> PortResult<Vec<(Room, RoomMember)>> {
        let store = self.store.lock().await;
        Ok(store
            .members
            .values()
            .filter(|m| m.user_id == user_id && m.is_active())
            .filter_map(|m| store.rooms.get(&m.room_id).map(|r| (r.clone(), m.clone())))
            .collect())
    }

    // --- Membership ---
    async fn get_member(&self, room_id: Uuid, user_id: Uuid) -> PortResult<Option<RoomMember>> {
        let store = self.store.lock().await;
        Ok(store.members.get(&(room_id, user_id)).cloned())
    }

    async fn list_active_members(&self, room_id: Uuid) -> PortResult<Vec<RoomMember>> {
        let store = self.store.lock().await;
        let mut members: Vec<RoomMember> = store
            .members
            .values()
            .filter(|m| m.room_id == room_id && m.is_active())
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        Ok(members)
    }

    async fn activate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut store = self.store.lock().await;
        store.room(room_id)?;
        store.user(user_id)?;
        let member = store
            .members
            .entry((room_id, user_id))
            .and_modify(|m| {
                m.role = role;
                m.joined_at = at;
                m.state = MembershipState::Active;
                m.is_muted = false;
            })
            .or_insert_with(|| RoomMember {
                id: Uuid::new_v4(),
                room_id,
                user_id,
                role,
                joined_at: at,
                state: MembershipState::Active,
                is_muted: false,
            })
            .clone();
        let message = store.insert_message(notice)?;
        Ok((member, message))
    }

    async fn deactivate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut store = self.store.lock().await;
        store.room(room_id)?;
        let member = store.member_mut(room_id, user_id)?;
        member.state = MembershipState::Left { left_at: at };
        let member = member.clone();
        let message = store.insert_message(notice)?;
        Ok((member, message))
    }

    async fn set_member_role(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut store = self.store.lock().await;
        store.room(room_id)?;
        let member = store.member_mut(room_id, user_id)?;
        member.role = role;
        let member = member.clone();
        let message = store.insert_message(notice)?;
        Ok((member, message))
    }

    async fn swap_owner(
        &self,
        room_id: Uuid,
        from: Uuid,
        to: Uuid,
        notice: &NewMessage,
    ) -> PortResult<Message> {
        let mut store = self.store.lock().await;
        store.room(room_id)?;
        if store.member_mut(room_id, from)?.role != MemberRole::Owner {
            return Err(PortError::Conflict(format!("{} does not own room {}", from, room_id)));
        }
        store.member_mut(room_id, to)?;

        store.member_mut(room_id, from)?.role = MemberRole::Admin;
        store.member_mut(room_id, to)?.role = MemberRole::Owner;
        store.insert_message(notice)
    }

    async fn set_member_muted(&self, room_id: Uuid, user_id: Uuid, is_muted: bool) -> PortResult<RoomMember> {
        let mut store = self.store.lock().await;
        let member = store.member_mut(room_id, user_id)?;
        member.is_muted = is_muted;
        Ok(member.clone())
    }

    // --- Messages ---
    async fn insert_message(&self, message: &NewMessage) -> PortResult<Message> {
        let mut store = self.store.lock().await;
        store.insert_message(message)
    }

    async fn get_message(&self, message_id: i64) -> PortResult<Message> {
        let store = self.store.lock().await;
        store.message(message_id)
    }

    async fn list_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<i64>,
    ) -> PortResult<Vec<Message>> {
        let store = self.store.lock().await;
        let upper = before.unwrap_or(i64::MAX);
        store
            .messages
            .range(..upper)
            .rev()
            .filter(|(id, m)| m.room_id == room_id && !store.deletions.contains_key(id))
            .take(limit as usize)
            .map(|(id, _)| store.message(*id))
            .collect()
    }

    async fn insert_edit(
        &self,
        message_id: i64,
        edited_by: Uuid,
        content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<MessageEdit> {
        let mut store = self.store.lock().await;
        store.message(message_id)?;
        store.last_edit_id += 1;
        let edit = MessageEdit {
            id: store.last_edit_id,
            message_id,
            edited_by_user_id: edited_by,
            content: content.to_string(),
            edited_at: at,
        };
        store.edits.push(edit.clone());
        Ok(edit)
    }

    async fn insert_deletion(&self, message_id: i64, deleted_by: Uuid, at: DateTime<Utc>) -> PortResult<()> {
        let mut store = self.store.lock().await;
        store.message(message_id)?;
        if store.deletions.contains_key(&message_id) {
            return Err(PortError::Conflict(format!("Message {} already deleted", message_id)));
        }
        store.deletions.insert(message_id, (deleted_by, at));
        Ok(())
    }

    async fn list_edits(&self, message_id: i64) -> PortResult<Vec<MessageEdit>> {
        let store = self.store.lock().await;
        Ok(store
            .edits
            .iter()
            .filter(|e| e.message_id == message_id)
            .cloned()
            .collect())
    }

    // --- Relationships ---
    async fn get_friendship(&self, a: Uuid, b: Uuid) -> PortResult<Option<Friendship>> {
        let store = self.store.lock().await;
        Ok(store.friendships.get(&Friendship::canonical_pair(a, b)).cloned())
    }

    async fn save_friendship(&self, friendship: &Friendship) -> PortResult<()> {
        let mut store = self.store.lock().await;
        store.friendships.insert(
            (friendship.user_low, friendship.user_high),
            friendship.clone(),
        );
        Ok(())
    }

    async fn delete_friendship(&self, a: Uuid, b: Uuid) -> PortResult<bool> {
        let mut store = self.store.lock().await;
        Ok(store
            .friendships
            .remove(&Friendship::canonical_pair(a, b))
            .is_some())
    }

    async fn list_friendships(&self, user_id: Uuid) -> PortResult<Vec<Friendship>> {
        let store = self.store.lock().await;
        let mut friendships: Vec<Friendship> = store
            .friendships
            .values()
            .filter(|f| f.user_low == user_id || f.user_high == user_id)
            .cloned()
            .collect();
        friendships.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(friendships)
    }

    async fn block_user(&self, blocker: Uuid, blocked: Uuid, at: DateTime<Utc>) -> PortResult<()> {
        let mut store = self.store.lock().await;
        store
            .blocks
            .entry((blocker, blocked))
            .or_insert_with(|| BlockedUser {
                blocker_user_id: blocker,
                blocked_user_id: blocked,
                blocked_at: at,
            });
        Ok(())
    }

    async fn unblock_user(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool> {
        let mut store = self.store.lock().await;
        Ok(store.blocks.remove(&(blocker, blocked)).is_some())
    }

    async fn is_blocked(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool> {
        let store = self.store.lock().await;
        Ok(store.blocks.contains_key(&(blocker, blocked)))
    }

    async fn list_blocked(&self, blocker: Uuid) -> PortResult<Vec<BlockedUser>> {
        let store = self.store.lock().await;
        let mut blocked: Vec<BlockedUser> = store
            .blocks
            .values()
            .filter(|b| b.blocker_user_id == blocker)
            .cloned()
            .collect();
        blocked.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::domain::ServiceAction;

    async fn seeded() -> (InMemoryDb, User, Room) {
        let db = InMemoryDb::new();
        let user = db.create_user("alice", "hash").await.unwrap();
        let room = db.ensure_global_room().await.unwrap();
        (db, user, room)
    }

    #[tokio::test]
    async fn usernames_collide_case_insensitively() {
        let (db, _, _) = seeded().await;
        assert!(matches!(
            db.create_user("ALICE", "hash").await,
            Err(PortError::Conflict(_))
        ));
        let creds = db.get_credentials_by_username("Alice").await.unwrap();
        assert_eq!(creds.username, "alice");
    }

    #[tokio::test]
    async fn global_room_is_created_once() {
        let (db, _, room) = seeded().await;
        assert_eq!(db.ensure_global_room().await.unwrap().id, room.id);
    }

    #[tokio::test]
    async fn message_view_reflects_edits_and_deletion() {
        let (db, user, room) = seeded().await;
        let sent = db
            .insert_message(&NewMessage::text(room.id, user.id, "one".into(), None))
            .await
            .unwrap();
        assert_eq!(sent.sender_username.as_deref(), Some("alice"));

        db.insert_edit(sent.id, user.id, "two", Utc::now()).await.unwrap();
        db.insert_edit(sent.id, user.id, "three", Utc::now()).await.unwrap();
        let current = db.get_message(sent.id).await.unwrap();
        assert_eq!(current.content, "three");
        assert!(current.is_edited());
        assert_eq!(db.list_edits(sent.id).await.unwrap().len(), 2);

        db.insert_deletion(sent.id, user.id, Utc::now()).await.unwrap();
        assert!(db.get_message(sent.id).await.unwrap().is_deleted);
        assert!(db.list_messages(room.id, 10, None).await.unwrap().is_empty());
        assert!(matches!(
            db.insert_deletion(sent.id, user.id, Utc::now()).await,
            Err(PortError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn history_pages_newest_first_below_cursor() {
        let (db, user, room) = seeded().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = db
                .insert_message(&NewMessage::text(room.id, user.id, format!("m{i}"), None))
                .await
                .unwrap();
            ids.push(m.id);
        }
        let page = db.list_messages(room.id, 2, Some(ids[3])).await.unwrap();
        let got: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn rejoin_revives_the_same_row() {
        let (db, user, _) = seeded().await;
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_type: RoomType::Group,
            name: Some("Team".into()),
            description: None,
            avatar_url: None,
            is_global: false,
            created_by_user_id: Some(user.id),
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        };
        db.create_room(&room, &[], &[]).await.unwrap();
        let notice = NewMessage::service(room.id, ServiceAction::UserJoined, "joined".into());

        let (first, _) = db
            .activate_member(room.id, user.id, MemberRole::Member, now, &notice)
            .await
            .unwrap();
        let (left, _) = db
            .deactivate_member(room.id, user.id, Utc::now(), &notice)
            .await
            .unwrap();
        assert!(!left.is_active());
        let (again, _) = db
            .activate_member(room.id, user.id, MemberRole::Member, Utc::now(), &notice)
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert!(again.is_active());
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let (db, user, _) = seeded().await;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token: "t".into(),
            user_id: user.id,
            device_info: None,
            ip_address: None,
            created_at: now,
            expires_at: now,
            last_activity_at: now,
        };
        db.create_session(&session).await.unwrap();
        let swept = db.delete_expired_sessions(now).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert!(db.get_session(session.id).await.is_err());
    }
}
