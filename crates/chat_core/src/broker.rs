//! crates/chat_core/src/broker.rs
//!
//! The broker facade. Every public method authorizes and commits through the
//! components, and only after the store call has returned successfully does it
//! compute the recipients and publish events through the fan-out router.
//! A failure while resolving recipients is logged and never undoes or fails
//! the committed operation.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::accounts::{AccountService, AuthOutcome, DeviceDetails};
use crate::domain::{
    BlockedUser, MemberRole, Message, MessageEdit, Room, RoomMember, RoomSummary, RoomType,
    Session, SessionContext, User,
};
use crate::error::{ChatError, ChatResult};
use crate::events::{BrokerEvent, GroupKey};
use crate::fanout::{ConnectionGuard, EventSender, FanoutRouter};
use crate::messages::MessagePipeline;
use crate::ports::{CredentialHasher, DatabaseService};
use crate::relationships::RelationshipGate;
use crate::rooms::{Audience, MembershipChange, RoomEngine, RoomPatch};
use crate::sessions::SessionDirectory;
use crate::tokens::TokenService;

pub const MAX_SEARCH_RESULTS: u32 = 20;

//=========================================================================================
// Configuration and Requests
//=========================================================================================

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Added to `now` on every successful token validation.
    pub session_lifetime: Duration,
    /// Upper bound for a history page.
    pub message_page_limit: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            session_lifetime: Duration::days(30),
            message_page_limit: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub room_type: RoomType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub member_ids: Vec<Uuid>,
}

//=========================================================================================
// ChatBroker
//=========================================================================================

pub struct ChatBroker {
    db: Arc<dyn DatabaseService>,
    router: Arc<FanoutRouter>,
    tokens: TokenService,
    sessions: SessionDirectory,
    accounts: AccountService,
    relationships: RelationshipGate,
    rooms: RoomEngine,
    messages: MessagePipeline,
}

impl ChatBroker {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        hasher: Arc<dyn CredentialHasher>,
        router: Arc<FanoutRouter>,
        config: BrokerConfig,
    ) -> Self {
        let sessions = SessionDirectory::new(db.clone());
        let tokens = TokenService::new(sessions.clone(), config.session_lifetime);
        let accounts = AccountService::new(db.clone(), hasher, tokens.clone(), sessions.clone());
        let relationships = RelationshipGate::new(db.clone());
        let rooms = RoomEngine::new(db.clone(), relationships.clone());
        let messages = MessagePipeline::new(
            db.clone(),
            rooms.clone(),
            relationships.clone(),
            config.message_page_limit,
        );
        Self {
            db,
            router,
            tokens,
            sessions,
            accounts,
            relationships,
            rooms,
            messages,
        }
    }

    pub fn router(&self) -> &Arc<FanoutRouter> {
        &self.router
    }

    //=====================================================================================
    // Publishing helpers
    //=====================================================================================

    async fn publish_to_room(&self, room: &Room, event: BrokerEvent) {
        match self.rooms.audience(room).await {
            Ok(Audience::Everyone) => {
                self.router.publish_all(&event);
            }
            Ok(Audience::Users(users)) => {
                self.router.publish_to_users(users, &event);
            }
            Err(e) => error!(
                room = %room.id,
                event = event.kind(),
                "failed to resolve recipients after commit: {}",
                e
            ),
        }
    }

    fn publish_to_user(&self, user_id: Uuid, event: BrokerEvent) {
        self.router.publish(&GroupKey::User(user_id), &event);
    }

    fn publish_revoked(&self, sessions: &[Session]) {
        for session in sessions {
            self.router.publish(
                &GroupKey::Session(session.id),
                &BrokerEvent::SessionRevoked {
                    session_id: session.id,
                },
            );
        }
    }

    async fn publish_membership_changes(&self, room: &Room, changes: &[MembershipChange]) {
        for change in changes {
            self.publish_to_room(room, BrokerEvent::MessageReceived(change.notice.clone()))
                .await;
        }
    }

    /// Drops the user's connections from the room's ambient group.
    fn detach_from_room(&self, user_id: Uuid, room_id: Uuid) {
        self.router
            .unsubscribe_user(user_id, GroupKey::Room(room_id));
    }

    //=====================================================================================
    // Accounts and Sessions
    //=====================================================================================

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        device: DeviceDetails,
    ) -> ChatResult<AuthOutcome> {
        self.accounts.register(username, password, device).await
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device: DeviceDetails,
    ) -> ChatResult<AuthOutcome> {
        self.accounts.login(username, password, device).await
    }

    pub async fn login_with_token(&self, token: &str, device: DeviceDetails) -> ChatResult<AuthOutcome> {
        self.accounts.login_with_token(token, device).await
    }

    /// Validates a token and slides its expiry.
    pub async fn authenticate(&self, token: &str) -> ChatResult<SessionContext> {
        self.tokens.validate(token).await
    }

    /// Ends the caller's session. Other sockets on the same session are told to
    /// log out.
    pub async fn logout(&self, ctx: &SessionContext) -> ChatResult<()> {
        let session = self.accounts.logout(ctx).await?;
        self.publish_revoked(&[session]);
        Ok(())
    }

    pub async fn active_sessions(&self, ctx: &SessionContext) -> ChatResult<Vec<Session>> {
        self.sessions.list_active_for_user(ctx.user_id).await
    }

    pub async fn revoke_session(&self, ctx: &SessionContext, target: Uuid) -> ChatResult<()> {
        let revoked = self.sessions.revoke_one(ctx, target).await?;
        self.publish_revoked(&[revoked]);
        Ok(())
    }

    /// Returns how many sessions were revoked.
    pub async fn revoke_sessions(&self, ctx: &SessionContext, targets: &[Uuid]) -> ChatResult<usize> {
        let revoked = self.sessions.revoke_many(ctx, targets).await?;
        self.publish_revoked(&revoked);
        Ok(revoked.len())
    }

    /// Revokes every session of the caller except the current one.
    pub async fn revoke_all_sessions(&self, ctx: &SessionContext) -> ChatResult<usize> {
        let revoked = self.sessions.revoke_all_except(ctx).await?;
        self.publish_revoked(&revoked);
        Ok(revoked.len())
    }

    /// Deletes expired sessions and force-logs-out any socket still on them.
    pub async fn sweep_expired_sessions(&self) -> ChatResult<usize> {
        let swept = self.sessions.sweep_expired(Utc::now()).await?;
        self.publish_revoked(&swept);
        Ok(swept.len())
    }

    //=====================================================================================
    // Connections and Presence
    //=====================================================================================

    /// Registers an authenticated connection into its user and session groups.
    /// The first connection of a user marks them online.
    pub async fn connect(&self, ctx: &SessionContext, sender: EventSender) -> ConnectionGuard {
        let guard = self.router.register(ctx.user_id, ctx.session_id, sender);
        if guard.is_first_for_user() {
            self.update_presence(ctx.user_id, true).await;
        }
        guard
    }

    /// Unregisters a connection. When it was the user's last one, the user is
    /// marked offline.
    pub async fn disconnect(&self, guard: ConnectionGuard) {
        let user_id = guard.user_id();
        if guard.release() {
            self.update_presence(user_id, false).await;
        }
    }

    async fn update_presence(&self, user_id: Uuid, is_online: bool) {
        let now = Utc::now();
        if let Err(e) = self.db.set_user_presence(user_id, is_online, now).await {
            warn!(user = %user_id, "failed to record presence: {}", e);
            return;
        }

        let event = BrokerEvent::PresenceChanged {
            user_id,
            is_online,
            last_seen_at: Some(now),
        };
        let mut rooms = match self.db.list_rooms_for_user(user_id).await {
            Ok(rooms) => rooms.into_iter().map(|(room, _)| room.id).collect::<Vec<_>>(),
            Err(e) => {
                warn!(user = %user_id, "failed to list rooms for presence: {}", e);
                Vec::new()
            }
        };
        if let Ok(global) = self.rooms.global_room().await {
            rooms.push(global.id);
        }
        for room_id in rooms {
            self.router.publish(&GroupKey::Room(room_id), &event);
        }
    }

    /// Subscribes a connection to a room's ambient presence traffic.
    pub async fn subscribe_room(&self, guard: &ConnectionGuard, room_id: Uuid) -> ChatResult<()> {
        let room = self.rooms.get_room(room_id).await?;
        self.rooms.access(&room, guard.user_id()).await?;
        guard.subscribe(GroupKey::Room(room.id));
        Ok(())
    }

    pub fn unsubscribe_room(&self, guard: &ConnectionGuard, room_id: Uuid) {
        guard.unsubscribe(GroupKey::Room(room_id));
    }

    //=====================================================================================
    // Users
    //=====================================================================================

    pub async fn get_user(&self, _ctx: &SessionContext, user_id: Uuid) -> ChatResult<User> {
        Ok(self.db.get_user(user_id).await?)
    }

    pub async fn search_users(&self, ctx: &SessionContext, query: &str) -> ChatResult<Vec<User>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::validation("Search query cannot be empty"));
        }
        let users = self.db.search_users(query, MAX_SEARCH_RESULTS).await?;
        Ok(users.into_iter().filter(|u| u.id != ctx.user_id).collect())
    }

    //=====================================================================================
    // Rooms
    //=====================================================================================

    pub async fn accessible_rooms(&self, ctx: &SessionContext) -> ChatResult<Vec<RoomSummary>> {
        self.rooms.accessible_rooms(ctx.user_id).await
    }

    pub async fn room_members(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
    ) -> ChatResult<Vec<(RoomMember, User)>> {
        self.rooms.members(room_id, ctx.user_id).await
    }

    pub async fn create_room(&self, ctx: &SessionContext, request: CreateRoomRequest) -> ChatResult<Room> {
        match request.room_type {
            RoomType::Global => Err(ChatError::validation("The global room cannot be created")),
            RoomType::Group => {
                let name = request
                    .name
                    .ok_or_else(|| ChatError::validation("Room name cannot be empty"))?;
                let (room, changes) = self
                    .rooms
                    .create_group(ctx.user_id, &name, request.description, &request.member_ids)
                    .await?;

                self.publish_to_user(ctx.user_id, BrokerEvent::RoomJoined { room_id: room.id });
                for change in &changes {
                    self.publish_to_user(
                        change.member.user_id,
                        BrokerEvent::RoomJoined { room_id: room.id },
                    );
                }
                self.publish_membership_changes(&room, &changes).await;
                Ok(room)
            }
            RoomType::Direct => {
                let [other] = request.member_ids.as_slice() else {
                    return Err(ChatError::validation(
                        "A direct conversation needs exactly one other user",
                    ));
                };
                let (room, created) = self.rooms.open_direct(ctx.user_id, *other).await?;
                if created {
                    self.router.publish_to_users(
                        [ctx.user_id, *other],
                        &BrokerEvent::RoomJoined { room_id: room.id },
                    );
                }
                Ok(room)
            }
        }
    }

    pub async fn update_room(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        patch: RoomPatch,
    ) -> ChatResult<Room> {
        let (room, notice) = self.rooms.update(ctx.user_id, room_id, patch).await?;
        if let Some(notice) = notice {
            self.publish_to_room(&room, BrokerEvent::MessageReceived(notice))
                .await;
        }
        self.publish_to_room(&room, BrokerEvent::RoomUpdated(room.clone()))
            .await;
        Ok(room)
    }

    pub async fn delete_room(&self, ctx: &SessionContext, room_id: Uuid) -> ChatResult<()> {
        let (room, former_members) = self.rooms.delete(ctx.user_id, room_id).await?;
        self.router.publish_to_users(
            former_members,
            &BrokerEvent::RoomDeleted { room_id: room.id },
        );
        self.router.dissolve(&GroupKey::Room(room.id));
        Ok(())
    }

    pub async fn join_room(&self, ctx: &SessionContext, room_id: Uuid) -> ChatResult<()> {
        let (room, change) = self.rooms.join(ctx.user_id, room_id).await?;
        if let Some(change) = change {
            self.publish_membership_changes(&room, std::slice::from_ref(&change))
                .await;
            self.publish_to_user(ctx.user_id, BrokerEvent::RoomJoined { room_id: room.id });
        }
        Ok(())
    }

    pub async fn leave_room(&self, ctx: &SessionContext, room_id: Uuid) -> ChatResult<()> {
        let (room, change) = self.rooms.leave(ctx.user_id, room_id).await?;
        self.publish_membership_changes(&room, std::slice::from_ref(&change))
            .await;
        self.publish_to_user(ctx.user_id, BrokerEvent::RoomLeft { room_id: room.id });
        self.detach_from_room(ctx.user_id, room.id);
        Ok(())
    }

    /// Returns how many users were actually added.
    pub async fn add_room_members(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        user_ids: &[Uuid],
    ) -> ChatResult<usize> {
        let (room, changes) = self.rooms.add_members(ctx.user_id, room_id, user_ids).await?;
        self.publish_membership_changes(&room, &changes).await;
        for change in &changes {
            self.publish_to_user(
                change.member.user_id,
                BrokerEvent::RoomJoined { room_id: room.id },
            );
        }
        Ok(changes.len())
    }

    /// Returns how many users were actually removed.
    pub async fn remove_room_members(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        user_ids: &[Uuid],
    ) -> ChatResult<usize> {
        let (room, changes) = self
            .rooms
            .remove_members(ctx.user_id, room_id, user_ids)
            .await?;
        self.publish_membership_changes(&room, &changes).await;
        for change in &changes {
            self.publish_to_user(
                change.member.user_id,
                BrokerEvent::RoomLeft { room_id: room.id },
            );
            self.detach_from_room(change.member.user_id, room.id);
        }
        Ok(changes.len())
    }

    pub async fn update_member_role(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> ChatResult<RoomMember> {
        let (room, change) = self
            .rooms
            .change_role(ctx.user_id, room_id, user_id, role)
            .await?;
        self.publish_membership_changes(&room, std::slice::from_ref(&change))
            .await;
        Ok(change.member)
    }

    pub async fn transfer_ownership(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        user_id: Uuid,
    ) -> ChatResult<()> {
        let (room, notice) = self
            .rooms
            .transfer_ownership(ctx.user_id, room_id, user_id)
            .await?;
        self.publish_to_room(&room, BrokerEvent::MessageReceived(notice))
            .await;
        Ok(())
    }

    pub async fn update_member_muted(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        is_muted: bool,
    ) -> ChatResult<RoomMember> {
        self.rooms.set_muted(ctx.user_id, room_id, is_muted).await
    }

    pub async fn pin_message(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        message_id: Option<i64>,
    ) -> ChatResult<Room> {
        let room = self.rooms.set_pinned(ctx.user_id, room_id, message_id).await?;
        self.publish_to_room(&room, BrokerEvent::RoomUpdated(room.clone()))
            .await;
        Ok(room)
    }

    //=====================================================================================
    // Messages
    //=====================================================================================

    /// Sends a message. Every member (the sender included, on all devices)
    /// receives `MessageReceived`; the sender's session also gets a
    /// `MessageAck` carrying the client's temporary id.
    pub async fn send_message(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        content: &str,
        reply_to: Option<i64>,
        client_message_id: Option<String>,
    ) -> ChatResult<Message> {
        let (room, message) = self
            .messages
            .send(room_id, ctx.user_id, content, reply_to)
            .await?;

        self.router.publish(
            &GroupKey::Session(ctx.session_id),
            &BrokerEvent::MessageAck {
                client_message_id,
                server_message_id: message.id,
                room_id: room.id,
                sent_at: message.sent_at,
            },
        );
        self.publish_to_room(&room, BrokerEvent::MessageReceived(message.clone()))
            .await;
        Ok(message)
    }

    pub async fn get_messages(
        &self,
        ctx: &SessionContext,
        room_id: Uuid,
        limit: u32,
        before: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        self.messages
            .history(room_id, ctx.user_id, limit, before)
            .await
    }

    pub async fn edit_message(
        &self,
        ctx: &SessionContext,
        message_id: i64,
        content: &str,
    ) -> ChatResult<Message> {
        let (room, message) = self.messages.edit(message_id, ctx.user_id, content).await?;
        self.publish_to_room(
            &room,
            BrokerEvent::MessageEdited {
                room_id: room.id,
                message_id: message.id,
                new_content: message.content.clone(),
                edited_at: message.edited_at.unwrap_or_else(Utc::now),
            },
        )
        .await;
        Ok(message)
    }

    pub async fn delete_message(&self, ctx: &SessionContext, message_id: i64) -> ChatResult<()> {
        let (room, message) = self.messages.delete(message_id, ctx.user_id).await?;
        self.publish_to_room(
            &room,
            BrokerEvent::MessageDeleted {
                room_id: room.id,
                message_id: message.id,
            },
        )
        .await;
        Ok(())
    }

    pub async fn message_edit_history(
        &self,
        ctx: &SessionContext,
        message_id: i64,
    ) -> ChatResult<Vec<MessageEdit>> {
        self.messages.edit_history(message_id, ctx.user_id).await
    }

    //=====================================================================================
    // Relationships
    //=====================================================================================

    pub async fn send_friend_request(&self, ctx: &SessionContext, user_id: Uuid) -> ChatResult<()> {
        self.relationships
            .send_friend_request(ctx.user_id, user_id)
            .await?;
        Ok(())
    }

    pub async fn respond_friend_request(
        &self,
        ctx: &SessionContext,
        user_id: Uuid,
        accept: bool,
    ) -> ChatResult<()> {
        self.relationships
            .respond_friend_request(ctx.user_id, user_id, accept)
            .await?;
        Ok(())
    }

    pub async fn remove_friend(&self, ctx: &SessionContext, user_id: Uuid) -> ChatResult<()> {
        self.relationships.remove_friend(ctx.user_id, user_id).await
    }

    pub async fn friends(&self, ctx: &SessionContext) -> ChatResult<Vec<User>> {
        let ids = self.relationships.friends(ctx.user_id).await?;
        Ok(self.db.get_users(&ids).await?)
    }

    pub async fn pending_friend_requests(&self, ctx: &SessionContext) -> ChatResult<Vec<User>> {
        let ids = self.relationships.pending_requests(ctx.user_id).await?;
        Ok(self.db.get_users(&ids).await?)
    }

    pub async fn block_user(&self, ctx: &SessionContext, user_id: Uuid) -> ChatResult<()> {
        self.relationships.block(ctx.user_id, user_id).await
    }

    pub async fn unblock_user(&self, ctx: &SessionContext, user_id: Uuid) -> ChatResult<()> {
        self.relationships.unblock(ctx.user_id, user_id).await
    }

    pub async fn blocked_users(&self, ctx: &SessionContext) -> ChatResult<Vec<BlockedUser>> {
        self.relationships.blocked_by(ctx.user_id).await
    }
}
