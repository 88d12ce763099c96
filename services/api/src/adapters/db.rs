//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Operations that touch more than one row (a membership change and its service
//! message, an ownership swap, room creation) run inside a single transaction.

use async_trait::async_trait;
use chat_core::domain::{
    BlockedUser, Friendship, MemberRole, MembershipState, Message, MessageEdit, NewMessage,
    ParseEnumError, Room, RoomMember, Session, User, UserCredentials,
};
use chat_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error and enum mapping
//=========================================================================================

/// Maps a sqlx error onto the port taxonomy. `what` names the missing row.
fn port_error(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            PortError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => PortError::NotFound(what()),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse<T>(value: &str) -> PortResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    value
        .parse()
        .map_err(|e: ParseEnumError| PortError::Unexpected(e.to_string()))
}

/// Escapes `LIKE` wildcards so user input matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    is_online: bool,
    last_seen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            username: self.username,
            is_online: self.is_online,
            last_seen_at: self.last_seen_at,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    username: String,
    hashed_password: String,
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    token: String,
    user_id: Uuid,
    device_info: Option<String>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            token: self.token,
            user_id: self.user_id,
            device_info: self.device_info,
            ip_address: self.ip_address,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

#[derive(FromRow)]
struct RoomRecord {
    id: Uuid,
    room_type: String,
    name: Option<String>,
    description: Option<String>,
    avatar_url: Option<String>,
    is_global: bool,
    created_by_user_id: Option<Uuid>,
    pinned_message_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl RoomRecord {
    fn to_domain(self) -> PortResult<Room> {
        Ok(Room {
            id: self.id,
            room_type: parse(&self.room_type)?,
            name: self.name,
            description: self.description,
            avatar_url: self.avatar_url,
            is_global: self.is_global,
            created_by_user_id: self.created_by_user_id,
            pinned_message_id: self.pinned_message_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MemberRecord {
    id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    role: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    is_muted: bool,
}
impl MemberRecord {
    fn to_domain(self) -> PortResult<RoomMember> {
        Ok(RoomMember {
            id: self.id,
            room_id: self.room_id,
            user_id: self.user_id,
            role: parse(&self.role)?,
            joined_at: self.joined_at,
            state: match self.left_at {
                None => MembershipState::Active,
                Some(left_at) => MembershipState::Left { left_at },
            },
            is_muted: self.is_muted,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: i64,
    room_id: Uuid,
    sender_user_id: Option<Uuid>,
    sender_username: Option<String>,
    message_type: String,
    service_action: Option<String>,
    reply_to_message_id: Option<i64>,
    content: String,
    sent_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    is_deleted: bool,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        Ok(Message {
            id: self.id,
            room_id: self.room_id,
            sender_user_id: self.sender_user_id,
            sender_username: self.sender_username,
            message_type: parse(&self.message_type)?,
            service_action: self.service_action.as_deref().map(parse).transpose()?,
            reply_to_message_id: self.reply_to_message_id,
            content: self.content,
            sent_at: self.sent_at,
            edited_at: self.edited_at,
            is_deleted: self.is_deleted,
        })
    }
}

#[derive(FromRow)]
struct EditRecord {
    id: i64,
    message_id: i64,
    edited_by_user_id: Uuid,
    content: String,
    edited_at: DateTime<Utc>,
}
impl EditRecord {
    fn to_domain(self) -> MessageEdit {
        MessageEdit {
            id: self.id,
            message_id: self.message_id,
            edited_by_user_id: self.edited_by_user_id,
            content: self.content,
            edited_at: self.edited_at,
        }
    }
}

#[derive(FromRow)]
struct FriendshipRecord {
    id: Uuid,
    user_low: Uuid,
    user_high: Uuid,
    status: String,
    initiator_user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl FriendshipRecord {
    fn to_domain(self) -> PortResult<Friendship> {
        Ok(Friendship {
            id: self.id,
            user_low: self.user_low,
            user_high: self.user_high,
            status: parse(&self.status)?,
            initiator_user_id: self.initiator_user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BlockedRecord {
    blocker_user_id: Uuid,
    blocked_user_id: Uuid,
    blocked_at: DateTime<Utc>,
}
impl BlockedRecord {
    fn to_domain(self) -> BlockedUser {
        BlockedUser {
            blocker_user_id: self.blocker_user_id,
            blocked_user_id: self.blocked_user_id,
            blocked_at: self.blocked_at,
        }
    }
}

//=========================================================================================
// Shared SQL
//=========================================================================================

const USER_COLUMNS: &str = "id, username, is_online, last_seen_at, created_at";

const SESSION_COLUMNS: &str =
    "id, token, user_id, device_info, ip_address, created_at, expires_at, last_activity_at";

const ROOM_COLUMNS: &str = "id, room_type, name, description, avatar_url, is_global, \
     created_by_user_id, pinned_message_id, created_at, updated_at";

const MEMBER_COLUMNS: &str = "id, room_id, user_id, role, joined_at, left_at, is_muted";

const FRIENDSHIP_COLUMNS: &str =
    "id, user_low, user_high, status, initiator_user_id, created_at, updated_at";

/// A message joined with its latest edit and deletion record.
const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.sender_user_id, u.username AS sender_username, \
            m.message_type, m.service_action, m.reply_to_message_id, \
            COALESCE(e.content, m.content) AS content, m.sent_at, e.edited_at, \
            (d.message_id IS NOT NULL) AS is_deleted \
     FROM messages m \
     LEFT JOIN users u ON u.id = m.sender_user_id \
     LEFT JOIN LATERAL ( \
         SELECT content, edited_at FROM message_edits \
         WHERE message_id = m.id ORDER BY id DESC LIMIT 1 \
     ) e ON TRUE \
     LEFT JOIN message_deletions d ON d.message_id = m.id";

async fn fetch_message(conn: &mut PgConnection, message_id: i64) -> PortResult<Message> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = $1");
    sqlx::query_as::<_, MessageRecord>(&sql)
        .bind(message_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| port_error(e, || format!("Message {} not found", message_id)))?
        .to_domain()
}

async fn insert_message(conn: &mut PgConnection, message: &NewMessage) -> PortResult<Message> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO messages (room_id, sender_user_id, message_type, service_action, reply_to_message_id, content, sent_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(message.room_id)
    .bind(message.sender_user_id)
    .bind(message.message_type.as_str())
    .bind(message.service_action.map(|a| a.as_str()))
    .bind(message.reply_to_message_id)
    .bind(&message.content)
    .bind(message.sent_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| port_error(e, || format!("Room {} not found", message.room_id)))?;
    fetch_message(conn, id).await
}

async fn insert_member(conn: &mut PgConnection, member: &RoomMember) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO room_members (id, room_id, user_id, role, joined_at, left_at, is_muted) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(member.id)
    .bind(member.room_id)
    .bind(member.user_id)
    .bind(member.role.as_str())
    .bind(member.joined_at)
    .bind(member.left_at())
    .bind(member.is_muted)
    .execute(&mut *conn)
    .await
    .map_err(|e| port_error(e, || format!("User {} not found", member.user_id)))?;
    Ok(())
}

fn rooms_from(records: Vec<RoomRecord>) -> PortResult<Vec<Room>> {
    records.into_iter().map(RoomRecord::to_domain).collect()
}

fn members_from(records: Vec<MemberRecord>) -> PortResult<Vec<RoomMember>> {
    records.into_iter().map(MemberRecord::to_domain).collect()
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- Users ---
    async fn create_user(&self, username: &str, hashed_password: &str) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, hashed_password) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(hashed_password)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("User {} not found", username)))?;
        Ok(record.to_domain())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> PortResult<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
        let records = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_credentials_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, username, hashed_password FROM users WHERE LOWER(username) = LOWER($1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_error(e, || format!("User {} not found", username)))?;
        Ok(UserCredentials {
            user_id: record.id,
            username: record.username,
            hashed_password: record.hashed_password,
        })
    }

    async fn search_users(&self, query: &str, limit: u32) -> PortResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username ILIKE $1 ORDER BY username LIMIT $2"
        );
        let records = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(like_pattern(query))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn set_user_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET is_online = $2, last_seen_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(is_online)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    // --- Sessions ---
    async fn create_session(&self, session: &Session) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, token, user_id, device_info, ip_address, created_at, expires_at, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id)
        .bind(&session.token)
        .bind(session.user_id)
        .bind(&session.device_info)
        .bind(&session.ip_address)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, || format!("User {} not found", session.user_id)))?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn get_session_by_token(&self, token: &str) -> PortResult<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1");
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || "Session not found".to_string()))?;
        Ok(record.to_domain())
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY last_activity_at DESC"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn touch_session(
        &self,
        session_id: Uuid,
        last_activity_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PortResult<Session> {
        let sql = format!(
            "UPDATE sessions SET last_activity_at = $2, expires_at = $3 WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(last_activity_at)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn update_session_device(
        &self,
        session_id: Uuid,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET device_info = COALESCE($2, device_info), ip_address = COALESCE($3, ip_address) \
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(device_info)
        .bind(ip_address)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(())
    }

    async fn delete_sessions(&self, user_id: Uuid, session_ids: &[Uuid]) -> PortResult<Vec<Session>> {
        let sql = format!(
            "DELETE FROM sessions WHERE user_id = $1 AND id = ANY($2) RETURNING {SESSION_COLUMNS}"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .bind(session_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_sessions_except(&self, user_id: Uuid, keep: Uuid) -> PortResult<Vec<Session>> {
        let sql = format!(
            "DELETE FROM sessions WHERE user_id = $1 AND id <> $2 RETURNING {SESSION_COLUMNS}"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(user_id)
            .bind(keep)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<Vec<Session>> {
        let sql = format!("DELETE FROM sessions WHERE expires_at <= $1 RETURNING {SESSION_COLUMNS}");
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Rooms ---
    async fn ensure_global_room(&self) -> PortResult<Room> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO rooms (id, room_type, name, is_global, created_at, updated_at) \
             VALUES ($1, 'global', 'Global', TRUE, $2, $2) \
             ON CONFLICT (is_global) WHERE is_global DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE is_global");
        sqlx::query_as::<_, RoomRecord>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || "Global room not found".to_string()))?
            .to_domain()
    }

    async fn get_room(&self, room_id: Uuid) -> PortResult<Room> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1");
        sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Room {} not found", room_id)))?
            .to_domain()
    }

    async fn create_room(
        &self,
        room: &Room,
        members: &[RoomMember],
        notices: &[NewMessage],
    ) -> PortResult<Vec<Message>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO rooms (id, room_type, name, description, avatar_url, is_global, created_by_user_id, pinned_message_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(room.id)
        .bind(room.room_type.as_str())
        .bind(&room.name)
        .bind(&room.description)
        .bind(&room.avatar_url)
        .bind(room.is_global)
        .bind(room.created_by_user_id)
        .bind(room.pinned_message_id)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| port_error(e, || "Room creator not found".to_string()))?;

        for member in members {
            insert_member(&mut tx, member).await?;
        }
        let mut messages = Vec::with_capacity(notices.len());
        for notice in notices {
            messages.push(insert_message(&mut tx, notice).await?);
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(messages)
    }

    async fn update_room(&self, room: &Room, notice: Option<&NewMessage>) -> PortResult<Option<Message>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let result = sqlx::query(
            "UPDATE rooms SET name = $2, description = $3, avatar_url = $4, pinned_message_id = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(room.id)
        .bind(&room.name)
        .bind(&room.description)
        .bind(&room.avatar_url)
        .bind(room.pinned_message_id)
        .bind(room.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Room {} not found", room.id)));
        }

        let message = match notice {
            Some(notice) => Some(insert_message(&mut tx, notice).await?),
            None => None,
        };
        tx.commit().await.map_err(unexpected)?;
        Ok(message)
    }

    async fn delete_room(&self, room_id: Uuid) -> PortResult<()> {
        // Memberships, messages, edits and deletions cascade.
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Room {} not found", room_id)));
        }
        Ok(())
    }

    async fn find_direct_room(&self, a: Uuid, b: Uuid) -> PortResult<Option<Room>> {
        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.room_type = 'direct' \
             AND EXISTS (SELECT 1 FROM room_members WHERE room_id = r.id AND user_id = $1) \
             AND EXISTS (SELECT 1 FROM room_members WHERE room_id = r.id AND user_id = $2) \
             LIMIT 1"
        );
        sqlx::query_as::<_, RoomRecord>(&sql)
            .bind(a)
            .bind(b)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(RoomRecord::to_domain)
            .transpose()
    }

    async fn list_rooms_for_user(&self, user_id: Uuid) -> PortResult<Vec<(Room, RoomMember)>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM room_members WHERE user_id = $1 AND left_at IS NULL"
        );
        let members = members_from(
            sqlx::query_as::<_, MemberRecord>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?,
        )?;
        let room_ids: Vec<Uuid> = members.iter().map(|m| m.room_id).collect();

        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ANY($1)");
        let rooms = rooms_from(
            sqlx::query_as::<_, RoomRecord>(&sql)
                .bind(&room_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?,
        )?;

        Ok(members
            .into_iter()
            .filter_map(|member| {
                rooms
                    .iter()
                    .find(|r| r.id == member.room_id)
                    .cloned()
                    .map(|room| (room, member))
            })
            .collect())
    }

    // --- Membership ---
    async fn get_member(&self, room_id: Uuid, user_id: Uuid) -> PortResult<Option<RoomMember>> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM room_members WHERE room_id = $1 AND user_id = $2");
        sqlx::query_as::<_, MemberRecord>(&sql)
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(MemberRecord::to_domain)
            .transpose()
    }

    async fn list_active_members(&self, room_id: Uuid) -> PortResult<Vec<RoomMember>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM room_members WHERE room_id = $1 AND left_at IS NULL ORDER BY joined_at, id"
        );
        members_from(
            sqlx::query_as::<_, MemberRecord>(&sql)
                .bind(room_id)
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?,
        )
    }

    async fn activate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        // The (room_id, user_id) row is revived rather than duplicated.
        let sql = format!(
            "INSERT INTO room_members (id, room_id, user_id, role, joined_at, left_at, is_muted) \
             VALUES ($1, $2, $3, $4, $5, NULL, FALSE) \
             ON CONFLICT (room_id, user_id) DO UPDATE \
             SET role = EXCLUDED.role, joined_at = EXCLUDED.joined_at, left_at = NULL, is_muted = FALSE \
             RETURNING {MEMBER_COLUMNS}"
        );
        let member = sqlx::query_as::<_, MemberRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(room_id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, || format!("Room {} or user {} not found", room_id, user_id)))?
            .to_domain()?;
        let message = insert_message(&mut tx, notice).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok((member, message))
    }

    async fn deactivate_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let sql = format!(
            "UPDATE room_members SET left_at = $3 WHERE room_id = $1 AND user_id = $2 RETURNING {MEMBER_COLUMNS}"
        );
        let member = sqlx::query_as::<_, MemberRecord>(&sql)
            .bind(room_id)
            .bind(user_id)
            .bind(at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, || format!("Membership of {} in {} not found", user_id, room_id)))?
            .to_domain()?;
        let message = insert_message(&mut tx, notice).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok((member, message))
    }

    async fn set_member_role(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        notice: &NewMessage,
    ) -> PortResult<(RoomMember, Message)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let sql = format!(
            "UPDATE room_members SET role = $3 WHERE room_id = $1 AND user_id = $2 RETURNING {MEMBER_COLUMNS}"
        );
        let member = sqlx::query_as::<_, MemberRecord>(&sql)
            .bind(room_id)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| port_error(e, || format!("Membership of {} in {} not found", user_id, room_id)))?
            .to_domain()?;
        let message = insert_message(&mut tx, notice).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok((member, message))
    }

    async fn swap_owner(
        &self,
        room_id: Uuid,
        from: Uuid,
        to: Uuid,
        notice: &NewMessage,
    ) -> PortResult<Message> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let demoted = sqlx::query(
            "UPDATE room_members SET role = 'admin' WHERE room_id = $1 AND user_id = $2 AND role = 'owner'",
        )
        .bind(room_id)
        .bind(from)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if demoted.rows_affected() == 0 {
            return Err(PortError::Conflict(format!("{} does not own room {}", from, room_id)));
        }

        let promoted = sqlx::query(
            "UPDATE room_members SET role = 'owner' WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(room_id)
        .bind(to)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if promoted.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Membership of {} in {} not found", to, room_id)));
        }

        let message = insert_message(&mut tx, notice).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(message)
    }

    async fn set_member_muted(&self, room_id: Uuid, user_id: Uuid, is_muted: bool) -> PortResult<RoomMember> {
        let sql = format!(
            "UPDATE room_members SET is_muted = $3 WHERE room_id = $1 AND user_id = $2 RETURNING {MEMBER_COLUMNS}"
        );
        sqlx::query_as::<_, MemberRecord>(&sql)
            .bind(room_id)
            .bind(user_id)
            .bind(is_muted)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_error(e, || format!("Membership of {} in {} not found", user_id, room_id)))?
            .to_domain()
    }

    // --- Messages ---
    async fn insert_message(&self, message: &NewMessage) -> PortResult<Message> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        insert_message(&mut conn, message).await
    }

    async fn get_message(&self, message_id: i64) -> PortResult<Message> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        fetch_message(&mut conn, message_id).await
    }

    async fn list_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<i64>,
    ) -> PortResult<Vec<Message>> {
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.room_id = $1 AND d.message_id IS NULL \
             AND ($2::BIGINT IS NULL OR m.id < $2) ORDER BY m.id DESC LIMIT $3"
        );
        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(room_id)
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(MessageRecord::to_domain).collect()
    }

    async fn insert_edit(
        &self,
        message_id: i64,
        edited_by: Uuid,
        content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<MessageEdit> {
        let record = sqlx::query_as::<_, EditRecord>(
            "INSERT INTO message_edits (message_id, edited_by_user_id, content, edited_at) \
             VALUES ($1, $2, $3, $4) RETURNING id, message_id, edited_by_user_id, content, edited_at",
        )
        .bind(message_id)
        .bind(edited_by)
        .bind(content)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_error(e, || format!("Message {} not found", message_id)))?;
        Ok(record.to_domain())
    }

    async fn insert_deletion(&self, message_id: i64, deleted_by: Uuid, at: DateTime<Utc>) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO message_deletions (message_id, deleted_by_user_id, deleted_at) VALUES ($1, $2, $3)",
        )
        .bind(message_id)
        .bind(deleted_by)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, || format!("Message {} not found", message_id)))?;
        Ok(())
    }

    async fn list_edits(&self, message_id: i64) -> PortResult<Vec<MessageEdit>> {
        let records = sqlx::query_as::<_, EditRecord>(
            "SELECT id, message_id, edited_by_user_id, content, edited_at FROM message_edits \
             WHERE message_id = $1 ORDER BY id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Relationships ---
    async fn get_friendship(&self, a: Uuid, b: Uuid) -> PortResult<Option<Friendship>> {
        let (low, high) = Friendship::canonical_pair(a, b);
        let sql = format!("SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE user_low = $1 AND user_high = $2");
        sqlx::query_as::<_, FriendshipRecord>(&sql)
            .bind(low)
            .bind(high)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(FriendshipRecord::to_domain)
            .transpose()
    }

    async fn save_friendship(&self, friendship: &Friendship) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO friendships (id, user_low, user_high, status, initiator_user_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_low, user_high) DO UPDATE \
             SET status = EXCLUDED.status, initiator_user_id = EXCLUDED.initiator_user_id, updated_at = EXCLUDED.updated_at",
        )
        .bind(friendship.id)
        .bind(friendship.user_low)
        .bind(friendship.user_high)
        .bind(friendship.status.as_str())
        .bind(friendship.initiator_user_id)
        .bind(friendship.created_at)
        .bind(friendship.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, || "User not found".to_string()))?;
        Ok(())
    }

    async fn delete_friendship(&self, a: Uuid, b: Uuid) -> PortResult<bool> {
        let (low, high) = Friendship::canonical_pair(a, b);
        let result = sqlx::query("DELETE FROM friendships WHERE user_low = $1 AND user_high = $2")
            .bind(low)
            .bind(high)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_friendships(&self, user_id: Uuid) -> PortResult<Vec<Friendship>> {
        let sql = format!(
            "SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE user_low = $1 OR user_high = $1 ORDER BY updated_at DESC"
        );
        let records = sqlx::query_as::<_, FriendshipRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(FriendshipRecord::to_domain).collect()
    }

    async fn block_user(&self, blocker: Uuid, blocked: Uuid, at: DateTime<Utc>) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO blocked_users (blocker_user_id, blocked_user_id, blocked_at) VALUES ($1, $2, $3) \
             ON CONFLICT (blocker_user_id, blocked_user_id) DO NOTHING",
        )
        .bind(blocker)
        .bind(blocked)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, || format!("User {} not found", blocked)))?;
        Ok(())
    }

    async fn unblock_user(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool> {
        let result = sqlx::query(
            "DELETE FROM blocked_users WHERE blocker_user_id = $1 AND blocked_user_id = $2",
        )
        .bind(blocker)
        .bind(blocked)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_blocked(&self, blocker: Uuid, blocked: Uuid) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM blocked_users WHERE blocker_user_id = $1 AND blocked_user_id = $2)",
        )
        .bind(blocker)
        .bind(blocked)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn list_blocked(&self, blocker: Uuid) -> PortResult<Vec<BlockedUser>> {
        let records = sqlx::query_as::<_, BlockedRecord>(
            "SELECT blocker_user_id, blocked_user_id, blocked_at FROM blocked_users \
             WHERE blocker_user_id = $1 ORDER BY blocked_at DESC",
        )
        .bind(blocker)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_pattern("al"), "%al%");
        assert_eq!(like_pattern("100%_x"), "%100\\%\\_x%");
    }

    #[test]
    fn unknown_enum_labels_are_unexpected() {
        let result: PortResult<MemberRole> = parse("superuser");
        assert!(matches!(result, Err(PortError::Unexpected(_))));
        let role: MemberRole = parse("admin").unwrap();
        assert_eq!(role, MemberRole::Admin);
    }
}
