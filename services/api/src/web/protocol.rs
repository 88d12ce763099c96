//! services/api/src/web/protocol.rs
//!
//! Defines the JSON shapes exchanged with clients: the views returned inside RPC
//! envelopes and the WebSocket frames in both directions. Field names are
//! camelCase on the wire.

use chat_core::domain::{
    BlockedUser, Message, MessageEdit, Room, RoomMember, RoomSummary, Session, User,
};
use chat_core::events::BrokerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Views
//=========================================================================================

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            is_online: user.is_online,
            last_seen_at: user.last_seen_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionView {
    pub fn new(session: Session, current: Uuid) -> Self {
        Self {
            is_current: session.id == current,
            id: session.id,
            device_info: session.device_info,
            ip_address: session.ip_address,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub room_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub is_global: bool,
    pub created_by_user_id: Option<Uuid>,
    pub pinned_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The caller's role; absent for the global room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            room_type: room.room_type.to_string(),
            name: room.name,
            description: room.description,
            avatar_url: room.avatar_url,
            is_global: room.is_global,
            created_by_user_id: room.created_by_user_id,
            pinned_message_id: room.pinned_message_id,
            created_at: room.created_at,
            updated_at: room.updated_at,
            role: None,
            is_muted: None,
        }
    }
}

impl From<RoomSummary> for RoomView {
    fn from(summary: RoomSummary) -> Self {
        let role = summary.role.map(|r| r.to_string());
        let is_muted = summary.role.map(|_| summary.is_muted);
        Self {
            role,
            is_muted,
            ..RoomView::from(summary.room)
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub is_muted: bool,
    pub is_online: bool,
}

impl From<(RoomMember, User)> for MemberView {
    fn from((member, user): (RoomMember, User)) -> Self {
        Self {
            user_id: member.user_id,
            username: user.username,
            role: member.role.to_string(),
            joined_at: member.joined_at,
            is_muted: member.is_muted,
            is_online: user.is_online,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub room_id: Uuid,
    pub sender_user_id: Option<Uuid>,
    pub sender_username: Option<String>,
    pub message_type: String,
    pub service_action: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            is_edited: message.is_edited(),
            id: message.id,
            room_id: message.room_id,
            sender_user_id: message.sender_user_id,
            sender_username: message.sender_username,
            message_type: message.message_type.to_string(),
            service_action: message.service_action.map(|a| a.to_string()),
            reply_to_message_id: message.reply_to_message_id,
            content: message.content,
            sent_at: message.sent_at,
            edited_at: message.edited_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageEditView {
    pub id: i64,
    pub message_id: i64,
    pub edited_by_user_id: Uuid,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

impl From<MessageEdit> for MessageEditView {
    fn from(edit: MessageEdit) -> Self {
        Self {
            id: edit.id,
            message_id: edit.message_id,
            edited_by_user_id: edit.edited_by_user_id,
            content: edit.content,
            edited_at: edit.edited_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockedUserView {
    pub user_id: Uuid,
    pub blocked_at: DateTime<Utc>,
}

impl From<BlockedUser> for BlockedUserView {
    fn from(blocked: BlockedUser) -> Self {
        Self {
            user_id: blocked.blocked_user_id,
            blocked_at: blocked.blocked_at,
        }
    }
}

//=========================================================================================
// Messages Sent FROM the Client TO the Server (WebSocket)
//=========================================================================================

/// Represents the structured text messages a client can send over the socket.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Receive room-scoped presence and room updates for a room the user can access.
    SubscribeRoom { room_id: Uuid },

    UnsubscribeRoom { room_id: Uuid },

    /// Keep-alive. Answered with `pong`.
    Ping,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (WebSocket)
//=========================================================================================

/// Represents the push frames the server sends over the socket.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    MessageReceived {
        message: MessageView,
    },
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
    /// Sent only to the session that sent the message.
    MessageAck {
        client_message_id: Option<String>,
        server_message_id: i64,
        room_id: Uuid,
        sent_at: DateTime<Utc>,
    },
    /// The session was revoked or expired. The socket is closed right after.
    SessionRevoked {
        session_id: Uuid,
    },
    RoomJoined {
        room_id: Uuid,
    },
    RoomLeft {
        room_id: Uuid,
    },
    RoomUpdated {
        room: RoomView,
    },
    RoomDeleted {
        room_id: Uuid,
    },
    PresenceChanged {
        user_id: Uuid,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    },
    Pong,
    /// A client frame was rejected. The connection stays open.
    Error {
        message: String,
    },
}

impl From<BrokerEvent> for ServerMessage {
    fn from(event: BrokerEvent) -> Self {
        match event {
            BrokerEvent::MessageReceived(message) => ServerMessage::MessageReceived {
                message: message.into(),
            },
            BrokerEvent::MessageEdited {
                room_id,
                message_id,
                new_content,
                edited_at,
            } => ServerMessage::MessageEdited {
                room_id,
                message_id,
                new_content,
                edited_at,
            },
            BrokerEvent::MessageDeleted {
                room_id,
                message_id,
            } => ServerMessage::MessageDeleted {
                room_id,
                message_id,
            },
            BrokerEvent::MessageAck {
                client_message_id,
                server_message_id,
                room_id,
                sent_at,
            } => ServerMessage::MessageAck {
                client_message_id,
                server_message_id,
                room_id,
                sent_at,
            },
            BrokerEvent::SessionRevoked { session_id } => ServerMessage::SessionRevoked { session_id },
            BrokerEvent::RoomJoined { room_id } => ServerMessage::RoomJoined { room_id },
            BrokerEvent::RoomLeft { room_id } => ServerMessage::RoomLeft { room_id },
            BrokerEvent::RoomUpdated(room) => ServerMessage::RoomUpdated { room: room.into() },
            BrokerEvent::RoomDeleted { room_id } => ServerMessage::RoomDeleted { room_id },
            BrokerEvent::PresenceChanged {
                user_id,
                is_online,
                last_seen_at,
            } => ServerMessage::PresenceChanged {
                user_id,
                is_online,
                last_seen_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_parse() {
        let room_id = Uuid::new_v4();
        let frame = json!({ "type": "subscribe_room", "roomId": room_id }).to_string();
        assert_eq!(
            serde_json::from_str::<ClientMessage>(&frame).unwrap(),
            ClientMessage::SubscribeRoom { room_id }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn ack_frame_is_tagged_and_camel_cased() {
        let room_id = Uuid::new_v4();
        let frame = ServerMessage::from(BrokerEvent::MessageAck {
            client_message_id: Some("tmp-1".into()),
            server_message_id: 42,
            room_id,
            sent_at: Utc::now(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message_ack");
        assert_eq!(value["clientMessageId"], "tmp-1");
        assert_eq!(value["serverMessageId"], 42);
        assert_eq!(value["roomId"], json!(room_id));
    }

    #[test]
    fn room_updated_frame_carries_the_room_view() {
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4(),
            room_type: chat_core::RoomType::Group,
            name: Some("Team".into()),
            description: None,
            avatar_url: None,
            is_global: false,
            created_by_user_id: Some(Uuid::new_v4()),
            pinned_message_id: None,
            created_at: now,
            updated_at: now,
        };

        let frame = ServerMessage::from(BrokerEvent::RoomUpdated(room.clone()));
        assert_eq!(frame, ServerMessage::RoomUpdated { room: RoomView::from(room.clone()) });

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "room_updated");
        assert_eq!(value["room"]["id"], json!(room.id));
        assert_eq!(value["room"]["name"], "Team");
        assert!(value["room"].get("role").is_none());
    }

    #[test]
    fn session_revoked_frame_names_the_session() {
        let session_id = Uuid::new_v4();
        let value =
            serde_json::to_value(ServerMessage::from(BrokerEvent::SessionRevoked { session_id }))
                .unwrap();
        assert_eq!(value, json!({ "type": "session_revoked", "sessionId": session_id }));
    }
}
