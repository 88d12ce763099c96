//! crates/chat_core/src/messages.rs
//!
//! The message pipeline: validation and persistence of sends, edits and soft
//! deletes, and paginated history. Edits and deletions are append-only
//! records; the current content is derived from the latest edit.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Message, MessageEdit, NewMessage, Room, RoomType};
use crate::error::{ChatError, ChatResult};
use crate::ports::{DatabaseService, PortError};
use crate::relationships::RelationshipGate;
use crate::rooms::RoomEngine;

pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Trims content and rejects empty or oversized text.
pub fn normalize_content(content: &str) -> ChatResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChatError::validation("Message content cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ChatError::validation(format!(
            "Message cannot exceed {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    Ok(content.to_string())
}

/// Clamps a requested page size into `1..=max`; zero means the default.
pub fn clamp_limit(requested: u32, max: u32) -> u32 {
    let requested = if requested == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        requested
    };
    requested.clamp(1, max.max(1))
}

#[derive(Clone)]
pub struct MessagePipeline {
    db: Arc<dyn DatabaseService>,
    rooms: RoomEngine,
    gate: RelationshipGate,
    page_limit: u32,
}

impl MessagePipeline {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        rooms: RoomEngine,
        gate: RelationshipGate,
        page_limit: u32,
    ) -> Self {
        Self {
            db,
            rooms,
            gate,
            page_limit,
        }
    }

    async fn find_message(&self, message_id: i64) -> ChatResult<Message> {
        match self.db.get_message(message_id).await {
            Ok(message) => Ok(message),
            Err(PortError::NotFound(_)) => Err(ChatError::not_found("Message not found")),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a message its author wants to change, enforcing authorship and
    /// that it has not been deleted.
    async fn own_live_message(&self, message_id: i64, user_id: Uuid) -> ChatResult<(Room, Message)> {
        let message = self.find_message(message_id).await?;
        if message.sender_user_id != Some(user_id) {
            return Err(ChatError::forbidden("You can only change your own messages"));
        }
        if message.is_deleted {
            return Err(ChatError::validation("Message already deleted"));
        }
        let room = self.rooms.get_room(message.room_id).await?;
        self.rooms.access(&room, user_id).await?;
        Ok((room, message))
    }

    pub async fn send(
        &self,
        room_id: Uuid,
        sender: Uuid,
        content: &str,
        reply_to: Option<i64>,
    ) -> ChatResult<(Room, Message)> {
        let room = self.rooms.get_room(room_id).await?;
        self.rooms.access(&room, sender).await?;
        let content = normalize_content(content)?;

        if let Some(reply_id) = reply_to {
            let target = match self.db.get_message(reply_id).await {
                Ok(target) => target,
                Err(PortError::NotFound(_)) => {
                    return Err(ChatError::validation("Replied-to message not found"))
                }
                Err(e) => return Err(e.into()),
            };
            if target.room_id != room.id {
                return Err(ChatError::validation(
                    "Replied-to message belongs to a different room",
                ));
            }
            if target.is_deleted {
                return Err(ChatError::validation("Cannot reply to a deleted message"));
            }
        }

        if room.room_type == RoomType::Direct {
            for member in self.db.list_active_members(room.id).await? {
                if member.user_id != sender {
                    self.gate.ensure_not_blocked(sender, member.user_id).await?;
                }
            }
        }

        let message = self
            .db
            .insert_message(&NewMessage::text(room.id, sender, content, reply_to))
            .await?;
        info!(room = %room.id, message = message.id, sender = %sender, "message sent");
        Ok((room, message))
    }

    /// Appends an edit and returns the message with its new current content.
    pub async fn edit(&self, message_id: i64, user_id: Uuid, content: &str) -> ChatResult<(Room, Message)> {
        let (room, message) = self.own_live_message(message_id, user_id).await?;
        let content = normalize_content(content)?;

        let edit = self
            .db
            .insert_edit(message.id, user_id, &content, Utc::now())
            .await?;
        info!(message = message.id, edit = edit.id, "message edited");
        Ok((
            room,
            Message {
                content: edit.content,
                edited_at: Some(edit.edited_at),
                ..message
            },
        ))
    }

    /// Records a deletion. The row stays; it just stops being listed.
    pub async fn delete(&self, message_id: i64, user_id: Uuid) -> ChatResult<(Room, Message)> {
        let (room, message) = self.own_live_message(message_id, user_id).await?;
        match self.db.insert_deletion(message.id, user_id, Utc::now()).await {
            Ok(()) => {}
            Err(PortError::Conflict(_)) => {
                return Err(ChatError::validation("Message already deleted"))
            }
            Err(e) => return Err(e.into()),
        }
        info!(message = message.id, "message deleted");
        Ok((
            room,
            Message {
                is_deleted: true,
                ..message
            },
        ))
    }

    /// A window of the newest messages (older than `before` if given), returned
    /// in chronological order.
    pub async fn history(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        limit: u32,
        before: Option<i64>,
    ) -> ChatResult<Vec<Message>> {
        let room = self.rooms.get_room(room_id).await?;
        self.rooms.access(&room, user_id).await?;

        let limit = clamp_limit(limit, self.page_limit);
        let mut messages = self.db.list_messages(room.id, limit, before).await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn edit_history(&self, message_id: i64, user_id: Uuid) -> ChatResult<Vec<MessageEdit>> {
        let message = self.find_message(message_id).await?;
        if message.is_deleted {
            return Err(ChatError::not_found("Message not found"));
        }
        let room = self.rooms.get_room(message.room_id).await?;
        self.rooms.access(&room, user_id).await?;
        Ok(self.db.list_edits(message.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_content_is_rejected() {
        assert!(matches!(
            normalize_content(" \n\t "),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn content_is_trimmed() {
        assert_eq!(normalize_content("  hi  ").unwrap(), "hi");
    }

    #[test]
    fn oversized_content_is_rejected() {
        assert!(normalize_content(&"a".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
        assert!(normalize_content(&"a".repeat(MAX_MESSAGE_LENGTH)).is_ok());
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(0, 100), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_limit(500, 100), 100);
        assert_eq!(clamp_limit(10, 100), 10);
    }
}
