//! crates/chat_core/src/sessions.rs
//!
//! The session directory: the canonical place where session records are
//! created, looked up, renewed and revoked.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Session, SessionContext};
use crate::error::{ChatError, ChatResult};
use crate::ports::DatabaseService;

#[derive(Clone)]
pub struct SessionDirectory {
    db: Arc<dyn DatabaseService>,
}

impl SessionDirectory {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        token: String,
        device_info: Option<String>,
        ip_address: Option<String>,
        lifetime: Duration,
    ) -> ChatResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token,
            user_id,
            device_info,
            ip_address,
            created_at: now,
            expires_at: now + lifetime,
            last_activity_at: now,
        };
        self.db.create_session(&session).await?;
        info!(session = %session.id, user = %user_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> ChatResult<Session> {
        Ok(self.db.get_session(session_id).await?)
    }

    pub async fn get_by_token(&self, token: &str) -> ChatResult<Session> {
        Ok(self.db.get_session_by_token(token).await?)
    }

    /// Non-expired sessions of a user, most recently active first.
    pub async fn list_active_for_user(&self, user_id: Uuid) -> ChatResult<Vec<Session>> {
        let now = Utc::now();
        let sessions = self.db.list_sessions_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| !session.is_expired_at(now))
            .collect())
    }

    pub async fn renew(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> ChatResult<Session> {
        Ok(self.db.touch_session(session_id, now, expires_at).await?)
    }

    pub async fn update_device(
        &self,
        session_id: Uuid,
        device_info: Option<&str>,
        ip_address: Option<&str>,
    ) -> ChatResult<()> {
        if device_info.is_none() && ip_address.is_none() {
            return Ok(());
        }
        Ok(self
            .db
            .update_session_device(session_id, device_info, ip_address)
            .await?)
    }

    /// Revokes one of the caller's other sessions.
    pub async fn revoke_one(&self, ctx: &SessionContext, target: Uuid) -> ChatResult<Session> {
        if target == ctx.session_id {
            return Err(ChatError::validation("Cannot revoke current session"));
        }
        let mut revoked = self.db.delete_sessions(ctx.user_id, &[target]).await?;
        let session = revoked
            .pop()
            .ok_or_else(|| ChatError::not_found("Session not found"))?;
        info!(session = %session.id, user = %ctx.user_id, "session revoked");
        Ok(session)
    }

    pub async fn revoke_many(&self, ctx: &SessionContext, targets: &[Uuid]) -> ChatResult<Vec<Session>> {
        if targets.is_empty() {
            return Err(ChatError::validation("No sessions specified"));
        }
        if targets.contains(&ctx.session_id) {
            return Err(ChatError::validation("Cannot revoke current session"));
        }
        let revoked = self.db.delete_sessions(ctx.user_id, targets).await?;
        info!(user = %ctx.user_id, count = revoked.len(), "sessions revoked");
        Ok(revoked)
    }

    pub async fn revoke_all_except(&self, ctx: &SessionContext) -> ChatResult<Vec<Session>> {
        let revoked = self
            .db
            .delete_sessions_except(ctx.user_id, ctx.session_id)
            .await?;
        info!(user = %ctx.user_id, count = revoked.len(), "all other sessions revoked");
        Ok(revoked)
    }

    /// Ends the caller's own session (logout).
    pub async fn end(&self, ctx: &SessionContext) -> ChatResult<Session> {
        let mut ended = self.db.delete_sessions(ctx.user_id, &[ctx.session_id]).await?;
        ended
            .pop()
            .ok_or_else(|| ChatError::not_found("Session not found"))
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> ChatResult<Vec<Session>> {
        Ok(self.db.delete_expired_sessions(now).await?)
    }
}
