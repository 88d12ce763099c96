//! crates/chat_core/src/tokens.rs
//!
//! Opaque session tokens with a sliding expiry window. A token carries no
//! claims; it is only a lookup key into the session directory, so deleting the
//! record revokes it immediately.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use crate::domain::{Session, SessionContext};
use crate::error::{ChatError, ChatResult};
use crate::sessions::SessionDirectory;

/// 256 bits of entropy.
pub const TOKEN_BYTES: usize = 32;

/// Generates a fresh URL-safe token from the OS random source.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Clone)]
pub struct TokenService {
    sessions: SessionDirectory,
    lifetime: Duration,
}

impl TokenService {
    pub fn new(sessions: SessionDirectory, lifetime: Duration) -> Self {
        Self { sessions, lifetime }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Creates a session for `user_id` and returns it with its new token.
    pub async fn issue(
        &self,
        user_id: Uuid,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> ChatResult<Session> {
        self.sessions
            .create(user_id, generate_token(), device_info, ip_address, self.lifetime)
            .await
    }

    /// Resolves a token to its session and slides the expiry forward.
    ///
    /// Fails closed: a missing record is `InvalidToken`, a record at or past its
    /// expiry is `Expired`.
    pub async fn validate(&self, token: &str) -> ChatResult<SessionContext> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::InvalidToken);
        }

        let session = match self.sessions.get_by_token(token).await {
            Ok(session) => session,
            Err(ChatError::NotFound(_)) => return Err(ChatError::InvalidToken),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        if session.is_expired_at(now) {
            return Err(ChatError::Expired);
        }

        // A revoke racing with this renewal wins if it commits first.
        let renewed = match self.sessions.renew(session.id, now, now + self.lifetime).await {
            Ok(renewed) => renewed,
            Err(ChatError::NotFound(_)) => return Err(ChatError::InvalidToken),
            Err(e) => return Err(e),
        };

        Ok(SessionContext {
            user_id: renewed.user_id,
            session_id: renewed.id,
            expires_at: renewed.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_url_safe_and_full_length() {
        let token = generate_token();
        // 32 bytes -> 43 base64 characters without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..256).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn token_decodes_to_256_bits() {
        let decoded = URL_SAFE_NO_PAD.decode(generate_token()).unwrap();
        assert_eq!(decoded.len() * 8, 256);
    }
}
