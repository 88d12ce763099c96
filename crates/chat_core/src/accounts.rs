//! crates/chat_core/src/accounts.rs
//!
//! Registration, password login, token re-login and logout.

use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Session, SessionContext, User};
use crate::error::{ChatError, ChatResult};
use crate::ports::{CredentialHasher, DatabaseService, PortError};
use crate::sessions::SessionDirectory;
use crate::tokens::TokenService;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// A freshly authenticated session and the user it belongs to.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub session: Session,
    pub user: User,
}

/// Optional client metadata recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct DeviceDetails {
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

pub fn validate_username(username: &str) -> ChatResult<String> {
    let username = username.trim();
    let length = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&length) {
        return Err(ChatError::validation(format!(
            "Username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ChatError::validation(
            "Username may only contain letters, digits, '_', '.' and '-'",
        ));
    }
    Ok(username.to_string())
}

pub fn validate_password(password: &str) -> ChatResult<()> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(ChatError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(ChatError::validation(format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<dyn DatabaseService>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: TokenService,
    sessions: SessionDirectory,
}

impl AccountService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: TokenService,
        sessions: SessionDirectory,
    ) -> Self {
        Self {
            db,
            hasher,
            tokens,
            sessions,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        device: DeviceDetails,
    ) -> ChatResult<AuthOutcome> {
        let username = validate_username(username)?;
        validate_password(password)?;

        let hashed = self.hasher.hash_password(password)?;
        let user = match self.db.create_user(&username, &hashed).await {
            Ok(user) => user,
            Err(PortError::Conflict(_)) => {
                return Err(ChatError::Conflict("Username is already taken".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        info!(user = %user.id, "user registered");

        let session = self
            .tokens
            .issue(user.id, device.device_info, device.ip_address)
            .await?;
        Ok(AuthOutcome { session, user })
    }

    /// Never reveals whether the username or the password was wrong.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device: DeviceDetails,
    ) -> ChatResult<AuthOutcome> {
        let credentials = match self.db.get_credentials_by_username(username.trim()).await {
            Ok(credentials) => credentials,
            Err(PortError::NotFound(_)) => return Err(ChatError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        if !self
            .hasher
            .verify_password(password, &credentials.hashed_password)?
        {
            warn!(user = %credentials.user_id, "failed login attempt");
            return Err(ChatError::InvalidCredentials);
        }

        let session = self
            .tokens
            .issue(credentials.user_id, device.device_info, device.ip_address)
            .await?;
        let user = self.db.get_user(credentials.user_id).await?;
        info!(user = %user.id, session = %session.id, "user logged in");
        Ok(AuthOutcome { session, user })
    }

    /// Re-authenticates with an existing token, sliding its expiry and
    /// refreshing the recorded device details. The token itself is unchanged.
    pub async fn login_with_token(&self, token: &str, device: DeviceDetails) -> ChatResult<AuthOutcome> {
        let ctx = self.tokens.validate(token).await?;
        self.sessions
            .update_device(
                ctx.session_id,
                device.device_info.as_deref(),
                device.ip_address.as_deref(),
            )
            .await?;
        let session = self.sessions.get(ctx.session_id).await?;
        let user = self.db.get_user(ctx.user_id).await?;
        Ok(AuthOutcome { session, user })
    }

    pub async fn logout(&self, ctx: &SessionContext) -> ChatResult<Session> {
        let session = self.sessions.end(ctx).await?;
        info!(user = %ctx.user_id, session = %session.id, "user logged out");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_trimmed_and_checked() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("al").is_err());
        assert!(validate_username("alice smith").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LENGTH + 1)).is_err());
        assert!(validate_username("bob_the-builder.2").is_ok());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
